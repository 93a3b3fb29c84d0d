//! Fan-coil unit bus: the wire-level register layout for a single FCU, and
//! the fixed-length inventory of `NUM_TS_ILC` units the controller thread
//! tracks across ticks (§3 "FCU inventory"). The PWM-percent-to-raw
//! conversion and heater/fan setpoint logic lives in `ts-control`; this
//! module is the wire-level read/write plus the per-unit bookkeeping that
//! rides on top of it.

use crate::{auto_disable::AutoDisable, DeviceError, RegisterBus};

pub const HEATER_PWM_BASE_REGISTER: u16 = 0;
pub const FAN_PWM_REGISTER: u16 = 100;
pub const HEARTBEAT_REGISTER: u16 = 200;
pub const STATUS_REGISTER: u16 = 201;
pub const ABSOLUTE_TEMPERATURE_REGISTER: u16 = 202;

fn decode_float(words: [u16; 2]) -> f32 {
    let mut bytes = [0u8; 4];
    bytes[0..2].copy_from_slice(&words[1].to_be_bytes());
    bytes[2..4].copy_from_slice(&words[0].to_be_bytes());
    f32::from_be_bytes(bytes)
}

/// Wire-level I/O for a single addressed FCU.
pub struct FcuBus {
    unit: u8,
    guard: AutoDisable,
    last_status_word: Option<u64>,
}

impl FcuBus {
    pub fn new(unit: u8, max_consecutive_failures: u32) -> Self {
        Self {
            unit,
            guard: AutoDisable::new(max_consecutive_failures),
            last_status_word: None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.guard.is_disabled()
    }

    pub fn last_status_word(&self) -> Option<u64> {
        self.last_status_word
    }

    pub fn write_heater_pwm(&self, bus: &mut dyn RegisterBus, heater_index: u16, raw: u8) -> Result<(), DeviceError> {
        bus.write_holding_register(self.unit, HEATER_PWM_BASE_REGISTER + heater_index, raw as u16)
    }

    pub fn write_fan_pwm(&self, bus: &mut dyn RegisterBus, raw: u8) -> Result<(), DeviceError> {
        bus.write_holding_register(self.unit, FAN_PWM_REGISTER, raw as u16)
    }

    pub fn write_heartbeat(&self, bus: &mut dyn RegisterBus, toggle: bool) -> Result<(), DeviceError> {
        bus.write_holding_register(self.unit, HEARTBEAT_REGISTER, toggle as u16)
    }

    pub fn poll_status(&mut self, bus: &mut dyn RegisterBus) -> Result<u64, DeviceError> {
        if self.guard.is_disabled() {
            return Err(DeviceError::Timeout(self.unit));
        }
        match bus.read_holding_registers(self.unit, STATUS_REGISTER, 1) {
            Ok(words) => {
                self.guard.record_success();
                let word = words[0] as u64;
                self.last_status_word = Some(word);
                Ok(word)
            }
            Err(err) => {
                self.guard.record_failure();
                Err(err)
            }
        }
    }

    /// The unit's measured absolute temperature, word-swap encoded the same
    /// way as every other float register on this bus (`fpga`, `flow_meter`).
    /// Doesn't participate in the comm-failure guard -- callers already poll
    /// `poll_status` each tick and track failures there.
    pub fn read_absolute_temperature_c(&self, bus: &mut dyn RegisterBus) -> Result<f64, DeviceError> {
        let words = bus.read_holding_registers(self.unit, ABSOLUTE_TEMPERATURE_REGISTER, 2)?;
        Ok(decode_float([words[0], words[1]]) as f64)
    }
}

/// One entry of the FCU inventory (§3). `address`, `x_position`, and
/// `y_position` are fixed at load and never mutated after that; everything
/// else is updated only by the controller thread as telemetry arrives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FcuUnit {
    pub address: u8,
    pub x_position: f64,
    pub y_position: f64,
    pub enabled: bool,
    pub auto_disabled: bool,
    pub error_count: u32,
    pub mode: u8,
    pub status: u16,
    pub faults: u16,
    pub differential_temperature_c: f64,
    pub fan_rpm: u32,
    pub absolute_temperature_c: f64,
    pub heater_pwm_target: f64,
    pub fan_rpm_target: u32,
}

impl FcuUnit {
    pub fn new(address: u8, x_position: f64, y_position: f64) -> Self {
        Self {
            address,
            x_position,
            y_position,
            enabled: true,
            auto_disabled: false,
            error_count: 0,
            mode: 0,
            status: 0,
            faults: 0,
            differential_temperature_c: 0.0,
            fan_rpm: 0,
            absolute_temperature_c: 0.0,
            heater_pwm_target: 0.0,
            fan_rpm_target: 0,
        }
    }
}

/// The fixed-length inventory of FCUs the controller carries across ticks,
/// plus the auto-disable policy from `fcu.failuresToDisable` (§4.K).
pub struct FcuInventory {
    units: Vec<FcuUnit>,
    auto_disable: bool,
    failures_to_disable: u32,
}

impl FcuInventory {
    /// Build an inventory of `count` units at their default (disabled
    /// position-free) layout; `thermald`'s settings loader fills in real
    /// `x_position`/`y_position` for each address after construction.
    pub fn new(count: usize, auto_disable: bool, failures_to_disable: u32) -> Self {
        let units = (0..count as u8).map(|addr| FcuUnit::new(addr, 0.0, 0.0)).collect();
        Self {
            units,
            auto_disable,
            failures_to_disable,
        }
    }

    pub fn units(&self) -> &[FcuUnit] {
        &self.units
    }

    pub fn units_mut(&mut self) -> &mut [FcuUnit] {
        &mut self.units
    }

    pub fn enabled_addresses(&self) -> impl Iterator<Item = u8> + '_ {
        self.units.iter().filter(|u| u.enabled).map(|u| u.address)
    }

    /// §4.K: the FCU-bus callback reported a missing reply for unit
    /// `address`. Increments its error count and, once it exceeds
    /// `failuresToDisable`, auto-disables the unit.
    pub fn record_comm_failure(&mut self, address: u8) {
        if let Some(unit) = self.units.iter_mut().find(|u| u.address == address) {
            unit.error_count += 1;
            if self.auto_disable && unit.error_count > self.failures_to_disable {
                unit.auto_disabled = true;
                unit.enabled = false;
                log::warn!("fcu {address}: auto-disabled after {} consecutive failures", unit.error_count);
            }
        }
    }

    /// A successful reply resets the unit's error count (but not an
    /// already-latched auto-disable; that requires an explicit re-enable).
    pub fn record_comm_success(&mut self, address: u8, status: u16, faults: u16) {
        if let Some(unit) = self.units.iter_mut().find(|u| u.address == address) {
            unit.error_count = 0;
            unit.status = status;
            unit.faults = faults;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedBus;

    #[test]
    fn writes_land_on_the_expected_registers() {
        let mut bus = SimulatedBus::new();
        let fcu = FcuBus::new(9, 3);
        fcu.write_heater_pwm(&mut bus, 2, 200).unwrap();
        fcu.write_fan_pwm(&mut bus, 255).unwrap();
        fcu.write_heartbeat(&mut bus, true).unwrap();

        assert_eq!(
            bus.read_holding_registers(9, HEATER_PWM_BASE_REGISTER + 2, 1).unwrap()[0],
            200
        );
        assert_eq!(bus.read_holding_registers(9, FAN_PWM_REGISTER, 1).unwrap()[0], 255);
        assert_eq!(bus.read_holding_registers(9, HEARTBEAT_REGISTER, 1).unwrap()[0], 1);
    }

    #[test]
    fn reads_absolute_temperature_word_swapped() {
        let mut bus = SimulatedBus::new();
        let bytes = 21.5f32.to_be_bytes();
        let hi = u16::from_be_bytes([bytes[0], bytes[1]]);
        let lo = u16::from_be_bytes([bytes[2], bytes[3]]);
        bus.set_register(9, ABSOLUTE_TEMPERATURE_REGISTER, lo);
        bus.set_register(9, ABSOLUTE_TEMPERATURE_REGISTER + 1, hi);
        let fcu = FcuBus::new(9, 3);
        assert!((fcu.read_absolute_temperature_c(&mut bus).unwrap() - 21.5).abs() < 1e-3);
    }

    #[test]
    fn status_polling_tracks_auto_disable() {
        let mut bus = SimulatedBus::new();
        bus.fail_unit(9, true);
        let mut fcu = FcuBus::new(9, 1);
        assert!(fcu.poll_status(&mut bus).is_err());
        assert!(fcu.is_disabled());
    }

    #[test]
    fn inventory_auto_disables_after_too_many_failures() {
        let mut inventory = FcuInventory::new(4, true, 2);
        inventory.record_comm_failure(1);
        assert!(inventory.units()[1].enabled);
        inventory.record_comm_failure(1);
        assert!(inventory.units()[1].enabled);
        inventory.record_comm_failure(1);
        assert!(!inventory.units()[1].enabled);
        assert!(inventory.units()[1].auto_disabled);
    }

    #[test]
    fn success_resets_the_error_count() {
        let mut inventory = FcuInventory::new(2, true, 5);
        inventory.record_comm_failure(0);
        inventory.record_comm_failure(0);
        inventory.record_comm_success(0, 0, 0);
        assert_eq!(inventory.units()[0].error_count, 0);
    }

    #[test]
    fn enabled_addresses_skips_disabled_units() {
        let mut inventory = FcuInventory::new(3, true, 1);
        inventory.units_mut()[1].enabled = false;
        let addrs: Vec<u8> = inventory.enabled_addresses().collect();
        assert_eq!(addrs, vec![0, 2]);
    }

    #[test]
    fn auto_disable_disabled_in_settings_never_trips() {
        let mut inventory = FcuInventory::new(2, false, 1);
        for _ in 0..10 {
            inventory.record_comm_failure(0);
        }
        assert!(inventory.units()[0].enabled);
        assert!(!inventory.units()[0].auto_disabled);
    }
}
