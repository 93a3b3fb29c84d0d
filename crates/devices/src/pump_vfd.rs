//! The glycol coolant pump's VFD (variable-frequency drive), talked to as a
//! Modbus holding-register device: a status/frequency block at `0x2000` and
//! a command block at `0x2100`.

use crate::{auto_disable::AutoDisable, DeviceError, RegisterBus};

pub const STATUS_REGISTER: u16 = 0x2000;
pub const FREQUENCY_REGISTER: u16 = 0x2001;
pub const COMMAND_REGISTER: u16 = 0x2100;

const STATUS_BIT_RUNNING: u16 = 0x0001;
const STATUS_BIT_FAULTED: u16 = 0x0002;

const COMMAND_RUN: u16 = 0x0001;
const COMMAND_STOP: u16 = 0x0000;
const COMMAND_RESET_FAULT: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PumpStatus {
    pub running: bool,
    pub faulted: bool,
    pub frequency_hz: f64,
}

pub struct PumpVfd {
    unit: u8,
    guard: AutoDisable,
    last_status: Option<PumpStatus>,
}

impl PumpVfd {
    pub fn new(unit: u8, max_consecutive_failures: u32) -> Self {
        Self {
            unit,
            guard: AutoDisable::new(max_consecutive_failures),
            last_status: None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.guard.is_disabled()
    }

    pub fn last_status(&self) -> Option<PumpStatus> {
        self.last_status
    }

    pub fn poll(&mut self, bus: &mut dyn RegisterBus) -> Result<PumpStatus, DeviceError> {
        if self.guard.is_disabled() {
            return Err(DeviceError::Timeout(self.unit));
        }
        match self.read(bus) {
            Ok(status) => {
                self.guard.record_success();
                self.last_status = Some(status);
                Ok(status)
            }
            Err(err) => {
                self.guard.record_failure();
                Err(err)
            }
        }
    }

    fn read(&self, bus: &mut dyn RegisterBus) -> Result<PumpStatus, DeviceError> {
        let status = bus.read_holding_registers(self.unit, STATUS_REGISTER, 1)?[0];
        let freq_raw = bus.read_holding_registers(self.unit, FREQUENCY_REGISTER, 1)?[0];
        Ok(PumpStatus {
            running: status & STATUS_BIT_RUNNING != 0,
            faulted: status & STATUS_BIT_FAULTED != 0,
            frequency_hz: freq_raw as f64 / 100.0,
        })
    }

    pub fn set_frequency_hz(&self, bus: &mut dyn RegisterBus, hz: f64) -> Result<(), DeviceError> {
        let raw = (hz * 100.0).round().clamp(0.0, u16::MAX as f64) as u16;
        bus.write_holding_register(self.unit, FREQUENCY_REGISTER, raw)
    }

    pub fn start(&self, bus: &mut dyn RegisterBus) -> Result<(), DeviceError> {
        bus.write_holding_register(self.unit, COMMAND_REGISTER, COMMAND_RUN)
    }

    pub fn stop(&self, bus: &mut dyn RegisterBus) -> Result<(), DeviceError> {
        bus.write_holding_register(self.unit, COMMAND_REGISTER, COMMAND_STOP)
    }

    pub fn reset_fault(&self, bus: &mut dyn RegisterBus) -> Result<(), DeviceError> {
        bus.write_holding_register(self.unit, COMMAND_REGISTER, COMMAND_RESET_FAULT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedBus;

    #[test]
    fn decodes_status_and_frequency() {
        let mut bus = SimulatedBus::new();
        bus.set_register(4, STATUS_REGISTER, STATUS_BIT_RUNNING);
        bus.set_register(4, FREQUENCY_REGISTER, 3000);

        let mut pump = PumpVfd::new(4, 3);
        let status = pump.poll(&mut bus).unwrap();
        assert!(status.running);
        assert!(!status.faulted);
        assert_eq!(status.frequency_hz, 30.0);
    }

    #[test]
    fn set_frequency_rounds_and_clamps() {
        let mut bus = SimulatedBus::new();
        let pump = PumpVfd::new(4, 3);
        pump.set_frequency_hz(&mut bus, 12.345).unwrap();
        assert_eq!(
            bus.read_holding_registers(4, FREQUENCY_REGISTER, 1).unwrap()[0],
            1235
        );
    }
}
