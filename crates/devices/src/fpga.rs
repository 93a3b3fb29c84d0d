//! The FPGA's own named registers (§6 "FPGA register map"): the mixing
//! valve's position/command pair, the heartbeat toggle, and the two
//! power-relay booleans (coolant pump, FCU bank). `SLOT4_DIS`, the raw
//! interlock status word, rides on [`crate::RegisterBus::read_status_word`]
//! instead of through here -- it's a single word with no device-specific
//! framing of its own.
//!
//! These aren't Modbus devices; the real FPGA exposes them over dedicated
//! FIFOs (command-u16, response-sgl, ...) rather than holding registers.
//! Modelled here as a conventional holding-register block on a reserved
//! unit id so the same [`crate::RegisterBus`] abstraction covers both,
//! mirroring how `flow_meter` already decodes a float out of two words.

use crate::{DeviceError, RegisterBus};

/// The FPGA's own register space doesn't share a Modbus unit id with any
/// downstream device; by convention it answers as unit 0 on the same bus.
pub const FPGA_UNIT: u8 = 0;

pub const MIXING_VALVE_POSITION_REGISTER: u16 = 0x3000;
pub const MIXING_VALVE_COMMAND_REGISTER: u16 = 0x3002;
pub const HEARTBEAT_REGISTER: u16 = 0x3004;
pub const COOLANT_PUMP_ON_REGISTER: u16 = 0x3005;
pub const FCU_ON_REGISTER: u16 = 0x3006;

fn decode_float(words: [u16; 2]) -> f32 {
    let mut bytes = [0u8; 4];
    bytes[0..2].copy_from_slice(&words[1].to_be_bytes());
    bytes[2..4].copy_from_slice(&words[0].to_be_bytes());
    f32::from_be_bytes(bytes)
}

fn encode_float(value: f32) -> [u16; 2] {
    let bytes = value.to_be_bytes();
    let hi = u16::from_be_bytes([bytes[0], bytes[1]]);
    let lo = u16::from_be_bytes([bytes[2], bytes[3]]);
    [lo, hi]
}

/// Read-write access to the FPGA's own named registers, independent of any
/// Modbus unit.
pub struct FpgaRegisters;

impl FpgaRegisters {
    pub fn read_valve_position_percent(bus: &mut dyn RegisterBus) -> Result<f32, DeviceError> {
        let words = bus.read_holding_registers(FPGA_UNIT, MIXING_VALVE_POSITION_REGISTER, 2)?;
        Ok(decode_float([words[0], words[1]]))
    }

    pub fn write_valve_command_percent(bus: &mut dyn RegisterBus, percent: f32) -> Result<(), DeviceError> {
        let [lo, hi] = encode_float(percent);
        bus.write_holding_register(FPGA_UNIT, MIXING_VALVE_COMMAND_REGISTER, lo)?;
        bus.write_holding_register(FPGA_UNIT, MIXING_VALVE_COMMAND_REGISTER + 1, hi)
    }

    pub fn write_heartbeat(bus: &mut dyn RegisterBus, toggle: bool) -> Result<(), DeviceError> {
        bus.write_holding_register(FPGA_UNIT, HEARTBEAT_REGISTER, toggle as u16)
    }

    pub fn write_coolant_pump_on(bus: &mut dyn RegisterBus, on: bool) -> Result<(), DeviceError> {
        bus.write_holding_register(FPGA_UNIT, COOLANT_PUMP_ON_REGISTER, on as u16)
    }

    pub fn write_fcu_on(bus: &mut dyn RegisterBus, on: bool) -> Result<(), DeviceError> {
        bus.write_holding_register(FPGA_UNIT, FCU_ON_REGISTER, on as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedBus;

    #[test]
    fn valve_command_round_trips_through_the_register_pair() {
        let mut bus = SimulatedBus::new();
        FpgaRegisters::write_valve_command_percent(&mut bus, 42.5).unwrap();
        let words = bus
            .read_holding_registers(FPGA_UNIT, MIXING_VALVE_COMMAND_REGISTER, 2)
            .unwrap();
        assert_eq!(decode_float([words[0], words[1]]), 42.5);
    }

    #[test]
    fn valve_position_decodes_the_same_word_order_as_the_command() {
        let mut bus = SimulatedBus::new();
        let [lo, hi] = encode_float(17.0);
        bus.set_register(FPGA_UNIT, MIXING_VALVE_POSITION_REGISTER, lo);
        bus.set_register(FPGA_UNIT, MIXING_VALVE_POSITION_REGISTER + 1, hi);
        assert_eq!(FpgaRegisters::read_valve_position_percent(&mut bus).unwrap(), 17.0);
    }

    #[test]
    fn power_relays_and_heartbeat_write_booleans() {
        let mut bus = SimulatedBus::new();
        FpgaRegisters::write_heartbeat(&mut bus, true).unwrap();
        FpgaRegisters::write_coolant_pump_on(&mut bus, true).unwrap();
        FpgaRegisters::write_fcu_on(&mut bus, false).unwrap();
        assert_eq!(bus.read_holding_registers(FPGA_UNIT, HEARTBEAT_REGISTER, 1).unwrap()[0], 1);
        assert_eq!(bus.read_holding_registers(FPGA_UNIT, COOLANT_PUMP_ON_REGISTER, 1).unwrap()[0], 1);
        assert_eq!(bus.read_holding_registers(FPGA_UNIT, FCU_ON_REGISTER, 1).unwrap()[0], 0);
    }
}
