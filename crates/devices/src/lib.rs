//! The hardware surface: an FPGA register/FIFO abstraction, a simulated
//! implementation for hardware-free testing, and the per-device readouts
//! riding on top of it (flow meter, glycol pump VFD, glycol thermocouples,
//! FCU bus).

pub mod auto_disable;
pub mod fcu;
pub mod flow_meter;
pub mod fpga;
pub mod pump_vfd;
pub mod thermocouple;

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("modbus timeout talking to unit {0}")]
    Timeout(u8),
    #[error("modbus exception from unit {0}: code {1}")]
    Exception(u8, u8),
    #[error("malformed response from unit {0}: {1}")]
    Malformed(u8, String),
}

/// The register/FIFO bus the FPGA exposes to every downstream Modbus-ish
/// device. Real hardware talks to this over the PCIe-mapped FIFO; tests and
/// `thermald -s` (standalone mode) use [`SimulatedBus`].
pub trait RegisterBus: Send {
    /// Read `count` consecutive 16-bit holding registers starting at
    /// `address` from Modbus unit `unit`.
    fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError>;

    /// Write a single holding register.
    fn write_holding_register(&mut self, unit: u8, address: u16, value: u16) -> Result<(), DeviceError>;

    /// Read one ASCII-framed line (used by the glycol thermocouple bus,
    /// which isn't register-mapped Modbus at all).
    fn read_ascii_frame(&mut self, unit: u8) -> Result<String, DeviceError>;

    /// Raw FPGA interlock/status word, independent of any downstream unit.
    fn read_status_word(&mut self) -> Result<u64, DeviceError>;
}

/// An in-memory bus for tests and standalone mode: holding registers and
/// canned ASCII frames can be poked directly, and failures can be injected
/// per unit.
#[derive(Default)]
pub struct SimulatedBus {
    registers: std::collections::HashMap<(u8, u16), u16>,
    ascii_frames: std::collections::HashMap<u8, String>,
    status_word: u64,
    fail_units: std::collections::HashSet<u8>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_register(&mut self, unit: u8, address: u16, value: u16) {
        self.registers.insert((unit, address), value);
    }

    pub fn set_ascii_frame(&mut self, unit: u8, frame: impl Into<String>) {
        self.ascii_frames.insert(unit, frame.into());
    }

    pub fn set_status_word(&mut self, word: u64) {
        self.status_word = word;
    }

    pub fn fail_unit(&mut self, unit: u8, fail: bool) {
        if fail {
            self.fail_units.insert(unit);
        } else {
            self.fail_units.remove(&unit);
        }
    }
}

impl RegisterBus for SimulatedBus {
    fn read_holding_registers(
        &mut self,
        unit: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError> {
        if self.fail_units.contains(&unit) {
            return Err(DeviceError::Timeout(unit));
        }
        Ok((address..address + count)
            .map(|a| *self.registers.get(&(unit, a)).unwrap_or(&0))
            .collect())
    }

    fn write_holding_register(&mut self, unit: u8, address: u16, value: u16) -> Result<(), DeviceError> {
        if self.fail_units.contains(&unit) {
            return Err(DeviceError::Timeout(unit));
        }
        self.registers.insert((unit, address), value);
        Ok(())
    }

    fn read_ascii_frame(&mut self, unit: u8) -> Result<String, DeviceError> {
        if self.fail_units.contains(&unit) {
            return Err(DeviceError::Timeout(unit));
        }
        self.ascii_frames
            .get(&unit)
            .cloned()
            .ok_or(DeviceError::Malformed(unit, "no frame queued".into()))
    }

    fn read_status_word(&mut self) -> Result<u64, DeviceError> {
        Ok(self.status_word)
    }
}
