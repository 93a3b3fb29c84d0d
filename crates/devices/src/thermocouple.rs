//! Glycol loop thermocouples, read over an ASCII-framed serial bus rather
//! than register-mapped Modbus. One frame multiplexes all eight channels of
//! a unit: `C01=nn.nnnn,C02=nn.nnnn,...,C08=nn.nnnn\r\n`. A reading of 900
//! or above is the sensor's own sentinel for "disconnected" and is reported
//! as `NaN`, never as a literal 900-degree reading.

use crate::{auto_disable::AutoDisable, DeviceError, RegisterBus};

const DISCONNECTED_SENTINEL: f64 = 900.0;
pub const CHANNELS_PER_UNIT: usize = 8;

/// Channel index within a unit's 8-channel reading, mirroring the order the
/// original telemetry struct stores them in: above-mirror, the three
/// inside-cell sensors, then the telescope and mirror coolant supply/return
/// pairs.
pub mod channel {
    pub const ABOVE_MIRROR: usize = 0;
    pub const INSIDE_CELL_1: usize = 1;
    pub const INSIDE_CELL_2: usize = 2;
    pub const INSIDE_CELL_3: usize = 3;
    pub const TELESCOPE_COOLANT_SUPPLY: usize = 4;
    pub const TELESCOPE_COOLANT_RETURN: usize = 5;
    pub const MIRROR_COOLANT_SUPPLY: usize = 6;
    pub const MIRROR_COOLANT_RETURN: usize = 7;
}

/// The mirror loop's weighted-average temperature -- the glycol-control
/// task's `mirrorLoopAverage` input (§4.I step 1): `supply_weight * supply +
/// (1 - supply_weight) * return`. The original's own weighting isn't
/// recoverable from what's left of its telemetry source, so `supply_weight`
/// is a configured fraction rather than a hardcoded 0.5; `thermald` passes
/// `setpoint.mirror_loop_supply_weight`.
pub fn mirror_loop_average_c(readings: [f64; CHANNELS_PER_UNIT], supply_weight: f64) -> f64 {
    let supply = readings[channel::MIRROR_COOLANT_SUPPLY];
    let return_c = readings[channel::MIRROR_COOLANT_RETURN];
    supply_weight * supply + (1.0 - supply_weight) * return_c
}

pub struct GlycolThermocouple {
    unit: u8,
    guard: AutoDisable,
    last_reading_c: Option<[f64; CHANNELS_PER_UNIT]>,
}

impl GlycolThermocouple {
    pub fn new(unit: u8, max_consecutive_failures: u32) -> Self {
        Self {
            unit,
            guard: AutoDisable::new(max_consecutive_failures),
            last_reading_c: None,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.guard.is_disabled()
    }

    pub fn last_reading_c(&self) -> Option<[f64; CHANNELS_PER_UNIT]> {
        self.last_reading_c
    }

    pub fn poll(&mut self, bus: &mut dyn RegisterBus) -> Result<[f64; CHANNELS_PER_UNIT], DeviceError> {
        if self.guard.is_disabled() {
            return Err(DeviceError::Timeout(self.unit));
        }
        match self.read(bus) {
            Ok(values) => {
                self.guard.record_success();
                self.last_reading_c = Some(values);
                Ok(values)
            }
            Err(err) => {
                self.guard.record_failure();
                Err(err)
            }
        }
    }

    /// Parse one `C01=nn.nnnn,...,C08=nn.nnnn\r\n` frame into eight channel
    /// readings, in channel order, substituting `NaN` for any value at or
    /// above the disconnected sentinel.
    fn read(&self, bus: &mut dyn RegisterBus) -> Result<[f64; CHANNELS_PER_UNIT], DeviceError> {
        let frame = bus.read_ascii_frame(self.unit)?;
        let malformed = || DeviceError::Malformed(self.unit, frame.clone());

        let mut values = [f64::NAN; CHANNELS_PER_UNIT];
        let mut seen = 0usize;
        for field in frame.trim().split(',') {
            let (_channel, raw) = field.split_once('=').ok_or_else(malformed)?;
            let raw: f64 = raw.trim().parse().map_err(|_| malformed())?;
            if seen >= CHANNELS_PER_UNIT {
                return Err(malformed());
            }
            values[seen] = if raw >= DISCONNECTED_SENTINEL { f64::NAN } else { raw };
            seen += 1;
        }
        if seen != CHANNELS_PER_UNIT {
            return Err(malformed());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimulatedBus;

    fn frame(values: [f64; CHANNELS_PER_UNIT]) -> String {
        let fields: Vec<String> = values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("C{:02}={v:.4}", i + 1))
            .collect();
        format!("{}\r\n", fields.join(","))
    }

    #[test]
    fn parses_all_eight_channels() {
        let values = [1.1, 2.2, 3.3, 4.4, 5.5, 6.6, 7.7, 8.8];
        let mut bus = SimulatedBus::new();
        bus.set_ascii_frame(7, frame(values));
        let mut tc = GlycolThermocouple::new(7, 3);
        let readings = tc.poll(&mut bus).unwrap();
        for (got, want) in readings.iter().zip(values.iter()) {
            assert!((got - want).abs() < 1e-6);
        }
    }

    #[test]
    fn sentinel_reading_becomes_nan() {
        let mut bus = SimulatedBus::new();
        bus.set_ascii_frame(7, "C01=4.5,C02=999.9,C03=0.0,C04=0.0,C05=0.0,C06=0.0,C07=0.0,C08=0.0\r\n");
        let mut tc = GlycolThermocouple::new(7, 3);
        let readings = tc.poll(&mut bus).unwrap();
        assert!(readings[1].is_nan());
        assert!(!readings[0].is_nan());
    }

    #[test]
    fn mirror_loop_average_weights_supply_and_return() {
        let mut readings = [0.0; CHANNELS_PER_UNIT];
        readings[channel::MIRROR_COOLANT_SUPPLY] = 10.0;
        readings[channel::MIRROR_COOLANT_RETURN] = 20.0;
        assert_eq!(mirror_loop_average_c(readings, 0.5), 15.0);
        assert_eq!(mirror_loop_average_c(readings, 1.0), 10.0);
        assert_eq!(mirror_loop_average_c(readings, 0.0), 20.0);
    }

    #[test]
    fn malformed_frame_is_an_error() {
        let mut bus = SimulatedBus::new();
        bus.set_ascii_frame(7, "not-a-frame\r\n");
        let mut tc = GlycolThermocouple::new(7, 3);
        assert!(tc.poll(&mut bus).is_err());
    }

    #[test]
    fn short_frame_is_an_error() {
        let mut bus = SimulatedBus::new();
        bus.set_ascii_frame(7, "C01=4.5,C02=5.5\r\n");
        let mut tc = GlycolThermocouple::new(7, 3);
        assert!(tc.poll(&mut bus).is_err());
    }
}
