//! Step-wise glycol mixing-valve position control (§4.I): nudge the valve
//! position towards whichever direction reduces the gap between the mirror
//! loop's average temperature and the applied setpoint. There is
//! deliberately no PID here -- a slow, bounded step each tick is enough
//! authority over a thermal system with this much mass, and it can't
//! overshoot and oscillate the way an aggressive loop could. A small
//! precision band around the setpoint absorbs sensor noise without the
//! valve hunting back and forth every tick.

/// Starting valve position for a freshly scheduled glycol-control task, per
/// §4.I.
pub const INITIAL_VALVE_POSITION_PERCENT: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct GlycolControlConfig {
    pub step_percent: f64,
    /// No adjustment is made while `|mirrorLoopAverage - setpoint|` is
    /// within this band.
    pub precision_c: f64,
}

#[derive(Debug)]
pub struct GlycolTemperatureControl {
    config: GlycolControlConfig,
    applied_setpoint_c: f64,
    valve_position_percent: f64,
}

impl GlycolTemperatureControl {
    pub fn new(config: GlycolControlConfig, applied_setpoint_c: f64, initial_valve_position_percent: f64) -> Self {
        Self {
            config,
            applied_setpoint_c,
            valve_position_percent: initial_valve_position_percent.clamp(0.0, 100.0),
        }
    }

    pub fn valve_position_percent(&self) -> f64 {
        self.valve_position_percent
    }

    pub fn applied_setpoint_c(&self) -> f64 {
        self.applied_setpoint_c
    }

    pub fn set_applied_setpoint_c(&mut self, setpoint_c: f64) {
        self.applied_setpoint_c = setpoint_c;
    }

    /// Advance one step given the mirror loop's current average
    /// temperature. Returns the new valve position.
    pub fn step(&mut self, mirror_loop_average_c: f64) -> f64 {
        let diff = mirror_loop_average_c - self.applied_setpoint_c;
        if diff > self.config.precision_c {
            self.valve_position_percent += self.config.step_percent;
        } else if diff < -self.config.precision_c {
            self.valve_position_percent -= self.config.step_percent;
        }
        self.valve_position_percent = self.valve_position_percent.clamp(0.0, 100.0);
        self.valve_position_percent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GlycolControlConfig {
        GlycolControlConfig {
            step_percent: 2.0,
            precision_c: 0.2,
        }
    }

    #[test]
    fn steps_up_when_loop_runs_warm() {
        let mut ctl = GlycolTemperatureControl::new(config(), 5.0, 50.0);
        assert_eq!(ctl.step(6.0), 52.0);
    }

    #[test]
    fn steps_down_when_loop_runs_cold() {
        let mut ctl = GlycolTemperatureControl::new(config(), 5.0, 50.0);
        assert_eq!(ctl.step(4.0), 48.0);
    }

    #[test]
    fn holds_when_within_precision_band() {
        let mut ctl = GlycolTemperatureControl::new(config(), 5.0, 50.0);
        assert_eq!(ctl.step(5.1), 50.0);
        assert_eq!(ctl.step(4.9), 50.0);
        assert_eq!(ctl.step(5.0), 50.0);
    }

    #[test]
    fn clamps_to_valid_range() {
        let mut ctl = GlycolTemperatureControl::new(config(), 5.0, 99.0);
        assert_eq!(ctl.step(6.0), 100.0);
        assert_eq!(ctl.step(6.0), 100.0);

        let mut ctl = GlycolTemperatureControl::new(config(), 5.0, 1.0);
        assert_eq!(ctl.step(4.0), 0.0);
        assert_eq!(ctl.step(4.0), 0.0);
    }

    #[test]
    fn starts_at_the_default_initial_position() {
        let ctl = GlycolTemperatureControl::new(config(), 5.0, INITIAL_VALVE_POSITION_PERCENT);
        assert_eq!(ctl.valve_position_percent(), 10.0);
    }
}
