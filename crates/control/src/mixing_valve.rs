//! Fine position control for the glycol mixing valve. The valve's actuator
//! has backlash: a small move in a new direction can get eaten by slack in
//! the linkage before the valve actually starts travelling, so a small move
//! first drives past the target by `backlash_step` -- away from the
//! approach direction -- then settles back onto the real target once that
//! overshoot is confirmed. A move big enough to dwarf the backlash skips
//! the overshoot and goes straight at the target.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveState {
    MovingToCompensatedTarget,
    MovingToTarget,
    OnTarget,
    Faulted,
}

#[derive(Debug, Clone, Copy)]
pub struct MixingValveConfig {
    /// Worst-case time budget for a single move; exceeding it is a timeout
    /// fault regardless of how close the valve got.
    pub max_moving_time: Duration,
    /// A move whose magnitude exceeds this goes straight to
    /// `MovingToTarget`; anything smaller is routed through the
    /// backlash-compensated approach first.
    pub minimal_move_percent: f64,
    /// How far past a small target the compensated approach overshoots,
    /// away from the direction of travel.
    pub backlash_step_percent: f64,
    pub in_position_tolerance_percent: f64,
}

/// The debounce window: position must read on-target for this fraction of
/// `max_moving_time` before the controller trusts it and calls the move
/// complete. Matches §4.H's 20% debounce.
const ON_TARGET_DEBOUNCE_FRACTION: f64 = 0.20;

#[derive(Debug)]
pub struct MixingValveController {
    config: MixingValveConfig,
    state: ValveState,
    /// The last commanded setpoint (`lastSetpoint` in §4.H).
    last_setpoint_percent: f64,
    compensated_setpoint_percent: f64,
    move_deadline: Instant,
    /// When the controller first observed "in position" this move, for the
    /// 20%-of-`max_moving_time` debounce. Reset whenever it drops back out
    /// of tolerance.
    in_position_since: Option<Instant>,
}

impl MixingValveController {
    pub fn new(config: MixingValveConfig, initial_position_percent: f64, now: Instant) -> Self {
        Self {
            config,
            state: ValveState::OnTarget,
            last_setpoint_percent: initial_position_percent,
            compensated_setpoint_percent: initial_position_percent,
            move_deadline: now,
            in_position_since: Some(now),
        }
    }

    pub fn state(&self) -> ValveState {
        self.state
    }

    /// The most recently commanded demand (what §4.H calls `lastSetpoint`).
    pub fn target_percent(&self) -> f64 {
        self.last_setpoint_percent
    }

    /// Command a new demand. Mirrors §4.H's `set_target`: a move bigger than
    /// `minimal_move_percent` goes straight to `MovingToTarget`; a smaller
    /// move is routed through a backlash-compensated overshoot first.
    pub fn set_target(&mut self, demand_percent: f64, now: Instant) {
        let demand_percent = demand_percent.clamp(0.0, 100.0);
        let delta = demand_percent - self.last_setpoint_percent;

        if delta.abs() > self.config.minimal_move_percent {
            self.state = ValveState::MovingToTarget;
            self.compensated_setpoint_percent = demand_percent;
        } else {
            self.state = ValveState::MovingToCompensatedTarget;
            let backlash = self.config.backlash_step_percent;
            let overshoot = if delta >= 0.0 { backlash } else { -backlash };
            let max_compensated = 100.0 - backlash;
            self.compensated_setpoint_percent = (demand_percent + overshoot).clamp(0.0, max_compensated.max(0.0));
        }

        self.last_setpoint_percent = demand_percent;
        self.move_deadline = now + self.config.max_moving_time;
        self.in_position_since = None;
    }

    fn within_tolerance(&self, position_percent: f64, target: f64) -> bool {
        (position_percent - target).abs() < self.config.in_position_tolerance_percent
    }

    fn debounce_satisfied(&self, since: Instant, now: Instant) -> bool {
        now.duration_since(since) >= self.config.max_moving_time.mul_f64(ON_TARGET_DEBOUNCE_FRACTION)
    }

    fn past_deadline(&self, now: Instant) -> bool {
        now >= self.move_deadline
    }

    /// Feed in the latest measured valve position. Returns `Some(new target
    /// percent)` when the caller should issue a fresh device command, or
    /// `None` ("no change" in §4.H) when nothing needs to move. Call once
    /// per outer-loop tick.
    pub fn get_target(&mut self, current_position_percent: f64, now: Instant) -> Option<f64> {
        match self.state {
            ValveState::Faulted => None,
            ValveState::MovingToCompensatedTarget => {
                let in_position = self.within_tolerance(current_position_percent, self.compensated_setpoint_percent);
                if in_position {
                    let since = *self.in_position_since.get_or_insert(now);
                    if self.debounce_satisfied(since, now) {
                        self.state = ValveState::MovingToTarget;
                        self.move_deadline = now + self.config.max_moving_time;
                        self.in_position_since = None;
                        return Some(self.last_setpoint_percent);
                    }
                } else {
                    self.in_position_since = None;
                }
                if self.past_deadline(now) {
                    self.fault("timed out moving to the backlash-compensated target");
                    return None;
                }
                Some(self.compensated_setpoint_percent)
            }
            ValveState::MovingToTarget => {
                let in_position = self.within_tolerance(current_position_percent, self.last_setpoint_percent);
                if in_position {
                    let since = *self.in_position_since.get_or_insert(now);
                    if self.debounce_satisfied(since, now) {
                        self.state = ValveState::OnTarget;
                        return None;
                    }
                } else {
                    self.in_position_since = None;
                }
                if self.past_deadline(now) {
                    self.fault("timed out moving to target");
                    return None;
                }
                Some(self.last_setpoint_percent)
            }
            ValveState::OnTarget => {
                if !self.within_tolerance(current_position_percent, self.last_setpoint_percent) {
                    self.fault("valve moved out of target while holding");
                }
                None
            }
        }
    }

    fn fault(&mut self, reason: &str) {
        log::error!("mixing valve: {reason}, escalating to fault");
        self.state = ValveState::Faulted;
    }

    /// Clear a fault and resume control at the valve's current position.
    /// Only meaningful from `Faulted`; a no-op otherwise.
    pub fn reset(&mut self, current_position_percent: f64, now: Instant) {
        if self.state == ValveState::Faulted {
            self.last_setpoint_percent = current_position_percent;
            self.compensated_setpoint_percent = current_position_percent;
            self.state = ValveState::OnTarget;
            self.in_position_since = Some(now);
            self.move_deadline = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MixingValveConfig {
        MixingValveConfig {
            max_moving_time: Duration::from_millis(2000),
            minimal_move_percent: 5.0,
            backlash_step_percent: 3.0,
            in_position_tolerance_percent: 0.1,
        }
    }

    #[test]
    fn large_move_skips_compensation() {
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 0.0, now);
        valve.set_target(50.0, now);
        assert_eq!(valve.state(), ValveState::MovingToTarget);
    }

    #[test]
    fn small_move_backlash_compensates() {
        // S3: lastSetpoint=40, minimalMove=5, backlashStep=3, set_target(42).
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 40.0, now);
        valve.set_target(42.0, now);
        assert_eq!(valve.state(), ValveState::MovingToCompensatedTarget);
        assert_eq!(valve.compensated_setpoint_percent, 45.0);
    }

    #[test]
    fn small_move_sequence_matches_worked_example() {
        // S3: lastSetpoint=40, minimalMove=5, backlashStep=3,
        // maxMovingTime=2000ms, set_target(42) -> compensated=45.
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 40.0, now);
        valve.set_target(42.0, now);

        // Within inPosition of the compensated target (44.99) for the
        // first 200ms: the 20% (400ms) debounce hasn't elapsed yet, so the
        // controller keeps commanding the compensated target.
        let early = now + Duration::from_millis(200);
        assert_eq!(valve.get_target(44.99, early), Some(45.0));

        // 400ms after first reading in position (at 600ms total) the
        // debounce is satisfied and the controller switches to chasing the
        // real setpoint.
        let debounced = now + Duration::from_millis(650);
        assert_eq!(valve.get_target(44.99, debounced), Some(42.0));
        assert_eq!(valve.state(), ValveState::MovingToTarget);

        // At 1600ms total (well within maxMovingTime, but before a fresh
        // 400ms on-target debounce has elapsed in the new phase) it keeps
        // returning lastSetpoint = 42, exactly as the scenario specifies.
        let later = now + Duration::from_millis(1600);
        assert_eq!(valve.get_target(42.0, later), Some(42.0));
        assert_eq!(valve.state(), ValveState::MovingToTarget);
    }

    #[test]
    fn timeout_faults_the_valve() {
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 0.0, now);
        valve.set_target(50.0, now);
        let later = now + Duration::from_millis(2100);
        assert_eq!(valve.get_target(10.0, later), None);
        assert_eq!(valve.state(), ValveState::Faulted);
    }

    #[test]
    fn on_target_requires_debounce() {
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 0.0, now);
        valve.set_target(50.0, now);
        // arrives immediately, but debounce window hasn't elapsed
        assert_eq!(valve.get_target(50.0, now), Some(50.0));
        assert_eq!(valve.state(), ValveState::MovingToTarget);
        let later = now + Duration::from_millis(500);
        assert_eq!(valve.get_target(50.0, later), None);
        assert_eq!(valve.state(), ValveState::OnTarget);
    }

    #[test]
    fn drifting_off_target_while_on_target_faults() {
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 0.0, now);
        valve.set_target(50.0, now);
        let settled = now + Duration::from_millis(500);
        valve.get_target(50.0, now);
        valve.get_target(50.0, settled);
        assert_eq!(valve.state(), ValveState::OnTarget);
        let drifted = settled + Duration::from_millis(100);
        assert_eq!(valve.get_target(40.0, drifted), None);
        assert_eq!(valve.state(), ValveState::Faulted);
    }

    #[test]
    fn reset_clears_a_fault() {
        let now = Instant::now();
        let mut valve = MixingValveController::new(config(), 0.0, now);
        valve.set_target(50.0, now);
        let later = now + Duration::from_millis(2100);
        valve.get_target(10.0, later);
        assert_eq!(valve.state(), ValveState::Faulted);
        valve.reset(10.0, later);
        assert_eq!(valve.state(), ValveState::OnTarget);
        assert_eq!(valve.target_percent(), 10.0);
    }
}
