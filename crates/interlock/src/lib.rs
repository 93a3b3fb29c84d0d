//! Interlock evaluator and the `Standby`/`Disabled`/`Fault` interlock state
//! machine that rides on top of it.
//!
//! The evaluator decodes nine boolean interlock conditions out of a single
//! raw FPGA status word and scores each against a configured severity. The
//! state machine only actually evaluates conditions while `Disabled`; in
//! `Standby` the raw word is ignored and in `Fault` it is latched until an
//! operator drives the machine back to `Standby`.

use log::info;
use ts_limits::{Function, Limit, Sample, Severity};

/// The nine supervised interlock signals, each decoded out of the same raw
/// status word via an `AllBitNotSet` mask -- the bit must be clear for the
/// condition to read "ok". Bits 16-24 of the raw status word, one per
/// signal, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterlockCondition {
    FanCoilHeatersOff,
    CoolantPumpOff,
    GisHeartbeatLost,
    MixingValveClosed,
    SupportSystemHeartbeatLost,
    CellDoorOpen,
    GisEarthquake,
    CoolantPumpEStop,
    CabinetOverTemp,
}

pub const CONDITIONS: [InterlockCondition; 9] = [
    InterlockCondition::FanCoilHeatersOff,
    InterlockCondition::CoolantPumpOff,
    InterlockCondition::GisHeartbeatLost,
    InterlockCondition::MixingValveClosed,
    InterlockCondition::SupportSystemHeartbeatLost,
    InterlockCondition::CellDoorOpen,
    InterlockCondition::GisEarthquake,
    InterlockCondition::CoolantPumpEStop,
    InterlockCondition::CabinetOverTemp,
];

/// The raw status word's bit for each condition, in declaration order:
/// `fanCoilHeatersOff` on bit 16 through `cabinetOverTemp` on bit 24.
pub const BIT_OFFSET: u32 = 16;

/// One condition's decode mask and the severity it reports when the decoded
/// bit disagrees with the expected (`Equal(1, ..)`) state.
#[derive(Debug, Clone, Copy)]
pub struct ConditionSettings {
    pub decode: Function,
    pub severity: Severity,
}

impl ConditionSettings {
    pub fn new(mask: u64, severity: Severity) -> Self {
        Self {
            decode: Function::AllBitNotSet(mask),
            severity,
        }
    }

    /// A condition wired to its default bit position (`BIT_OFFSET + index`).
    pub fn at_bit(index: u32, severity: Severity) -> Self {
        Self::new(1u64 << (BIT_OFFSET + index), severity)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterlockSettings {
    pub conditions: [ConditionSettings; 9],
    /// Number of `update()` calls between heartbeat toggle flips.
    pub heartbeat_toggle_period: u32,
}

impl InterlockSettings {
    /// The stock bit layout (§8 S1/S2): one bit per condition at
    /// `BIT_OFFSET + index`, all clear meaning fault. `gisEarthquake`,
    /// `coolantPumpOff`, `cellDoorOpen`, `coolantPumpEStop` and
    /// `cabinetOverTemp` trip `Fault`; the remaining four trip `Warning`.
    /// Real deployments override this from the YAML condition table (§6).
    pub fn default_layout(heartbeat_toggle_period: u32) -> Self {
        use Severity::{Fault, Warning};
        Self {
            conditions: [
                ConditionSettings::at_bit(0, Warning),  // fanCoilHeatersOff
                ConditionSettings::at_bit(1, Fault),     // coolantPumpOff
                ConditionSettings::at_bit(2, Warning),  // gisHeartbeatLost
                ConditionSettings::at_bit(3, Warning),  // mixingValveClosed
                ConditionSettings::at_bit(4, Warning),  // supportSystemHeartbeatLost
                ConditionSettings::at_bit(5, Fault),     // cellDoorOpen
                ConditionSettings::at_bit(6, Fault),     // gisEarthquake
                ConditionSettings::at_bit(7, Fault),     // coolantPumpEStop
                ConditionSettings::at_bit(8, Fault),     // cabinetOverTemp
            ],
            heartbeat_toggle_period,
        }
    }
}

/// Result of decoding one raw status word.
#[derive(Debug, Clone, Copy, Default)]
pub struct InterlockReadout {
    pub decoded: [bool; 9],
    pub severities: [Severity; 9],
    pub merged: Severity,
}

impl InterlockReadout {
    pub fn get(&self, condition: InterlockCondition) -> (bool, Severity) {
        let idx = CONDITIONS.iter().position(|c| *c == condition).expect("exhaustive");
        (self.decoded[idx], self.severities[idx])
    }
}

struct HeartbeatToggle {
    period: u32,
    counter: u32,
    state: bool,
}

impl HeartbeatToggle {
    fn new(period: u32) -> Self {
        Self {
            period: period.max(1),
            counter: 0,
            state: false,
        }
    }

    /// Advance one tick, flipping the toggle every `period` calls. Returns
    /// the toggle's state after this tick.
    fn tick(&mut self) -> bool {
        self.counter += 1;
        if self.counter >= self.period {
            self.counter = 0;
            self.state = !self.state;
        }
        self.state
    }
}

/// Decodes a raw status word against [`InterlockSettings`]. Stateless aside
/// from the heartbeat toggle, which advances once per `evaluate` call.
pub struct InterlockEvaluator {
    settings: InterlockSettings,
    heartbeat: HeartbeatToggle,
}

impl InterlockEvaluator {
    pub fn new(settings: InterlockSettings) -> Self {
        let heartbeat = HeartbeatToggle::new(settings.heartbeat_toggle_period);
        Self { settings, heartbeat }
    }

    pub fn evaluate(&mut self, raw_status: u64) -> InterlockReadout {
        let mut readout = InterlockReadout::default();
        for (i, cond) in self.settings.conditions.iter().enumerate() {
            let decoded = cond.decode.decode(raw_status);
            readout.decoded[i] = decoded;
            let limit = Limit::Equal(1, cond.severity);
            let sample = Sample::Integer(decoded as i64);
            readout.severities[i] = limit.evaluate(sample);
            readout.merged = readout.merged.merge(readout.severities[i]);
        }
        readout
    }

    /// Advance the heartbeat toggle, returning its new state. Called once per
    /// control-loop tick regardless of interlock state so the FCU bus always
    /// sees a live signal.
    pub fn tick_heartbeat(&mut self) -> bool {
        self.heartbeat.tick()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterlockState {
    Standby,
    Disabled,
    Fault,
}

#[derive(Debug, thiserror::Error)]
pub enum InterlockError {
    #[error("cannot {command} the interlock system while in {state:?}")]
    InvalidTransition {
        command: &'static str,
        state: InterlockState,
    },
}

/// The interlock state machine. Owns the evaluator and the last readout so
/// the supervisor can pull telemetry without re-evaluating.
pub struct InterlockSystem {
    state: InterlockState,
    evaluator: InterlockEvaluator,
    last_readout: InterlockReadout,
}

impl InterlockSystem {
    pub fn new(settings: InterlockSettings) -> Self {
        Self {
            state: InterlockState::Standby,
            evaluator: InterlockEvaluator::new(settings),
            last_readout: InterlockReadout::default(),
        }
    }

    pub fn state(&self) -> InterlockState {
        self.state
    }

    pub fn last_readout(&self) -> InterlockReadout {
        self.last_readout
    }

    /// Begin actively evaluating interlock conditions. Legal from `Standby`;
    /// a no-op from `Disabled`. Invalid from `Fault` -- an operator must
    /// drive back through `Standby` first.
    pub fn start(&mut self) -> Result<(), InterlockError> {
        match self.state {
            InterlockState::Standby => {
                self.state = InterlockState::Disabled;
                info!("interlock: -> Disabled");
                Ok(())
            }
            InterlockState::Disabled => Ok(()),
            InterlockState::Fault => Err(InterlockError::InvalidTransition {
                command: "start",
                state: self.state,
            }),
        }
    }

    /// Stop evaluating interlock conditions and latch the system idle.
    /// Legal from `Disabled` or `Fault`; a no-op from `Standby`.
    pub fn standby(&mut self) -> Result<(), InterlockError> {
        match self.state {
            InterlockState::Disabled | InterlockState::Fault => {
                self.state = InterlockState::Standby;
                info!("interlock: -> Standby");
                Ok(())
            }
            InterlockState::Standby => Ok(()),
        }
    }

    /// Feed in the latest raw status word. Only `Disabled` actually scores
    /// the conditions; `Standby` and `Fault` ignore the word entirely, matching
    /// the per-state dispatch of the wider supervisory machine.
    pub fn update(&mut self, raw_status: u64) -> InterlockState {
        match self.state {
            InterlockState::Standby => {}
            InterlockState::Disabled => {
                let readout = self.evaluator.evaluate(raw_status);
                self.last_readout = readout;
                if readout.merged.is_fault() {
                    self.state = InterlockState::Fault;
                    info!("interlock: merged severity Fault, -> Fault");
                }
            }
            InterlockState::Fault => {
                // Still scored for observability, per §4.C, but never
                // transitions out of Fault on its own.
                self.last_readout = self.evaluator.evaluate(raw_status);
            }
        }
        self.state
    }

    /// Advance the heartbeat toggle. Legal (and required) regardless of
    /// interlock state -- §3's invariant holds for any state >= Standby.
    pub fn tick_heartbeat(&mut self) -> bool {
        self.evaluator.tick_heartbeat()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> InterlockSettings {
        InterlockSettings::default_layout(10)
    }

    #[test]
    fn all_ok_word_stays_disabled() {
        // S1: status word 0x01FF0000 sets all nine condition bits (16-24).
        let mut sys = InterlockSystem::new(settings());
        sys.start().unwrap();
        assert_eq!(sys.update(0x01FF0000), InterlockState::Disabled);
        assert_eq!(sys.last_readout().merged, Severity::Ok);
    }

    #[test]
    fn gis_earthquake_bit_clear_faults_the_system() {
        // S2: 0x01BF0000 clears bit 22 (gisEarthquake, the 7th condition).
        let mut sys = InterlockSystem::new(settings());
        sys.start().unwrap();
        let next = sys.update(0x01BF0000);
        assert_eq!(next, InterlockState::Fault);
        let (decoded, severity) = sys.last_readout().get(InterlockCondition::GisEarthquake);
        assert!(decoded);
        assert_eq!(severity, Severity::Fault);
    }

    #[test]
    fn standby_ignores_status_word() {
        let mut sys = InterlockSystem::new(settings());
        assert_eq!(sys.update(0), InterlockState::Standby);
    }

    #[test]
    fn fault_latches_until_standby() {
        let mut sys = InterlockSystem::new(settings());
        sys.start().unwrap();
        sys.update(0x01BF0000);
        assert_eq!(sys.state(), InterlockState::Fault);
        sys.update(0x01FF0000);
        assert_eq!(sys.state(), InterlockState::Fault);
        sys.standby().unwrap();
        assert_eq!(sys.state(), InterlockState::Standby);
    }

    #[test]
    fn start_from_fault_is_rejected() {
        let mut sys = InterlockSystem::new(settings());
        sys.start().unwrap();
        sys.update(0x01BF0000);
        assert!(sys.start().is_err());
    }

    #[test]
    fn heartbeat_toggles_every_period() {
        let mut eval = InterlockEvaluator::new(settings());
        for _ in 0..9 {
            assert!(!eval.tick_heartbeat());
        }
        assert!(eval.tick_heartbeat());
    }
}
