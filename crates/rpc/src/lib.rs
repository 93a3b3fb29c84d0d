//! The external-command adapter (§4.F): translates the opaque RPC command
//! surface into [`MainCommand`]s enqueued on the controller thread, and
//! translates the resulting [`Ack`]s back into RPC ack codes.
//!
//! The RPC/event-bus transport itself is out of scope (§1) -- this crate
//! only defines the [`RpcSurface`] interface the core polls and the
//! translation tables either side of it.

use log::warn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use ts_queue::{Ack, AckSink, Command, CommandQueue, RejectKind};
use ts_supervisor::{MainCommand, MainState, Supervisor};

/// Every named entry point on the RPC command surface (§6), including the
/// legacy aliases the original exposes alongside the primary names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Enable,
    Disable,
    Standby,
    ExitControl,
    SetLogLevel,
    SetEngineeringMode,
    HeaterFanDemand,
    SetMixingValve,
    CoolantPumpPower,
    CoolantPumpStart,
    CoolantPumpStop,
    CoolantPumpFrequency,
    CoolantPumpReset,
    ApplySetpoint,
}

impl CommandKind {
    /// Resolve a wire command name, including legacy aliases, to its
    /// canonical [`CommandKind`]. `boot` is deliberately absent: it isn't
    /// exposed on the RPC surface, only run once at process startup.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "start" | "enterControl" => CommandKind::Start,
            "enable" => CommandKind::Enable,
            "disable" => CommandKind::Disable,
            "standby" | "abort" => CommandKind::Standby,
            "exitControl" => CommandKind::ExitControl,
            "setLogLevel" => CommandKind::SetLogLevel,
            "setEngineeringMode" | "enterEngineering" | "exitEngineering" => CommandKind::SetEngineeringMode,
            "heaterFanDemand" | "setFanPWM" | "setHeaterPWM" => CommandKind::HeaterFanDemand,
            "setMixingValve" | "setValue" => CommandKind::SetMixingValve,
            "coolantPumpPower" => CommandKind::CoolantPumpPower,
            "coolantPumpStart" => CommandKind::CoolantPumpStart,
            "coolantPumpStop" => CommandKind::CoolantPumpStop,
            "coolantPumpFrequency" | "setVFD" => CommandKind::CoolantPumpFrequency,
            "coolantPumpReset" => CommandKind::CoolantPumpReset,
            "applySetpoint" => CommandKind::ApplySetpoint,
            _ => return None,
        })
    }
}

/// Parameters accompanying an RPC command, already decoded from the wire
/// format by the (opaque) transport.
#[derive(Debug, Clone)]
pub enum RpcParams {
    None,
    Bool(bool),
    Float(f64),
    LogLevel(log::LevelFilter),
    TwoFloats(f64, f64),
    /// `heaterFanDemand(pwm[], rpm[])`; only the PWM vector's first entry is
    /// honoured by the one engineering-mode demand path the core exposes
    /// today (§4.D `Engineering`), matching `setFanPWM`/`setHeaterPWM`'s
    /// single-value legacy aliases.
    PwmRpm(Vec<f64>, Vec<u32>),
}

/// Translate one RPC request into the [`MainCommand`] the supervisor
/// dispatches, or `InvalidParameter` if the params don't match the kind.
pub fn to_main_command(kind: CommandKind, params: &RpcParams) -> Result<MainCommand, RejectKind> {
    match (kind, params) {
        (CommandKind::Start, RpcParams::None) => Ok(MainCommand::Start),
        (CommandKind::Enable, RpcParams::None) => Ok(MainCommand::Enable),
        (CommandKind::Disable, RpcParams::None) => Ok(MainCommand::Disable),
        (CommandKind::Standby, RpcParams::None) => Ok(MainCommand::Standby),
        (CommandKind::ExitControl, RpcParams::None) => Ok(MainCommand::ExitControl),
        (CommandKind::SetLogLevel, RpcParams::LogLevel(level)) => Ok(MainCommand::SetLogLevel(*level)),
        (CommandKind::SetEngineeringMode, RpcParams::Bool(true)) => Ok(MainCommand::EnterEngineering),
        (CommandKind::SetEngineeringMode, RpcParams::Bool(false)) => Ok(MainCommand::ExitEngineering),
        (CommandKind::HeaterFanDemand, RpcParams::PwmRpm(pwm, _rpm)) => {
            let demand = *pwm.first().ok_or(RejectKind::InvalidParameter)?;
            Ok(MainCommand::HeaterFanDemand(demand))
        }
        (CommandKind::SetMixingValve, RpcParams::Float(percent)) => {
            if !(0.0..=100.0).contains(percent) {
                return Err(RejectKind::InvalidParameter);
            }
            Ok(MainCommand::SetMixingValve(*percent))
        }
        (CommandKind::CoolantPumpPower, RpcParams::Bool(on)) => Ok(MainCommand::CoolantPumpPower(*on)),
        (CommandKind::CoolantPumpStart, RpcParams::None) => Ok(MainCommand::CoolantPumpStart),
        (CommandKind::CoolantPumpStop, RpcParams::None) => Ok(MainCommand::CoolantPumpStop),
        (CommandKind::CoolantPumpFrequency, RpcParams::Float(hz)) => {
            if *hz < 0.0 || !hz.is_finite() {
                return Err(RejectKind::InvalidParameter);
            }
            Ok(MainCommand::CoolantPumpSetFrequency(*hz))
        }
        (CommandKind::CoolantPumpReset, RpcParams::None) => Ok(MainCommand::CoolantPumpReset),
        (CommandKind::ApplySetpoint, RpcParams::TwoFloats(glycol_c, heaters_c)) => Ok(MainCommand::ApplySetpoint {
            glycol_c: *glycol_c,
            heaters_c: *heaters_c,
        }),
        _ => Err(RejectKind::InvalidParameter),
    }
}

/// §6/§4.F's ack-code translation: `InProgress=301`, `Complete=303`,
/// `Aborted=-303`, `Failed=-302`, and a rejection's sub-code depends on its
/// [`RejectKind`] (`-320..=-324`).
pub fn ack_code(ack: &Ack) -> i32 {
    match ack {
        Ack::InProgress => 301,
        Ack::Complete => 303,
        Ack::Aborted => -303,
        Ack::Failed(_) => -302,
        Ack::NotPermitted(kind) => reject_code(*kind),
    }
}

fn reject_code(kind: RejectKind) -> i32 {
    match kind {
        RejectKind::InvalidState => -320,
        RejectKind::InvalidParameter => -321,
        RejectKind::AlreadyInProgress => -322,
        RejectKind::ExecutionBlocked => -323,
        RejectKind::AlreadyInState => -324,
    }
}

/// One command popped off the RPC surface, paired with the callback that
/// reports its ack code back over the (opaque) transport.
pub struct PendingRpcCommand {
    pub kind: CommandKind,
    pub params: RpcParams,
    pub ack: Box<dyn Fn(i32) + Send>,
}

/// The RPC command surface the adapter polls, once per pass, for each known
/// command (§4.F). The transport behind it -- sockets, shared memory, a SAL
/// bus -- is out of scope; implementors only need to surface whatever
/// request is next pending, if any.
pub trait RpcSurface: Send {
    fn poll(&mut self) -> Option<PendingRpcCommand>;
}

/// An [`AckSink`] that reports every ack as a wire code via the pending
/// command's callback, per [`ack_code`].
struct RpcAckSink {
    report: Box<dyn Fn(i32) + Send>,
}

impl AckSink for RpcAckSink {
    fn ack(&self, ack: Ack) {
        (self.report)(ack_code(&ack));
    }
}

/// Wraps a [`MainCommand`] so it can ride the [`CommandQueue`] as a
/// `Command<Supervisor>`.
struct SupervisorCommand(MainCommand);

impl Command<Supervisor> for SupervisorCommand {
    fn run(self: Box<Self>, model: &mut Supervisor, acks: &dyn AckSink) {
        acks.ack(Ack::InProgress);
        match model.handle(self.0, Instant::now()) {
            Ok(()) => acks.ack(Ack::Complete),
            Err(kind) => acks.ack(Ack::NotPermitted(kind)),
        }
    }
}

pub const POLL_INTERVAL: Duration = Duration::from_micros(100);

/// Drives the external-command adapter thread (§4.F, §5 thread 2): polls
/// `surface` once per pass, translates accepted requests into
/// `MainCommand`s, and enqueues them on `queue`. Never touches supervisor
/// state directly.
pub struct ExternalCommandAdapter;

impl ExternalCommandAdapter {
    pub fn spawn(queue: CommandQueue<Supervisor>, mut surface: Box<dyn RpcSurface>) -> (Arc<AtomicBool>, JoinHandle<()>) {
        let running = Arc::new(AtomicBool::new(true));
        let running_loop = running.clone();
        let handle = thread::Builder::new()
            .name("external-command-adapter".to_string())
            .spawn(move || {
                while running_loop.load(Ordering::Acquire) {
                    match surface.poll() {
                        Some(pending) => match to_main_command(pending.kind, &pending.params) {
                            Ok(main_command) => {
                                let ack = pending.ack;
                                queue.enqueue(
                                    Box::new(SupervisorCommand(main_command)),
                                    Box::new(RpcAckSink { report: ack }),
                                );
                            }
                            Err(kind) => {
                                warn!("rpc: rejecting malformed request for {:?}: {kind}", pending.kind);
                                (pending.ack)(reject_code(kind));
                            }
                        },
                        None => thread::sleep(POLL_INTERVAL),
                    }
                }
            })
            .expect("failed to spawn external-command-adapter thread");
        (running, handle)
    }
}

/// Whether `state` currently accepts periodic `Update` ticks from the outer
/// loop (§4.G step 1) -- re-exported here since the adapter and the outer
/// loop share the same notion of "active".
pub fn is_active(state: MainState) -> bool {
    state.is_active()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedSurface {
        requests: Vec<(CommandKind, RpcParams)>,
        codes: Arc<Mutex<Vec<i32>>>,
    }

    impl RpcSurface for ScriptedSurface {
        fn poll(&mut self) -> Option<PendingRpcCommand> {
            let (kind, params) = self.requests.pop()?;
            let codes = self.codes.clone();
            Some(PendingRpcCommand {
                kind,
                params,
                ack: Box::new(move |code| codes.lock().unwrap().push(code)),
            })
        }
    }

    #[test]
    fn start_request_reaches_standby_from_offline_via_boot() {
        // The adapter can't boot the supervisor (boot isn't on the RPC
        // surface); exercise the translation layer directly instead.
        assert_eq!(to_main_command(CommandKind::Start, &RpcParams::None), Ok(MainCommand::Start));
    }

    #[test]
    fn mixing_valve_out_of_range_is_invalid_parameter() {
        let result = to_main_command(CommandKind::SetMixingValve, &RpcParams::Float(150.0));
        assert_eq!(result, Err(RejectKind::InvalidParameter));
    }

    #[test]
    fn ack_codes_match_the_wire_table() {
        assert_eq!(ack_code(&Ack::InProgress), 301);
        assert_eq!(ack_code(&Ack::Complete), 303);
        assert_eq!(ack_code(&Ack::Aborted), -303);
        assert_eq!(ack_code(&Ack::Failed("x".into())), -302);
        assert_eq!(ack_code(&Ack::NotPermitted(RejectKind::InvalidState)), -320);
        assert_eq!(ack_code(&Ack::NotPermitted(RejectKind::AlreadyInState)), -324);
    }

    #[test]
    fn legacy_aliases_resolve_to_the_same_kind() {
        assert_eq!(CommandKind::from_name("start"), CommandKind::from_name("enterControl"));
        assert_eq!(CommandKind::from_name("standby"), CommandKind::from_name("abort"));
        assert_eq!(CommandKind::from_name("setValue"), CommandKind::from_name("setMixingValve"));
    }

    #[test]
    fn adapter_translates_and_enqueues_a_request() {
        let (queue, handle) = CommandQueue::spawn(
            Supervisor::new(
                test_settings(),
                ts_interlock::InterlockSettings::default_layout(10),
                Instant::now(),
            ),
            "test-adapter-controller",
        );
        let codes = Arc::new(Mutex::new(Vec::new()));
        let surface = ScriptedSurface {
            requests: vec![(CommandKind::SetLogLevel, RpcParams::LogLevel(log::LevelFilter::Warn))],
            codes: codes.clone(),
        };
        let (running, adapter) = ExternalCommandAdapter::spawn(queue.clone(), Box::new(surface));
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Release);
        adapter.join().unwrap();
        drop(queue);
        handle.join().unwrap();
        assert_eq!(*codes.lock().unwrap(), vec![301, 303]);
    }

    fn test_settings() -> ts_settings::Settings {
        serde_yaml::from_str(
            r#"
flow_meter: { modbus_address: 3, poll_interval_ms: 1000, max_consecutive_failures: 5 }
glycol_pump: { modbus_address: 4, min_frequency_hz: 0.0, max_frequency_hz: 60.0, power_on_start: false }
mixing_valve:
  max_moving_time_ms: 10000
  minimal_move_percent: 5.0
  backlash_step_percent: 3.0
  in_position_tolerance_percent: 1.0
  commanded_calibration: { low_input: 0.0, low_output: 0.0, high_input: 100.0, high_output: 4095.0 }
  feedback_calibration: { low_input: 0.0, low_output: 0.0, high_input: 4095.0, high_output: 100.0 }
heaters: { unit_count: 4, max_pwm_percent: 100.0, heaters_setpoint_c: 12.0, control_interval_ms: 500 }
setpoint:
  default_glycol_setpoint_c: 5.0
  min_glycol_setpoint_c: -10.0
  max_glycol_setpoint_c: 30.0
  precision_c: 0.2
  timestep_s: 60
  mixing_valve_step_percent: 1.0
  saved_setpoint_path: /tmp/ts-rpc-test-setpoint.yaml
  max_saved_setpoint_age_s: 86400
fcu: { unit_count: 4, heartbeat_toggle_period: 10, auto_disable: true, failures_to_disable: 5 }
"#,
        )
        .unwrap()
    }
}
