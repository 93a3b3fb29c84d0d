//! The supervisory state machine (§4.D). Owns every other subsystem
//! (interlock, settings, the periodic control tasks) and is the only thing
//! that mutates any of them -- everything arrives here as a [`MainCommand`]
//! run on the single controller thread.

use log::{info, warn};
use ts_control::fcu_control::HeaterChannel;
use ts_control::glycol_control::{GlycolControlConfig, GlycolTemperatureControl, INITIAL_VALVE_POSITION_PERCENT};
use ts_control::mixing_valve::{MixingValveConfig, MixingValveController, ValveState};
use ts_interlock::{InterlockSettings, InterlockState, InterlockSystem};
use ts_queue::RejectKind;
use ts_settings::Settings;
use std::time::{Duration, Instant};

/// Supervisory states. Numbered explicitly because the external RPC layer
/// reports the raw discriminant over the wire, not the variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MainState {
    Offline = 0,
    Standby = 1,
    Disabled = 2,
    Enabled = 3,
    Engineering = 4,
    Fault = 5,
}

impl MainState {
    /// §4.G: "active" states the outer loop keeps ticking `Update` into.
    pub fn is_active(self) -> bool {
        matches!(self, MainState::Disabled | MainState::Enabled | MainState::Engineering)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MainCommand {
    /// Offline -> Standby. The RPC surface doesn't expose this directly;
    /// it runs once at process startup.
    Boot,
    /// Standby -> Disabled.
    Start,
    /// {Disabled, Enabled, Engineering, Fault} -> Standby.
    Standby,
    /// Standby -> Offline, shutdown.
    ExitControl,
    /// Disabled -> Enabled.
    Enable,
    /// Enabled -> Disabled.
    Disable,
    EnterEngineering,
    ExitEngineering,
    SetLogLevel(log::LevelFilter),
    ApplySetpoint { glycol_c: f64, heaters_c: f64 },
    SetMixingValve(f64),
    CoolantPumpPower(bool),
    CoolantPumpStart,
    CoolantPumpStop,
    CoolantPumpSetFrequency(f64),
    CoolantPumpReset,
    HeaterFanDemand(f64),
    /// Periodic tick carrying the latest device telemetry (§4.G's `Update`
    /// command, 500 ms cadence): the raw interlock status word, the mixing
    /// valve's measured position, and each enabled FCU's measured absolute
    /// temperature, in inventory order.
    Update(UpdateTick),
    /// The glycol-temperature control task (§4.I), on its own `timestep_s`
    /// cadence (typically >= 60s) rather than every `Update` tick -- scheduled
    /// and unscheduled by the outer loop per §4.G rule 2, never folded into
    /// `Update` (§9's resolved "single point of control"). Carries the
    /// mirror loop's weighted-average temperature.
    RunGlycolControl(f64),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateTick {
    pub raw_status: u64,
    pub valve_position_percent: f64,
    pub fcu_absolute_temperatures_c: Vec<f64>,
}

/// Something the supervisor wants broadcast to the FCU bus / glycol pump as
/// a result of the last command, mirroring §4.D's cascaded broadcasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    IlcModeChanged(MainState),
    FcuPowerChanged(bool),
    GlycolPumpPowerChanged(bool),
    ProcessShutdownRequested,
}

pub struct Supervisor {
    state: MainState,
    interlock: InterlockSystem,
    settings: Settings,
    glycol: GlycolTemperatureControl,
    glycol_scheduled: bool,
    valve: MixingValveController,
    heater_channels: Vec<HeaterChannel>,
    heaters_setpoint_c: f64,
    coolant_pump_frequency_hz: f64,
    pending_events: Vec<SupervisorEvent>,
    heartbeat_state: bool,
}

impl Supervisor {
    pub fn new(settings: Settings, interlock_settings: InterlockSettings, now: Instant) -> Self {
        let glycol = GlycolTemperatureControl::new(
            GlycolControlConfig {
                step_percent: settings.setpoint.mixing_valve_step_percent,
                precision_c: settings.setpoint.precision_c,
            },
            settings.setpoint.default_glycol_setpoint_c,
            INITIAL_VALVE_POSITION_PERCENT,
        );
        let valve = MixingValveController::new(
            MixingValveConfig {
                max_moving_time: Duration::from_millis(settings.mixing_valve.max_moving_time_ms),
                minimal_move_percent: settings.mixing_valve.minimal_move_percent,
                backlash_step_percent: settings.mixing_valve.backlash_step_percent,
                in_position_tolerance_percent: settings.mixing_valve.in_position_tolerance_percent,
            },
            0.0,
            now,
        );
        let heater_channels = (0..settings.heaters.unit_count).map(|_| HeaterChannel::new()).collect();
        let heaters_setpoint_c = settings.heaters.heaters_setpoint_c;

        Self {
            state: MainState::Offline,
            interlock: InterlockSystem::new(interlock_settings),
            settings,
            glycol,
            glycol_scheduled: false,
            valve,
            heater_channels,
            heaters_setpoint_c,
            coolant_pump_frequency_hz: 0.0,
            pending_events: Vec::new(),
            heartbeat_state: false,
        }
    }

    pub fn state(&self) -> MainState {
        self.state
    }

    pub fn interlock_state(&self) -> InterlockState {
        self.interlock.state()
    }

    pub fn valve_state(&self) -> ValveState {
        self.valve.state()
    }

    /// Whether the glycol-temperature control task should currently be
    /// ticked by the outer loop -- §4.G's "ensure scheduled"/"ensure
    /// removed" without a second, duplicate scheduling point (§9 open
    /// question, resolved in `SPEC_FULL.md` §12).
    pub fn glycol_task_scheduled(&self) -> bool {
        self.glycol_scheduled
    }

    /// Drain events raised by the most recent command (FCU broadcasts, etc).
    pub fn take_events(&mut self) -> Vec<SupervisorEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn transition(&mut self, new_state: MainState) {
        info!("supervisor: {:?} -> {:?}", self.state, new_state);
        self.state = new_state;
        self.pending_events.push(SupervisorEvent::IlcModeChanged(new_state));
        self.update_glycol_scheduling();
    }

    /// §4.G rule 2: schedule the glycol task exactly when `Enabled` (and not
    /// bypassed by Engineering); remove it otherwise.
    fn update_glycol_scheduling(&mut self) {
        self.glycol_scheduled = self.state == MainState::Enabled;
    }

    /// Dispatch one command. `setLogLevel` is legal in every state including
    /// `Fault`; everything else is gated by the current state's legal
    /// command set.
    pub fn handle(&mut self, command: MainCommand, now: Instant) -> Result<(), RejectKind> {
        if let MainCommand::SetLogLevel(level) = command {
            log::set_max_level(level);
            info!("supervisor: log level set to {level}");
            return Ok(());
        }

        match self.state {
            MainState::Offline => self.handle_offline(command),
            MainState::Standby => self.handle_standby(command),
            MainState::Disabled => self.handle_disabled(command, now),
            MainState::Enabled => self.handle_enabled(command, now),
            MainState::Engineering => self.handle_engineering(command, now),
            MainState::Fault => self.handle_fault(command),
        }
    }

    fn handle_offline(&mut self, command: MainCommand) -> Result<(), RejectKind> {
        match command {
            MainCommand::Boot => {
                self.transition(MainState::Standby);
                Ok(())
            }
            _ => Err(RejectKind::InvalidState),
        }
    }

    fn handle_standby(&mut self, command: MainCommand) -> Result<(), RejectKind> {
        match command {
            MainCommand::Standby => Err(RejectKind::AlreadyInState),
            MainCommand::Start => {
                // §4.D: on start, (re)load configuration and cascade the
                // interlock into Disabled.
                self.interlock.start().map_err(|_| RejectKind::InvalidState)?;
                if self.settings.glycol_pump.power_on_start {
                    self.pending_events.push(SupervisorEvent::GlycolPumpPowerChanged(true));
                }
                self.pending_events.push(SupervisorEvent::FcuPowerChanged(false));
                self.transition(MainState::Disabled);
                Ok(())
            }
            MainCommand::ExitControl => {
                self.pending_events.push(SupervisorEvent::ProcessShutdownRequested);
                self.transition(MainState::Offline);
                Ok(())
            }
            _ => Err(RejectKind::InvalidState),
        }
    }

    fn handle_disabled(&mut self, command: MainCommand, _now: Instant) -> Result<(), RejectKind> {
        match command {
            MainCommand::Standby => {
                self.interlock.standby().map_err(|_| RejectKind::InvalidState)?;
                self.transition(MainState::Standby);
                Ok(())
            }
            MainCommand::Enable => {
                self.pending_events.push(SupervisorEvent::FcuPowerChanged(true));
                self.transition(MainState::Enabled);
                Ok(())
            }
            MainCommand::ApplySetpoint { glycol_c, heaters_c } => self.apply_setpoint(glycol_c, heaters_c),
            MainCommand::Update(tick) => {
                self.run_interlock_tick(tick.raw_status);
                Ok(())
            }
            _ => Err(RejectKind::InvalidState),
        }
    }

    fn handle_enabled(&mut self, command: MainCommand, now: Instant) -> Result<(), RejectKind> {
        match command {
            MainCommand::Standby => {
                self.interlock.standby().map_err(|_| RejectKind::InvalidState)?;
                self.transition(MainState::Standby);
                Ok(())
            }
            MainCommand::Disable => {
                self.pending_events.push(SupervisorEvent::FcuPowerChanged(false));
                self.pending_events.push(SupervisorEvent::GlycolPumpPowerChanged(false));
                self.transition(MainState::Disabled);
                Ok(())
            }
            MainCommand::EnterEngineering => {
                self.transition(MainState::Engineering);
                Ok(())
            }
            MainCommand::ApplySetpoint { glycol_c, heaters_c } => self.apply_setpoint(glycol_c, heaters_c),
            MainCommand::Update(tick) => {
                self.run_control_tick(tick, now);
                Ok(())
            }
            MainCommand::RunGlycolControl(mirror_loop_average_c) => {
                self.run_glycol_tick(mirror_loop_average_c, now);
                Ok(())
            }
            _ => Err(RejectKind::InvalidState),
        }
    }

    /// Engineering-only commands are routed explicitly here, one arm per
    /// SAL entry point (§9 open question); everything not named falls
    /// through to `InvalidState`, including commands legal in other states.
    fn handle_engineering(&mut self, command: MainCommand, now: Instant) -> Result<(), RejectKind> {
        match command {
            MainCommand::Standby => {
                self.interlock.standby().map_err(|_| RejectKind::InvalidState)?;
                self.transition(MainState::Standby);
                Ok(())
            }
            MainCommand::ExitEngineering => {
                self.transition(MainState::Enabled);
                Ok(())
            }
            MainCommand::SetMixingValve(target_percent) => {
                self.valve.set_target(target_percent, now);
                Ok(())
            }
            MainCommand::CoolantPumpPower(on) => {
                self.pending_events.push(SupervisorEvent::GlycolPumpPowerChanged(on));
                Ok(())
            }
            MainCommand::CoolantPumpStart | MainCommand::CoolantPumpStop => Ok(()),
            MainCommand::CoolantPumpSetFrequency(hz) => {
                self.coolant_pump_frequency_hz = hz.max(0.0);
                Ok(())
            }
            MainCommand::CoolantPumpReset => Ok(()),
            MainCommand::HeaterFanDemand(pwm_percent) => {
                for channel in &mut self.heater_channels {
                    channel.set_demand(pwm_percent);
                }
                Ok(())
            }
            MainCommand::Update(tick) => {
                self.run_control_tick(tick, now);
                Ok(())
            }
            _ => Err(RejectKind::InvalidState),
        }
    }

    fn handle_fault(&mut self, command: MainCommand) -> Result<(), RejectKind> {
        match command {
            MainCommand::Standby => {
                self.interlock.standby().map_err(|_| RejectKind::InvalidState)?;
                self.transition(MainState::Standby);
                Ok(())
            }
            _ => Err(RejectKind::InvalidState),
        }
    }

    fn apply_setpoint(&mut self, glycol_c: f64, heaters_c: f64) -> Result<(), RejectKind> {
        if !glycol_c.is_finite() || !heaters_c.is_finite() {
            return Err(RejectKind::InvalidParameter);
        }
        let clamped = glycol_c.clamp(
            self.settings.setpoint.min_glycol_setpoint_c,
            self.settings.setpoint.max_glycol_setpoint_c,
        );
        self.glycol.set_applied_setpoint_c(clamped);
        self.heaters_setpoint_c = heaters_c;
        Ok(())
    }

    fn run_interlock_tick(&mut self, raw_status: u64) {
        self.heartbeat_state = self.interlock.tick_heartbeat();
        if self.interlock.update(raw_status) == InterlockState::Fault {
            warn!("supervisor: interlock faulted while disabled");
            self.transition(MainState::Fault);
        }
    }

    /// §4.G's `Update` command body, restricted to the pieces this crate
    /// owns (the interlock tick, the mixing-valve fine-control step, and the
    /// per-FCU heater step). FCU polling, telemetry publication, and the
    /// flow-meter/pump-VFD polls are device-thread concerns outside the
    /// supervisor's reach (§7: "the supervisory state machine never reads
    /// device data directly"). The glycol-temperature control task runs on
    /// its own, slower cadence -- see `run_glycol_tick`, not here.
    fn run_control_tick(&mut self, tick: UpdateTick, now: Instant) {
        self.run_interlock_tick(tick.raw_status);
        if self.state == MainState::Fault {
            return;
        }

        let _ = self.valve.get_target(tick.valve_position_percent, now);
        if self.valve.state() == ValveState::Faulted {
            warn!("supervisor: mixing valve faulted, escalating to Fault");
            self.transition(MainState::Fault);
        }

        for (channel, &temperature_c) in self.heater_channels.iter_mut().zip(tick.fcu_absolute_temperatures_c.iter()) {
            if temperature_c.is_finite() {
                channel.step(temperature_c, self.heaters_setpoint_c);
            }
        }
    }

    /// §4.I's glycol-temperature control task, run on its own
    /// `setpoint.timestep_s` cadence by the command the outer loop's
    /// `GlycolTaskHandle` schedules while `Enabled` -- never folded into the
    /// 500 ms `Update` tick (§9's resolved duplicate-scheduling question).
    fn run_glycol_tick(&mut self, mirror_loop_average_c: f64, now: Instant) {
        if !mirror_loop_average_c.is_finite() {
            return;
        }
        let new_position = self.glycol.step(mirror_loop_average_c);
        self.valve.set_target(new_position, now);
    }

    /// The mixing valve's most recently commanded demand, in percent --
    /// what the caller should command the FPGA to next after an `Update`
    /// tick (§4.H: "caller converts percent -> device-commanded via the
    /// configured linear mapping").
    pub fn valve_demand_percent(&self) -> f64 {
        self.valve.target_percent()
    }

    /// Each heater channel's current commanded duty cycle, in inventory
    /// order, for the caller to push onto the FCU bus.
    pub fn heater_pwm_percents(&self) -> Vec<f64> {
        self.heater_channels.iter().map(|c| c.pwm_percent()).collect()
    }

    /// The heartbeat toggle's state after the most recent `Update` tick, for
    /// the caller to write onto the FPGA's heartbeat register.
    pub fn heartbeat_state(&self) -> bool {
        self.heartbeat_state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
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
  saved_setpoint_path: /tmp/setpoint.yaml
  max_saved_setpoint_age_s: 86400
fcu: { unit_count: 4, heartbeat_toggle_period: 10, auto_disable: true, failures_to_disable: 5 }
"#,
        )
        .unwrap()
    }

    fn interlock_settings() -> InterlockSettings {
        InterlockSettings::default_layout(10)
    }

    fn tick(raw_status: u64) -> MainCommand {
        MainCommand::Update(UpdateTick {
            raw_status,
            valve_position_percent: 0.0,
            fcu_absolute_temperatures_c: Vec::new(),
        })
    }

    #[test]
    fn full_startup_sequence() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        assert_eq!(sup.state(), MainState::Offline);
        sup.handle(MainCommand::Boot, now).unwrap();
        assert_eq!(sup.state(), MainState::Standby);
        sup.handle(MainCommand::Start, now).unwrap();
        assert_eq!(sup.state(), MainState::Disabled);
        sup.handle(MainCommand::Enable, now).unwrap();
        assert_eq!(sup.state(), MainState::Enabled);
        assert!(sup.glycol_task_scheduled());
        sup.handle(MainCommand::Disable, now).unwrap();
        sup.handle(MainCommand::Standby, now).unwrap();
        sup.handle(MainCommand::ExitControl, now).unwrap();
        assert_eq!(sup.state(), MainState::Offline);
    }

    #[test]
    fn engineering_only_commands_rejected_elsewhere() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        sup.handle(MainCommand::Start, now).unwrap();
        sup.handle(MainCommand::Enable, now).unwrap();
        let result = sup.handle(MainCommand::SetMixingValve(50.0), now);
        assert_eq!(result, Err(RejectKind::InvalidState));
    }

    #[test]
    fn interlock_fault_cascades_to_main_fault() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        sup.handle(MainCommand::Start, now).unwrap();
        // clear bit for gisEarthquake (bit 22, the 7th condition)
        sup.handle(tick(0x01BF0000), now).unwrap();
        assert_eq!(sup.state(), MainState::Fault);
    }

    #[test]
    fn set_log_level_is_legal_in_any_state() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        assert!(sup
            .handle(MainCommand::SetLogLevel(log::LevelFilter::Debug), now)
            .is_ok());
    }

    #[test]
    fn standby_returns_fault_to_standby() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        sup.handle(MainCommand::Start, now).unwrap();
        sup.handle(tick(0x01BF0000), now).unwrap();
        assert_eq!(sup.state(), MainState::Fault);
        sup.handle(MainCommand::Standby, now).unwrap();
        assert_eq!(sup.state(), MainState::Standby);
    }

    #[test]
    fn command_in_wrong_state_is_rejected_without_mutation() {
        // S6: submit `enable` while Standby.
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        let result = sup.handle(MainCommand::Enable, now);
        assert_eq!(result, Err(RejectKind::InvalidState));
        assert_eq!(sup.state(), MainState::Standby);
    }

    #[test]
    fn glycol_scheduling_follows_enabled_only() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        sup.handle(MainCommand::Start, now).unwrap();
        assert!(!sup.glycol_task_scheduled());
        sup.handle(MainCommand::Enable, now).unwrap();
        assert!(sup.glycol_task_scheduled());
        sup.handle(MainCommand::EnterEngineering, now).unwrap();
        assert!(!sup.glycol_task_scheduled());
    }

    #[test]
    fn update_tick_steps_heaters_while_enabled() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        sup.handle(MainCommand::Start, now).unwrap();
        sup.handle(MainCommand::Enable, now).unwrap();

        sup.handle(
            MainCommand::Update(UpdateTick {
                raw_status: 0,
                valve_position_percent: sup.valve_demand_percent(),
                fcu_absolute_temperatures_c: vec![0.0, 0.0, 0.0, 0.0],
            }),
            now,
        )
        .unwrap();

        assert!(sup.heater_pwm_percents().iter().all(|&p| p > 0.0), "heaters should ramp up against a cold FCU reading");
    }

    #[test]
    fn run_glycol_control_steps_the_valve_on_its_own_cadence() {
        let now = Instant::now();
        let mut sup = Supervisor::new(settings(), interlock_settings(), now);
        sup.handle(MainCommand::Boot, now).unwrap();
        sup.handle(MainCommand::Start, now).unwrap();
        sup.handle(MainCommand::Enable, now).unwrap();

        let before = sup.valve_demand_percent();
        sup.handle(MainCommand::RunGlycolControl(40.0), now).unwrap();
        assert!(sup.valve_demand_percent() > before, "glycol control should drive the valve open against a warm loop");

        // Not part of the fast Update tick: a plain Update must not also
        // perturb the valve's glycol-driven demand.
        let after_glycol = sup.valve_demand_percent();
        sup.handle(
            MainCommand::Update(UpdateTick {
                raw_status: 0,
                valve_position_percent: after_glycol,
                fcu_absolute_temperatures_c: Vec::new(),
            }),
            now,
        )
        .unwrap();
        assert_eq!(sup.valve_demand_percent(), after_glycol);
    }
}
