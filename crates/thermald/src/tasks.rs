//! Commands the binary itself enqueues onto the controller thread: the
//! one-shot boot, the 500ms `Update` tick, and the glycol-control task the
//! outer loop schedules on its own slower cadence. Also the periodic
//! device-poll threads (flow meter, pump VFD, glycol thermocouples) that
//! feed telemetry nobody but the glycol-control task (mirror loop average)
//! and the logs actually consume -- §7's "the supervisory state machine
//! never reads device data directly".

use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use ts_control::outer_loop::GlycolTaskHandle;
use ts_devices::flow_meter::FlowMeter;
use ts_devices::fpga::FpgaRegisters;
use ts_devices::pump_vfd::PumpVfd;
use ts_devices::thermocouple::{mirror_loop_average_c, GlycolThermocouple};
use ts_devices::SimulatedBus;
use ts_queue::{Ack, AckSink, Command};
use ts_supervisor::{MainCommand, Supervisor, SupervisorEvent, UpdateTick};

use crate::rig::{FcuRig, ThermocoupleReadout};

/// Runs once at process startup -- `boot` isn't on the RPC surface (§4.D).
pub struct BootCommand;

impl Command<Supervisor> for BootCommand {
    fn run(self: Box<Self>, model: &mut Supervisor, acks: &dyn AckSink) {
        match model.handle(MainCommand::Boot, Instant::now()) {
            Ok(()) => acks.ack(Ack::Complete),
            Err(kind) => acks.ack(Ack::NotPermitted(kind)),
        }
    }
}

/// Apply one [`SupervisorEvent`] to the hardware it broadcasts to. Runs on
/// the controller thread, inline with whatever command raised the event, so
/// two overlapping broadcasts can never race each other.
fn apply_event(event: SupervisorEvent, bus: &mut SimulatedBus, shutdown: &AtomicBool) {
    match event {
        SupervisorEvent::IlcModeChanged(state) => debug!("supervisor: broadcasting ILC mode {state:?}"),
        SupervisorEvent::FcuPowerChanged(on) => {
            if let Err(err) = FpgaRegisters::write_fcu_on(bus, on) {
                warn!("failed to write FCU power relay: {err}");
            }
        }
        SupervisorEvent::GlycolPumpPowerChanged(on) => {
            if let Err(err) = FpgaRegisters::write_coolant_pump_on(bus, on) {
                warn!("failed to write coolant pump power relay: {err}");
            }
        }
        SupervisorEvent::ProcessShutdownRequested => {
            shutdown.store(true, Ordering::Release);
        }
    }
}

/// The 500ms outer-loop tick (§4.G, §5 thread 3): reads the FPGA status
/// word, the valve's measured position, and every enabled FCU's absolute
/// temperature, hands them to the supervisor, then writes back whatever the
/// supervisor now wants commanded -- the heartbeat toggle, the valve demand,
/// and each heater/fan's duty cycle -- and applies any broadcasts the tick
/// (or an RPC command that landed since the last tick) raised.
pub struct UpdateCommand {
    pub bus: Arc<Mutex<SimulatedBus>>,
    pub fcu_rig: Arc<Mutex<FcuRig>>,
    pub thermocouple: Arc<Mutex<ThermocoupleReadout>>,
    pub glycol_handle: GlycolTaskHandle<Supervisor>,
    pub glycol_interval: Duration,
    pub mirror_loop_supply_weight: f64,
    pub shutdown: Arc<AtomicBool>,
}

impl Command<Supervisor> for UpdateCommand {
    fn run(self: Box<Self>, model: &mut Supervisor, acks: &dyn AckSink) {
        acks.ack(Ack::InProgress);

        let mut bus = self.bus.lock().unwrap();
        let raw_status = bus.read_status_word().unwrap_or(0);
        let valve_position_percent = FpgaRegisters::read_valve_position_percent(&mut *bus).unwrap_or(0.0) as f64;

        let mut rig = self.fcu_rig.lock().unwrap();
        let addresses: Vec<u8> = rig.inventory.enabled_addresses().collect();
        let mut fcu_absolute_temperatures_c = Vec::with_capacity(addresses.len());
        for addr in &addresses {
            let fcu_bus = &mut rig.buses[*addr as usize];
            match fcu_bus.poll_status(&mut *bus) {
                Ok(status_word) => {
                    let temperature = fcu_bus.read_absolute_temperature_c(&mut *bus).unwrap_or(f64::NAN);
                    rig.inventory.record_comm_success(*addr, status_word as u16, 0);
                    fcu_absolute_temperatures_c.push(temperature);
                }
                Err(err) => {
                    warn!("fcu {addr}: comm failure: {err}");
                    rig.inventory.record_comm_failure(*addr);
                    fcu_absolute_temperatures_c.push(f64::NAN);
                }
            }
        }

        let tick = UpdateTick {
            raw_status,
            valve_position_percent,
            fcu_absolute_temperatures_c,
        };
        match model.handle(MainCommand::Update(tick), Instant::now()) {
            Ok(()) => acks.ack(Ack::Complete),
            Err(kind) => acks.ack(Ack::NotPermitted(kind)),
        }

        for event in model.take_events() {
            apply_event(event, &mut bus, &self.shutdown);
        }

        if let Err(err) = FpgaRegisters::write_heartbeat(&mut bus, model.heartbeat_state()) {
            warn!("failed to write heartbeat register: {err}");
        }
        if let Err(err) = FpgaRegisters::write_valve_command_percent(&mut bus, model.valve_demand_percent() as f32) {
            warn!("failed to write valve command: {err}");
        }

        let enabled_addresses: Vec<u8> = rig.inventory.enabled_addresses().collect();
        for (addr, pwm_percent) in enabled_addresses.iter().zip(model.heater_pwm_percents()) {
            let fcu_bus = &rig.buses[*addr as usize];
            let raw = (255.0 * pwm_percent.clamp(0.0, 100.0) / 100.0).round() as u8;
            if let Err(err) = fcu_bus.write_heater_pwm(&mut bus, 0, raw) {
                warn!("fcu {addr}: failed to write heater pwm: {err}");
            }
            if let Err(err) = fcu_bus.write_fan_pwm(&mut bus, ts_control::fcu_control::FAN_TARGET_RAW) {
                warn!("fcu {addr}: failed to write fan pwm: {err}");
            }
            if let Err(err) = fcu_bus.write_heartbeat(&mut bus, model.heartbeat_state()) {
                warn!("fcu {addr}: failed to write heartbeat: {err}");
            }
        }
        drop(bus);
        drop(rig);

        // §4.G rule 2 / §9: schedule or cancel the glycol-control task to
        // track the supervisor's own notion of when it should be running,
        // without a second scheduling point.
        let wants_glycol = model.glycol_task_scheduled();
        let is_scheduled = self.glycol_handle.is_scheduled();
        if wants_glycol && !is_scheduled {
            let thermocouple = self.thermocouple.clone();
            let supply_weight = self.mirror_loop_supply_weight;
            self.glycol_handle.schedule(
                Box::new(move || {
                    Box::new(GlycolCommand {
                        thermocouple: thermocouple.clone(),
                        supply_weight,
                    }) as Box<dyn Command<Supervisor>>
                }),
                self.glycol_interval,
            );
        } else if !wants_glycol && is_scheduled {
            self.glycol_handle.cancel();
        }
    }
}

/// The glycol-temperature control task (§4.I), run on `setpoint.timestep_s`
/// cadence rather than every `Update` tick.
pub struct GlycolCommand {
    pub thermocouple: Arc<Mutex<ThermocoupleReadout>>,
    pub supply_weight: f64,
}

impl Command<Supervisor> for GlycolCommand {
    fn run(self: Box<Self>, model: &mut Supervisor, acks: &dyn AckSink) {
        acks.ack(Ack::InProgress);
        let channels = self.thermocouple.lock().unwrap().channels_c;
        let Some(channels) = channels else {
            acks.ack(Ack::Failed("no glycol thermocouple reading yet".into()));
            return;
        };
        let mirror_loop_average_c = mirror_loop_average_c(channels, self.supply_weight);
        match model.handle(MainCommand::RunGlycolControl(mirror_loop_average_c), Instant::now()) {
            Ok(()) => acks.ack(Ack::Complete),
            Err(kind) => acks.ack(Ack::NotPermitted(kind)),
        }
    }
}

/// Spawn the three independent device-poll threads (§5): flow meter, pump
/// VFD, glycol thermocouples. Each polls at its own cadence and only ever
/// publishes into shared, mutex-guarded state -- never back into the
/// supervisor directly.
pub struct FlowMeterThreadConfig {
    pub unit: u8,
    pub max_consecutive_failures: u32,
    pub poll_interval: Duration,
}

pub struct GlycolPumpThreadConfig {
    pub unit: u8,
    pub max_consecutive_failures: u32,
    pub poll_interval: Duration,
}

pub struct GlycolThermocoupleThreadConfig {
    pub unit: u8,
    pub max_consecutive_failures: u32,
    pub poll_interval: Duration,
}

pub fn spawn_device_threads(
    bus: Arc<Mutex<SimulatedBus>>,
    thermocouple: Arc<Mutex<ThermocoupleReadout>>,
    flow_meter: FlowMeterThreadConfig,
    glycol_pump: GlycolPumpThreadConfig,
    glycol_thermocouple: GlycolThermocoupleThreadConfig,
) -> (Arc<AtomicBool>, Vec<JoinHandle<()>>) {
    let running = Arc::new(AtomicBool::new(true));

    let flow_handle = {
        let bus = bus.clone();
        let running = running.clone();
        thread::Builder::new()
            .name("flow-meter-poll".to_string())
            .spawn(move || {
                let mut meter = FlowMeter::new(flow_meter.unit, flow_meter.max_consecutive_failures);
                while running.load(Ordering::Acquire) {
                    let mut bus = bus.lock().unwrap();
                    match meter.poll(&mut *bus) {
                        Ok(sample) => debug!("flow meter: {sample}"),
                        Err(err) => warn!("flow meter: {err}"),
                    }
                    drop(bus);
                    thread::sleep(flow_meter.poll_interval);
                }
            })
            .expect("failed to spawn flow-meter-poll thread")
    };

    let pump_handle = {
        let bus = bus.clone();
        let running = running.clone();
        thread::Builder::new()
            .name("pump-vfd-poll".to_string())
            .spawn(move || {
                let mut pump = PumpVfd::new(glycol_pump.unit, glycol_pump.max_consecutive_failures);
                while running.load(Ordering::Acquire) {
                    let mut bus = bus.lock().unwrap();
                    match pump.poll(&mut *bus) {
                        Ok(status) => debug!("glycol pump: running={} faulted={} freq={:.1}Hz", status.running, status.faulted, status.frequency_hz),
                        Err(err) => warn!("glycol pump: {err}"),
                    }
                    drop(bus);
                    thread::sleep(glycol_pump.poll_interval);
                }
            })
            .expect("failed to spawn pump-vfd-poll thread")
    };

    let thermocouple_handle = {
        let bus = bus.clone();
        let running = running.clone();
        thread::Builder::new()
            .name("glycol-thermocouple-poll".to_string())
            .spawn(move || {
                let mut tc = GlycolThermocouple::new(glycol_thermocouple.unit, glycol_thermocouple.max_consecutive_failures);
                while running.load(Ordering::Acquire) {
                    let mut bus = bus.lock().unwrap();
                    match tc.poll(&mut *bus) {
                        Ok(channels_c) => {
                            thermocouple.lock().unwrap().channels_c = Some(channels_c);
                        }
                        Err(err) => warn!("glycol thermocouple: {err}"),
                    }
                    drop(bus);
                    thread::sleep(glycol_thermocouple.poll_interval);
                }
            })
            .expect("failed to spawn glycol-thermocouple-poll thread")
    };

    (running, vec![flow_handle, pump_handle, thermocouple_handle])
}
