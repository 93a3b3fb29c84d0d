//! `thermald`: the mirror-cell thermal control engine's CLI entry point.
//! Wires together the five threads from §5 -- the controller, the
//! outer-loop scheduler, the external-command adapter, the console (the RPC
//! transport's stand-in), and the device polls -- and carries them through
//! to a clean shutdown once `exitControl` is accepted.

mod console;
mod logging;
mod rig;
mod tasks;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use ts_control::outer_loop::{OuterLoopScheduler, DEFAULT_TICK_INTERVAL};
use ts_devices::SimulatedBus;
use ts_interlock::InterlockSettings;
use ts_queue::{CommandQueue, NoopAckSink};
use ts_rpc::ExternalCommandAdapter;
use ts_settings::Settings;
use ts_supervisor::Supervisor;

use crate::console::StdinRpcSurface;
use crate::rig::{FcuRig, ThermocoupleReadout};
use crate::tasks::{
    spawn_device_threads, BootCommand, FlowMeterThreadConfig, GlycolPumpThreadConfig, GlycolThermocoupleThreadConfig, UpdateCommand,
};

/// §6's CLI surface: `-b`/`-c`/`-d`/`-f`/`-s`; `-h`/`--help` is clap's own.
#[derive(Parser, Debug)]
#[command(name = "thermald", about = "Mirror-cell primary thermal control engine", long_about = None)]
struct Cli {
    /// Run without console log.
    #[arg(short = 'b')]
    no_console_log: bool,

    /// Configuration root, resolved to `<root>/v1/<label>.yaml`.
    #[arg(short = 'c', value_name = "PATH", default_value = "/etc/thermald")]
    config_root: PathBuf,

    /// Increase debug verbosity; repeatable.
    #[arg(short = 'd', action = clap::ArgAction::Count)]
    debug: u8,

    /// Run without file log.
    #[arg(short = 'f')]
    no_file_log: bool,

    /// Increase RPC-bus debug verbosity; repeatable.
    #[arg(short = 's', action = clap::ArgAction::Count)]
    rpc_debug: u8,
}

fn level_from_count(count: u8) -> LevelFilter {
    match count {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let engine_level = level_from_count(cli.debug);
    let rpc_level = if cli.rpc_debug > 0 { level_from_count(cli.rpc_debug) } else { engine_level };
    let file_log_path = (!cli.no_file_log).then(|| PathBuf::from("/var/log/thermald.log"));
    logging::init(!cli.no_console_log, file_log_path.as_deref(), engine_level, rpc_level).context("failed to initialise logging")?;

    info!("thermald starting, config root {}", cli.config_root.display());

    let settings = Settings::load_label(&cli.config_root, "Default")
        .with_context(|| format!("failed to load settings from {}", cli.config_root.display()))?;
    let interlock_settings = InterlockSettings::default_layout(settings.fcu.heartbeat_toggle_period);

    let bus = Arc::new(Mutex::new(SimulatedBus::new()));
    let fcu_rig = Arc::new(Mutex::new(FcuRig::new(&settings.fcu)));
    let thermocouple = Arc::new(Mutex::new(ThermocoupleReadout::default()));

    let glycol_interval = Duration::from_secs(settings.setpoint.timestep_s);
    let mirror_loop_supply_weight = settings.setpoint.mirror_loop_supply_weight;

    let flow_meter_config = FlowMeterThreadConfig {
        unit: settings.flow_meter.modbus_address,
        max_consecutive_failures: settings.flow_meter.max_consecutive_failures,
        poll_interval: Duration::from_millis(settings.flow_meter.poll_interval_ms),
    };
    let glycol_pump_config = GlycolPumpThreadConfig {
        unit: settings.glycol_pump.modbus_address,
        max_consecutive_failures: settings.glycol_pump.max_consecutive_failures,
        poll_interval: Duration::from_millis(settings.glycol_pump.poll_interval_ms),
    };
    let glycol_thermocouple_config = GlycolThermocoupleThreadConfig {
        unit: settings.glycol_thermocouple.modbus_address,
        max_consecutive_failures: settings.glycol_thermocouple.max_consecutive_failures,
        poll_interval: Duration::from_millis(settings.glycol_thermocouple.poll_interval_ms),
    };

    let supervisor = Supervisor::new(settings, interlock_settings, Instant::now());
    let (queue, controller_handle) = CommandQueue::spawn(supervisor, "thermald-controller");

    let (device_running, device_handles) = spawn_device_threads(bus.clone(), thermocouple.clone(), flow_meter_config, glycol_pump_config, glycol_thermocouple_config);

    let mut scheduler = OuterLoopScheduler::new(queue.clone(), DEFAULT_TICK_INTERVAL);
    let glycol_handle = scheduler.glycol_task_handle();
    let shutdown = Arc::new(std::sync::atomic::AtomicBool::new(false));
    {
        let bus = bus.clone();
        let fcu_rig = fcu_rig.clone();
        let thermocouple = thermocouple.clone();
        let glycol_handle = glycol_handle.clone();
        let shutdown = shutdown.clone();
        scheduler.add_tick_command(Box::new(move || {
            Box::new(UpdateCommand {
                bus: bus.clone(),
                fcu_rig: fcu_rig.clone(),
                thermocouple: thermocouple.clone(),
                glycol_handle: glycol_handle.clone(),
                glycol_interval,
                mirror_loop_supply_weight,
                shutdown: shutdown.clone(),
            })
        }));
    }
    let (outer_loop_running, outer_loop_handle) = scheduler.spawn();

    let console_surface = StdinRpcSurface::spawn();
    let (adapter_running, adapter_handle) = ExternalCommandAdapter::spawn(queue.clone(), Box::new(console_surface));

    queue.enqueue(Box::new(BootCommand), Box::new(NoopAckSink));
    info!("thermald running; send \"start\" on stdin to begin");

    while !shutdown.load(Ordering::Acquire) {
        thread::sleep(Duration::from_millis(50));
    }
    info!("thermald shutting down");

    outer_loop_running.store(false, Ordering::Release);
    outer_loop_handle.join().expect("outer-loop thread panicked");

    adapter_running.store(false, Ordering::Release);
    adapter_handle.join().expect("external-command-adapter thread panicked");

    device_running.store(false, Ordering::Release);
    for handle in device_handles {
        handle.join().expect("device poll thread panicked");
    }

    queue.shutdown();
    drop(queue);
    controller_handle.join().expect("controller thread panicked");

    info!("thermald exited cleanly");
    Ok(())
}
