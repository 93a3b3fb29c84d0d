//! Loaders for the thermal engine's on-disk configuration: per-subsystem
//! YAML documents, the persisted setpoints, and the mirror cell's air
//! nozzle table (§4.L, §6).
//!
//! The original's configuration root (`$CFG/v1/_init.yaml`) fans out into a
//! handful of sub-documents, one per subsystem; this workspace keeps that
//! division as Rust types but loads them from a single YAML document with
//! one top-level key per subsystem, which is the layout `thermald -c`
//! expects on disk.

pub mod nozzles;
pub mod saved_setpoint;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use ts_limits::Function;

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

fn load_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, SettingsError> {
    let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| SettingsError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct FlowMeterSettings {
    pub modbus_address: u8,
    pub poll_interval_ms: u64,
    pub max_consecutive_failures: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GlycolPumpSettings {
    pub modbus_address: u8,
    pub min_frequency_hz: f64,
    pub max_frequency_hz: f64,
    /// Whether the core should energize the pump as part of `start` (§4.D).
    pub power_on_start: bool,
    #[serde(default = "default_device_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_device_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

fn default_device_poll_interval_ms() -> u64 {
    1000
}

fn default_device_max_consecutive_failures() -> u32 {
    5
}

/// The glycol loop thermocouple unit's bus address and polling policy; not
/// present in the original's flat `_init.yaml` layout, which hardcodes the
/// unit address, but exposed here as configuration rather than a constant to
/// match how every other device in this tree is addressed.
#[derive(Debug, Clone, Deserialize)]
pub struct GlycolThermocoupleSettings {
    pub modbus_address: u8,
    #[serde(default = "default_device_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_device_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

impl Default for GlycolThermocoupleSettings {
    fn default() -> Self {
        Self {
            modbus_address: 7,
            poll_interval_ms: default_device_poll_interval_ms(),
            max_consecutive_failures: default_device_max_consecutive_failures(),
        }
    }
}

/// Two fixed points defining a linear map from one engineering unit to
/// another -- the original's commanded/feedback calibration is four fixed
/// points (two per map); each pair collapses to a single `Function::Linear`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CalibrationPoints {
    pub low_input: f64,
    pub low_output: f64,
    pub high_input: f64,
    pub high_output: f64,
}

impl CalibrationPoints {
    /// Fit `y = m*x + b` through the two configured points.
    pub fn to_linear(self) -> Function {
        let m = (self.high_output - self.low_output) / (self.high_input - self.low_input);
        let b = self.low_output - m * self.low_input;
        Function::Linear { m, b }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MixingValveSettings {
    /// Worst-case travel time end to end; a move that exceeds this is a
    /// timeout fault, not just a slow actuator.
    pub max_moving_time_ms: u64,
    pub minimal_move_percent: f64,
    pub backlash_step_percent: f64,
    pub in_position_tolerance_percent: f64,
    /// Percent-commanded -> raw-device-count calibration (two fixed
    /// points).
    pub commanded_calibration: CalibrationPoints,
    /// Raw-device-count -> percent-feedback calibration (two fixed points).
    pub feedback_calibration: CalibrationPoints,
}

impl MixingValveSettings {
    pub fn commanded_map(&self) -> Function {
        self.commanded_calibration.to_linear()
    }

    pub fn feedback_map(&self) -> Function {
        self.feedback_calibration.to_linear()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaterSettings {
    pub unit_count: usize,
    pub max_pwm_percent: f64,
    pub heaters_setpoint_c: f64,
    pub control_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetpointSettings {
    pub default_glycol_setpoint_c: f64,
    pub min_glycol_setpoint_c: f64,
    pub max_glycol_setpoint_c: f64,
    /// No valve adjustment while `|mirrorLoopAverage - setpoint|` is within
    /// this band (§4.I).
    pub precision_c: f64,
    /// Cadence of the glycol-temperature control task (§4.I); typically
    /// >= 60s.
    pub timestep_s: u64,
    pub mixing_valve_step_percent: f64,
    pub saved_setpoint_path: PathBuf,
    pub max_saved_setpoint_age_s: i64,
    /// Weight given to the mirror loop's supply-side thermocouple (vs. its
    /// return side) when computing `mirrorLoopAverage` for the
    /// glycol-control task (§4.I step 1, §9 open question); defaults to an
    /// even split when a settings document predates this field.
    #[serde(default = "default_mirror_loop_supply_weight")]
    pub mirror_loop_supply_weight: f64,
}

fn default_mirror_loop_supply_weight() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct FcuSettings {
    pub unit_count: usize,
    pub heartbeat_toggle_period: u32,
    /// Whether a unit whose comm failures exceed `failures_to_disable`
    /// gets auto-disabled (§4.K).
    pub auto_disable: bool,
    pub failures_to_disable: u32,
}

/// The full settings tree, loaded from one YAML file with a top-level key per
/// subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub flow_meter: FlowMeterSettings,
    pub glycol_pump: GlycolPumpSettings,
    #[serde(default)]
    pub glycol_thermocouple: GlycolThermocoupleSettings,
    pub mixing_valve: MixingValveSettings,
    pub heaters: HeaterSettings,
    pub setpoint: SetpointSettings,
    pub fcu: FcuSettings,
}

impl Settings {
    /// Load the settings document at `path`. The original resolves a
    /// label (typically `"Default"`) against `$CFG/v1/_init.yaml`; callers
    /// that need that indirection should resolve the label to a path
    /// themselves and pass it here.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        load_yaml(path)
    }

    /// Resolve a configuration label (e.g. `"Default"`) to its path under a
    /// configuration root, matching `$CFG/v1/<label>.yaml`.
    pub fn path_for_label(config_root: &Path, label: &str) -> PathBuf {
        config_root.join("v1").join(format!("{label}.yaml"))
    }

    pub fn load_label(config_root: &Path, label: &str) -> Result<Self, SettingsError> {
        Self::load(&Self::path_for_label(config_root, label))
    }
}
