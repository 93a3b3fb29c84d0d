//! Persistence for the operator-commanded setpoints (§3, §6), so a restart
//! of `thermald` doesn't silently fall back to stale defaults.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Setpoints {
    #[serde(rename = "Glycol")]
    pub glycol: f32,
    #[serde(rename = "Heaters")]
    pub heaters: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SavedSetpoint {
    #[serde(rename = "Date")]
    pub date: DateTime<Utc>,
    #[serde(rename = "Setpoints")]
    pub setpoints: Setpoints,
}

#[derive(Debug, thiserror::Error)]
pub enum SavedSetpointError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to serialize saved setpoint: {0}")]
    Serialize(serde_yaml::Error),
}

impl SavedSetpoint {
    pub fn new(glycol: f32, heaters: f32, date: DateTime<Utc>) -> Self {
        Self {
            date,
            setpoints: Setpoints { glycol, heaters },
        }
    }

    pub fn load(path: &Path) -> Result<Self, SavedSetpointError> {
        let text = std::fs::read_to_string(path).map_err(|source| SavedSetpointError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_yaml::from_str(&text).map_err(|source| SavedSetpointError::Yaml {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load a saved setpoint, discarding it (returning `None`) if it's too
    /// old, malformed, or not finite -- §3's "a saved snapshot older than
    /// `savedSetpointsMaxAge` seconds is discarded at load".
    pub fn load_if_fresh(path: &Path, now: DateTime<Utc>, max_age_s: i64) -> Option<Self> {
        let saved = Self::load(path).ok()?;
        if saved.is_too_old(now, max_age_s) || !saved.is_valid() {
            None
        } else {
            Some(saved)
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), SavedSetpointError> {
        let text = serde_yaml::to_string(self).map_err(SavedSetpointError::Serialize)?;
        std::fs::write(path, text).map_err(|source| SavedSetpointError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    /// Both fields must be finite -- an interrupted write or a corrupted
    /// file can leave a `NaN`/`inf` on disk.
    pub fn is_valid(&self) -> bool {
        self.setpoints.glycol.is_finite() && self.setpoints.heaters.is_finite()
    }

    /// A saved setpoint is too old to trust either if it's stale (more than
    /// `max_age_s` seconds old) or, symmetrically, if it claims to be from
    /// more than a second in the future -- a sign the system clock jumped
    /// backwards since it was written, not a setpoint worth restoring.
    pub fn is_too_old(&self, now: DateTime<Utc>, max_age_s: i64) -> bool {
        let diff = (now - self.date).num_seconds();
        diff > max_age_s || diff < -1
    }
}
