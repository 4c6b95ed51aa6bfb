//! Session settings carried inside a recording.
//!
//! The log treats these as an opaque blob; the driving loop serializes them
//! to JSON at save time and rebuilds a matching simulation from them before
//! replay starts.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current settings schema version.
const SETTINGS_VERSION: u32 = 1;

/// Errors from loading or decoding session settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("settings version mismatch: blob has v{found}, expected v{expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

/// Everything needed to rebuild the simulation a recording was made against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub version: u32,
    /// Seed for the simulation's deterministic jitter.
    pub seed: u64,
    /// Number of bodies spawned at startup.
    pub body_count: u32,
    /// Fixed step in seconds.
    pub timestep: f32,
    /// Gravity along -z, m/s².
    pub gravity: f32,
    /// Velocity retained after a ground bounce.
    pub restitution: f32,
    /// Free-form label, e.g. the scene the run was recorded in.
    pub label: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            seed: 42,
            body_count: 4,
            timestep: 1.0 / 90.0,
            gravity: 9.81,
            restitution: 0.5,
            label: String::from("default"),
        }
    }
}

impl SessionSettings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_reader(std::fs::File::open(path)?)?;
        settings.check_version()?;
        Ok(settings)
    }

    /// Encode as the opaque blob stored in a log header.
    pub fn to_blob(&self) -> Result<Vec<u8>, SettingsError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode from a blob previously produced by [`SessionSettings::to_blob`].
    pub fn from_blob(blob: &[u8]) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_slice(blob)?;
        settings.check_version()?;
        Ok(settings)
    }

    fn check_version(&self) -> Result<(), SettingsError> {
        if self.version != SETTINGS_VERSION {
            return Err(SettingsError::VersionMismatch {
                found: self.version,
                expected: SETTINGS_VERSION,
            });
        }
        Ok(())
    }
}
