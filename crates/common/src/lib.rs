//! Shared types for the replaylog workspace.

pub mod settings;
pub mod types;

pub use settings::{SessionSettings, SettingsError};
pub use types::{BodyId, Pose};
