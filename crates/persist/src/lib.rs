//! Record/replay log: per-tick action and state values, batched to storage
//! and replayed frame by frame in recorded order.
//!
//! # Invariants
//! - Channels are registered once, before the first frame, and never change.
//! - Frames are written and read strictly in index order; none are skipped.
//! - A batch reaches storage in exactly one physical write.
//! - Logs with a different format version or a bad metadata digest are
//!   rejected at open; there is no best-effort replay.
//!
//! # Example
//!
//! ```no_run
//! use replaylog_persist::{Player, Recorder, RecorderConfig, Shape};
//!
//! # fn main() -> Result<(), replaylog_persist::LogError> {
//! let mut rec = Recorder::create("run.rlog", RecorderConfig::default());
//! rec.register_action("mock_action", Shape::Array(1))?;
//! rec.finalize_schema()?;
//! for _ in 0..3 {
//!     rec.set_value("mock_action", [1.0])?;
//!     rec.commit_frame()?;
//! }
//! rec.close()?;
//!
//! let mut player = Player::open("run.rlog")?;
//! while player.has_next_frame() {
//!     player.advance_frame()?;
//!     let _action = player.read_value("mock_action")?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod format;
pub mod player;
pub mod recorder;
pub mod schema;
pub mod sink;
pub mod value;

pub use error::LogError;
pub use format::{FORMAT_VERSION, LogHeader};
pub use player::{Player, PlayerConfig, PlayerState};
pub use recorder::{Recorder, RecorderConfig, RecorderStats, RecordingSummary};
pub use schema::{Channel, ChannelKind, FrozenSchema, SchemaBuilder, Shape};
pub use sink::LogSink;
pub use value::Value;
