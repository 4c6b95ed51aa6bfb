use crate::schema::Shape;

/// Errors from recording or replaying a log.
///
/// Schema errors are programmer errors and are never worth retrying. `Io`
/// during a flush leaves the pending batch intact, so [`crate::Recorder::flush`]
/// can be called again. Format errors are raised only when a log is opened.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("channel `{0}` is already registered")]
    DuplicateChannel(String),
    #[error("cannot register `{0}`: the schema is frozen")]
    SchemaFrozen(String),
    #[error("schema has already been finalized")]
    SchemaAlreadyFinalized,
    #[error("schema has not been finalized yet")]
    SchemaNotFinalized,
    #[error("cannot finalize a schema with no channels")]
    EmptySchema,
    #[error("invalid channel `{path}`: {reason}")]
    InvalidChannel { path: String, reason: String },
    #[error("invalid recorder config: {0}")]
    InvalidConfig(String),
    #[error("unknown channel `{0}`")]
    UnknownChannel(String),
    #[error("shape mismatch for `{path}`: channel is {expected}, value is {actual}")]
    ShapeMismatch {
        path: String,
        expected: Shape,
        actual: Shape,
    },
    #[error("corrupt log: {0}")]
    CorruptLog(String),
    #[error("unsupported log format: file is v{found}, reader supports v{supported}")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("end of log: all {frame_count} frames have been read")]
    EndOfLog { frame_count: u64 },
    #[error("no current frame: advance_frame has not been called")]
    NoCurrentFrame,
    #[error("recorder is poisoned by an earlier storage failure")]
    Poisoned,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CBOR serialization error: {0}")]
    CborEncode(String),
}
