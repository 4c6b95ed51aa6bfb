//! Write side of a log: buffers frames and flushes them in fixed-size batches.

use crate::error::LogError;
use crate::format;
use crate::schema::{ChannelKind, FrozenSchema, SchemaBuilder, Shape};
use crate::sink::LogSink;
use crate::value::Value;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Recorder configuration.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Frames buffered before one physical write.
    pub frames_before_write: u32,
    /// Trace every committed frame.
    pub log_status: bool,
    /// Opaque configuration blob stored in the header for replay.
    pub settings: Vec<u8>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            frames_before_write: 200, // ~2s at 90 fps
            log_status: false,
            settings: Vec::new(),
        }
    }
}

/// Running counters for instrumentation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub frames_committed: u64,
    /// Frames that have reached storage.
    pub frames_durable: u64,
    /// Physical batch writes; the metadata write is not counted.
    pub batches_written: u64,
    /// All bytes written, metadata included.
    pub bytes_written: u64,
}

/// Returned by a successful close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordingSummary {
    pub frame_count: u64,
    pub batches_written: u64,
    pub bytes_written: u64,
}

enum RecorderState<S: LogSink> {
    Setup { builder: SchemaBuilder, sink: S },
    Recording(ActiveLog<S::Handle>),
    /// Closed, or a storage failure during finalize took the sink.
    Poisoned,
}

struct ActiveLog<W> {
    writer: W,
    schema: Arc<FrozenSchema>,
    /// In-progress frame; carries forward into the next one after commit.
    current: Vec<f64>,
    batch: Vec<u8>,
    batch_frames: u32,
    data_offset: u64,
}

impl<W: Write + Seek> ActiveLog<W> {
    /// One physical write of the pending batch at its fixed file position.
    /// On failure the batch and the durable count are left untouched.
    fn flush_batch(&mut self, stats: &mut RecorderStats) -> Result<(), LogError> {
        if self.batch_frames == 0 {
            return Ok(());
        }
        let _span = tracing::info_span!("log_flush", frames = self.batch_frames).entered();
        let offset = self.data_offset + stats.frames_durable * self.schema.stride() as u64;
        self.writer.seek(SeekFrom::Start(offset))?;
        self.writer.write_all(&self.batch)?;
        self.writer.flush()?;

        stats.batches_written += 1;
        stats.bytes_written += self.batch.len() as u64;
        stats.frames_durable += u64::from(self.batch_frames);
        tracing::debug!(
            frames = self.batch_frames,
            bytes = self.batch.len(),
            durable = stats.frames_durable,
            "batch written"
        );
        self.batch.clear();
        self.batch_frames = 0;
        Ok(())
    }
}

/// Records named action/state values once per simulation tick.
///
/// Lifecycle: register channels, [`finalize_schema`](Self::finalize_schema),
/// then per tick [`set_value`](Self::set_value) and
/// [`commit_frame`](Self::commit_frame), and finally [`close`](Self::close).
///
/// A channel not set during a tick carries its previous committed value
/// forward; before its first set it holds the shape default.
///
/// A recorder dropped after finalize without `close()` flushes what it can
/// and logs a warning.
pub struct Recorder<S: LogSink> {
    config: RecorderConfig,
    state: RecorderState<S>,
    stats: RecorderStats,
}

impl Recorder<PathBuf> {
    /// Recorder that will create the file at `path` when the schema is finalized.
    pub fn create(path: impl AsRef<Path>, config: RecorderConfig) -> Self {
        Self::new(path.as_ref().to_path_buf(), config)
    }
}

impl<S: LogSink> Recorder<S> {
    pub fn new(sink: S, config: RecorderConfig) -> Self {
        Self {
            config,
            state: RecorderState::Setup {
                builder: SchemaBuilder::new(),
                sink,
            },
            stats: RecorderStats::default(),
        }
    }

    /// Declare a channel. Only valid before [`finalize_schema`](Self::finalize_schema).
    pub fn register_channel(
        &mut self,
        path: impl Into<String>,
        shape: Shape,
        kind: ChannelKind,
    ) -> Result<(), LogError> {
        match &mut self.state {
            RecorderState::Setup { builder, .. } => builder.register(path, shape, kind),
            RecorderState::Recording(_) => Err(LogError::SchemaFrozen(path.into())),
            RecorderState::Poisoned => Err(LogError::Poisoned),
        }
    }

    pub fn register_action(&mut self, path: impl Into<String>, shape: Shape) -> Result<(), LogError> {
        self.register_channel(path, shape, ChannelKind::Action)
    }

    pub fn register_state(&mut self, path: impl Into<String>, shape: Shape) -> Result<(), LogError> {
        self.register_channel(path, shape, ChannelKind::State)
    }

    /// Freeze the schema, acquire storage and write the metadata block.
    ///
    /// Schema and config errors leave the recorder in setup. A storage
    /// failure poisons it.
    pub fn finalize_schema(&mut self) -> Result<(), LogError> {
        match &self.state {
            RecorderState::Setup { builder, .. } => {
                if builder.is_empty() {
                    return Err(LogError::EmptySchema);
                }
                if self.config.frames_before_write == 0 {
                    return Err(LogError::InvalidConfig(
                        "frames_before_write must be at least 1".into(),
                    ));
                }
            }
            RecorderState::Recording(_) => return Err(LogError::SchemaAlreadyFinalized),
            RecorderState::Poisoned => return Err(LogError::Poisoned),
        }
        let RecorderState::Setup { builder, sink } =
            std::mem::replace(&mut self.state, RecorderState::Poisoned)
        else {
            return Err(LogError::Poisoned);
        };

        let schema = Arc::new(builder.freeze()?);
        let mut writer = sink.acquire()?;
        let data_offset = format::write_metadata(
            &mut writer,
            &schema,
            self.config.frames_before_write,
            &self.config.settings,
        )?;
        self.stats.bytes_written += data_offset;

        tracing::info!(
            channels = schema.channels().len(),
            frame_width = schema.frame_width(),
            frames_before_write = self.config.frames_before_write,
            "log schema finalized"
        );
        let capacity = (self.config.frames_before_write as usize * schema.stride()).min(1 << 20);
        self.state = RecorderState::Recording(ActiveLog {
            writer,
            current: schema.default_frame(),
            schema,
            batch: Vec::with_capacity(capacity),
            batch_frames: 0,
            data_offset,
        });
        Ok(())
    }

    /// Store `value` for `path` in the in-progress frame.
    pub fn set_value(&mut self, path: &str, value: impl Into<Value>) -> Result<(), LogError> {
        let active = self.active_mut()?;
        let value = value.into();
        let (offset, channel) = active.schema.slot(path)?;
        if channel.shape != value.shape() {
            return Err(LogError::ShapeMismatch {
                path: path.to_string(),
                expected: channel.shape,
                actual: value.shape(),
            });
        }
        let width = channel.shape.width();
        active.current[offset..offset + width].copy_from_slice(value.slots());
        Ok(())
    }

    /// Close the in-progress frame and append it to the batch, writing the
    /// batch once it holds `frames_before_write` frames.
    ///
    /// If that write fails the frame stays committed in the batch; call
    /// [`flush`](Self::flush) or [`close`](Self::close) to retry.
    pub fn commit_frame(&mut self) -> Result<u64, LogError> {
        let frames_before_write = self.config.frames_before_write;
        let log_status = self.config.log_status;
        let RecorderState::Recording(active) = &mut self.state else {
            return Err(self.not_recording());
        };

        format::encode_frame(&active.current, &mut active.batch);
        active.batch_frames += 1;
        let index = self.stats.frames_committed;
        self.stats.frames_committed += 1;
        if log_status {
            tracing::trace!(frame = index, pending = active.batch_frames, "frame committed");
        }

        if active.batch_frames >= frames_before_write {
            active.flush_batch(&mut self.stats)?;
        }
        Ok(index)
    }

    /// Write any pending frames now, even a partial batch.
    pub fn flush(&mut self) -> Result<(), LogError> {
        let RecorderState::Recording(active) = &mut self.state else {
            return Err(self.not_recording());
        };
        active.flush_batch(&mut self.stats)
    }

    /// Flush the trailing batch, patch the frame count and release storage.
    ///
    /// Closing a recorder whose schema was never finalized writes nothing.
    pub fn close(mut self) -> Result<RecordingSummary, LogError> {
        Ok(self.finish()?.map_or_else(|| self.summary(), |(_, summary)| summary))
    }

    /// Like [`close`](Self::close), but hands back the storage handle.
    pub fn close_into_inner(mut self) -> Result<(S::Handle, RecordingSummary), LogError> {
        self.finish()?.ok_or(LogError::SchemaNotFinalized)
    }

    /// Index the next committed frame will get.
    pub fn frame_index(&self) -> u64 {
        self.stats.frames_committed
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self.state, RecorderState::Recording(_))
    }

    /// The frozen schema, once finalized.
    pub fn schema(&self) -> Option<&Arc<FrozenSchema>> {
        match &self.state {
            RecorderState::Recording(active) => Some(&active.schema),
            _ => None,
        }
    }

    fn active_mut(&mut self) -> Result<&mut ActiveLog<S::Handle>, LogError> {
        match &mut self.state {
            RecorderState::Recording(active) => Ok(active),
            RecorderState::Setup { .. } => Err(LogError::SchemaNotFinalized),
            RecorderState::Poisoned => Err(LogError::Poisoned),
        }
    }

    fn not_recording(&self) -> LogError {
        match self.state {
            RecorderState::Setup { .. } => LogError::SchemaNotFinalized,
            _ => LogError::Poisoned,
        }
    }

    fn summary(&self) -> RecordingSummary {
        RecordingSummary {
            frame_count: self.stats.frames_committed,
            batches_written: self.stats.batches_written,
            bytes_written: self.stats.bytes_written,
        }
    }

    /// Shared by `close` and `Drop`. Leaves the recorder poisoned.
    fn finish(&mut self) -> Result<Option<(S::Handle, RecordingSummary)>, LogError> {
        let RecorderState::Recording(mut active) =
            std::mem::replace(&mut self.state, RecorderState::Poisoned)
        else {
            return Ok(None);
        };
        active.flush_batch(&mut self.stats)?;
        format::write_frame_count(&mut active.writer, self.stats.frames_committed)?;
        active.writer.flush()?;

        let summary = self.summary();
        tracing::info!(
            frames = summary.frame_count,
            batches = summary.batches_written,
            bytes = summary.bytes_written,
            "log closed"
        );
        Ok(Some((active.writer, summary)))
    }
}

impl<S: LogSink> Drop for Recorder<S> {
    fn drop(&mut self) {
        if !self.is_finalized() {
            return;
        }
        match self.finish() {
            Ok(_) => tracing::warn!(
                frames = self.stats.frames_committed,
                "recorder dropped without close; pending frames flushed"
            ),
            Err(e) => tracing::warn!(
                frames_durable = self.stats.frames_durable,
                "recorder dropped without close and the final flush failed: {e}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::{self, Cursor};
    use std::rc::Rc;

    fn memory_recorder(frames_before_write: u32) -> Recorder<Cursor<Vec<u8>>> {
        Recorder::new(
            Cursor::new(Vec::new()),
            RecorderConfig {
                frames_before_write,
                ..RecorderConfig::default()
            },
        )
    }

    #[test]
    fn register_after_finalize_is_frozen() {
        let mut rec = memory_recorder(4);
        rec.register_action("mock_action", Shape::Array(1)).unwrap();
        rec.finalize_schema().unwrap();
        let err = rec.register_state("late", Shape::Scalar).unwrap_err();
        assert!(matches!(err, LogError::SchemaFrozen(p) if p == "late"));
    }

    #[test]
    fn double_finalize_rejected() {
        let mut rec = memory_recorder(4);
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();
        assert!(matches!(
            rec.finalize_schema(),
            Err(LogError::SchemaAlreadyFinalized)
        ));
    }

    #[test]
    fn empty_schema_rejected_and_recoverable() {
        let mut rec = memory_recorder(4);
        assert!(matches!(rec.finalize_schema(), Err(LogError::EmptySchema)));
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();
    }

    #[test]
    fn zero_batch_size_rejected() {
        let mut rec = memory_recorder(0);
        rec.register_action("a", Shape::Scalar).unwrap();
        assert!(matches!(
            rec.finalize_schema(),
            Err(LogError::InvalidConfig(_))
        ));
        assert!(!rec.is_finalized());
    }

    #[test]
    fn set_value_before_finalize() {
        let mut rec = memory_recorder(4);
        rec.register_action("a", Shape::Scalar).unwrap();
        assert!(matches!(
            rec.set_value("a", 1.0),
            Err(LogError::SchemaNotFinalized)
        ));
        assert!(matches!(
            rec.commit_frame(),
            Err(LogError::SchemaNotFinalized)
        ));
    }

    #[test]
    fn set_value_checks_path_and_shape() {
        let mut rec = memory_recorder(4);
        rec.register_action("mock_action", Shape::Array(1)).unwrap();
        rec.finalize_schema().unwrap();

        assert!(matches!(
            rec.set_value("missing", [1.0]),
            Err(LogError::UnknownChannel(p)) if p == "missing"
        ));
        match rec.set_value("mock_action", 1.0) {
            Err(LogError::ShapeMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Shape::Array(1));
                assert_eq!(actual, Shape::Scalar);
            }
            other => panic!("expected ShapeMismatch, got {other:?}"),
        }
        rec.set_value("mock_action", [1.0]).unwrap();
    }

    #[test]
    fn one_write_per_full_batch() {
        let mut rec = memory_recorder(3);
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();
        let header_bytes = rec.stats().bytes_written;

        for i in 0..3_u32 {
            rec.set_value("a", f64::from(i)).unwrap();
            assert_eq!(rec.stats().batches_written, 0);
            assert_eq!(rec.commit_frame().unwrap(), i as u64);
        }
        let stats = rec.stats();
        assert_eq!(stats.batches_written, 1);
        assert_eq!(stats.frames_durable, 3);
        assert_eq!(stats.bytes_written, header_bytes + 3 * 8);

        let summary = rec.close().unwrap();
        assert_eq!(summary.frame_count, 3);
        assert_eq!(summary.batches_written, 1);
    }

    #[test]
    fn partial_batch_written_on_close() {
        let mut rec = memory_recorder(3);
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();
        for _ in 0..4 {
            rec.commit_frame().unwrap();
        }
        assert_eq!(rec.stats().batches_written, 1);
        let summary = rec.close().unwrap();
        assert_eq!(summary.batches_written, 2);
        assert_eq!(summary.frame_count, 4);
    }

    #[test]
    fn close_without_finalize_writes_nothing() {
        let mut rec = memory_recorder(3);
        rec.register_action("a", Shape::Scalar).unwrap();
        let summary = rec.close().unwrap();
        assert_eq!(summary.frame_count, 0);
        assert_eq!(summary.bytes_written, 0);
    }

    #[test]
    fn close_into_inner_patches_frame_count() {
        let mut rec = memory_recorder(8);
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();
        rec.commit_frame().unwrap();
        rec.commit_frame().unwrap();
        let (cursor, summary) = rec.close_into_inner().unwrap();
        let bytes = cursor.into_inner();
        let meta = format::read_metadata(&mut bytes.as_slice()).unwrap();
        assert_eq!(meta.header.frame_count, Some(2));
        assert_eq!(
            bytes.len() as u64,
            meta.header.data_offset + summary.frame_count * 8
        );
    }

    /// Fails writes while `fail` is set, writing nothing.
    struct FlakyWriter {
        inner: Cursor<Vec<u8>>,
        fail: Rc<Cell<bool>>,
    }

    impl Write for FlakyWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail.get() {
                return Err(io::Error::other("disk full"));
            }
            self.inner.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FlakyWriter {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    impl LogSink for FlakyWriter {
        type Handle = Self;

        fn acquire(self) -> io::Result<Self> {
            Ok(self)
        }
    }

    #[test]
    fn failed_flush_keeps_batch_for_retry() {
        let fail = Rc::new(Cell::new(false));
        let writer = FlakyWriter {
            inner: Cursor::new(Vec::new()),
            fail: Rc::clone(&fail),
        };
        let mut rec = Recorder::new(
            writer,
            RecorderConfig {
                frames_before_write: 2,
                ..RecorderConfig::default()
            },
        );
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();

        rec.set_value("a", 1.0).unwrap();
        rec.commit_frame().unwrap();
        fail.set(true);
        rec.set_value("a", 2.0).unwrap();
        assert!(matches!(rec.commit_frame(), Err(LogError::Io(_))));
        assert_eq!(rec.stats().frames_committed, 2);
        assert_eq!(rec.stats().frames_durable, 0);

        fail.set(false);
        rec.flush().unwrap();
        assert_eq!(rec.stats().frames_durable, 2);
        assert_eq!(rec.stats().batches_written, 1);

        let (writer, summary) = rec.close_into_inner().unwrap();
        assert_eq!(summary.frame_count, 2);
        let bytes = writer.inner.into_inner();
        let meta = format::read_metadata(&mut bytes.as_slice()).unwrap();
        let mut slots = Vec::new();
        format::decode_frames(&bytes[meta.header.data_offset as usize..], &mut slots);
        assert_eq!(slots, vec![1.0, 2.0]);
    }

    #[test]
    fn unset_channels_carry_forward() {
        let mut rec = memory_recorder(8);
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.register_state("q", Shape::Quaternion).unwrap();
        rec.finalize_schema().unwrap();

        rec.commit_frame().unwrap();
        rec.set_value("a", 5.0).unwrap();
        rec.commit_frame().unwrap();
        rec.commit_frame().unwrap();

        let (cursor, _) = rec.close_into_inner().unwrap();
        let bytes = cursor.into_inner();
        let meta = format::read_metadata(&mut bytes.as_slice()).unwrap();
        let mut slots = Vec::new();
        format::decode_frames(&bytes[meta.header.data_offset as usize..], &mut slots);
        assert_eq!(
            slots,
            vec![
                0.0, 0.0, 0.0, 0.0, 1.0, // defaults
                5.0, 0.0, 0.0, 0.0, 1.0, // a set
                5.0, 0.0, 0.0, 0.0, 1.0, // carried forward
            ]
        );
    }

    #[test]
    fn drop_without_close_flushes() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("dropped.rlog");
        {
            let mut rec = Recorder::create(&path, RecorderConfig::default());
            rec.register_action("a", Shape::Scalar).unwrap();
            rec.finalize_schema().unwrap();
            rec.set_value("a", 3.0).unwrap();
            rec.commit_frame().unwrap();
        }
        let bytes = std::fs::read(&path).unwrap();
        let meta = format::read_metadata(&mut bytes.as_slice()).unwrap();
        assert_eq!(meta.header.frame_count, Some(1));
        assert_eq!(bytes.len() as u64, meta.header.data_offset + 8);
    }
}
