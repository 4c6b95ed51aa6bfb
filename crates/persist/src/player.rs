//! Read side of a log: yields recorded frames in order, one batch in memory
//! at a time.

use crate::error::LogError;
use crate::format::{self, LogHeader};
use crate::schema::FrozenSchema;
use crate::value::Value;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Player configuration.
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    /// Trace every advanced frame.
    pub log_status: bool,
}

/// Where a player is in its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    /// At least one frame remains.
    Open,
    /// Every frame has been consumed. The last frame stays readable.
    Exhausted,
}

/// Replays a recorded log frame by frame.
///
/// A player owns its reader exclusively; reading a log that a recorder is
/// still writing is unsupported.
pub struct Player<R: Read + Seek> {
    reader: R,
    config: PlayerConfig,
    schema: Arc<FrozenSchema>,
    settings: Vec<u8>,
    header: LogHeader,
    /// Declared count, or recovered from length for an unclosed log.
    frame_count: u64,
    /// Decoded slots of the loaded batch.
    batch: Vec<f64>,
    batch_start: u64,
    batch_len: u64,
    /// Frames consumed so far; the current frame is `cursor - 1`.
    cursor: u64,
}

impl Player<BufReader<File>> {
    /// Open a log file with the default config.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        Self::open_with(path, PlayerConfig::default())
    }

    pub fn open_with(path: impl AsRef<Path>, config: PlayerConfig) -> Result<Self, LogError> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), config)
    }

    /// Read only the settings blob of a log, without preparing for replay.
    pub fn read_settings(path: impl AsRef<Path>) -> Result<Vec<u8>, LogError> {
        let mut reader = BufReader::new(File::open(path)?);
        Ok(format::read_metadata(&mut reader)?.settings)
    }
}

impl<R: Read + Seek> Player<R> {
    /// Read and verify the metadata block and work out how many frames the
    /// log holds.
    ///
    /// A log whose recorder never closed is recovered from its length; a
    /// torn trailing frame is dropped.
    pub fn from_reader(mut reader: R, config: PlayerConfig) -> Result<Self, LogError> {
        reader.seek(SeekFrom::Start(0))?;
        let meta = format::read_metadata(&mut reader)?;
        let header = meta.header;
        let stride = meta.schema.stride() as u64;
        let file_len = reader.seek(SeekFrom::End(0))?;
        let available = file_len.saturating_sub(header.data_offset);

        let frame_count = match header.frame_count {
            Some(n) => {
                let needed = n.checked_mul(stride);
                if needed.is_none_or(|bytes| bytes > available) {
                    return Err(LogError::CorruptLog(format!(
                        "header declares {n} frames but only {available} bytes of frame data follow"
                    )));
                }
                n
            }
            None => {
                let n = available / stride;
                if available % stride != 0 {
                    tracing::warn!(
                        torn_bytes = available % stride,
                        "ignoring torn trailing frame"
                    );
                }
                tracing::warn!(frames = n, "log was not closed; frame count recovered from length");
                n
            }
        };

        tracing::info!(
            frames = frame_count,
            channels = meta.schema.channels().len(),
            frames_before_write = header.frames_before_write,
            "log opened"
        );
        Ok(Self {
            reader,
            config,
            schema: Arc::new(meta.schema),
            settings: meta.settings,
            header,
            frame_count,
            batch: Vec::new(),
            batch_start: 0,
            batch_len: 0,
            cursor: 0,
        })
    }

    /// The configuration blob recorded at save time, unmodified.
    pub fn read_metadata_blob(&self) -> &[u8] {
        &self.settings
    }

    pub fn has_next_frame(&self) -> bool {
        self.cursor < self.frame_count
    }

    /// Move to the next frame, loading the next batch when the loaded one is
    /// used up. Returns the index of the new current frame.
    pub fn advance_frame(&mut self) -> Result<u64, LogError> {
        if !self.has_next_frame() {
            return Err(LogError::EndOfLog {
                frame_count: self.frame_count,
            });
        }
        if self.cursor >= self.batch_start + self.batch_len {
            self.load_batch()?;
        }
        let index = self.cursor;
        self.cursor += 1;
        if self.config.log_status {
            tracing::trace!(
                frame = index,
                remaining = self.frames_remaining(),
                "frame advanced"
            );
        }
        Ok(index)
    }

    /// Value of `path` in the current frame.
    ///
    /// Still valid after the log is exhausted; it then reads the last frame.
    pub fn read_value(&self, path: &str) -> Result<Value, LogError> {
        let (offset, channel) = self.schema.slot(path)?;
        if self.cursor == 0 {
            return Err(LogError::NoCurrentFrame);
        }
        let row = (self.cursor - 1 - self.batch_start) as usize * self.schema.frame_width();
        let start = row + offset;
        let slots = self.batch[start..start + channel.shape.width()].to_vec();
        Ok(Value::from_parts(channel.shape, slots))
    }

    pub fn state(&self) -> PlayerState {
        if self.has_next_frame() {
            PlayerState::Open
        } else {
            PlayerState::Exhausted
        }
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frames_remaining(&self) -> u64 {
        self.frame_count - self.cursor
    }

    /// Index of the current frame, `None` before the first advance.
    pub fn current_frame_index(&self) -> Option<u64> {
        self.cursor.checked_sub(1)
    }

    pub fn frames_before_write(&self) -> u32 {
        self.header.frames_before_write
    }

    /// Fixed header fields as read from storage.
    pub fn header(&self) -> LogHeader {
        self.header
    }

    pub fn schema(&self) -> &Arc<FrozenSchema> {
        &self.schema
    }

    /// Read up to `frames_before_write` frames starting at the cursor.
    fn load_batch(&mut self) -> Result<(), LogError> {
        let frames = u64::from(self.header.frames_before_write).min(self.frame_count - self.cursor);
        let stride = self.schema.stride() as u64;
        self.reader
            .seek(SeekFrom::Start(self.header.data_offset + self.cursor * stride))?;

        let mut bytes = vec![0u8; (frames * stride) as usize];
        self.reader.read_exact(&mut bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => {
                LogError::CorruptLog(format!("frame data truncated at frame {}", self.cursor))
            }
            _ => LogError::Io(e),
        })?;
        format::decode_frames(&bytes, &mut self.batch);
        self.batch_start = self.cursor;
        self.batch_len = frames;
        tracing::debug!(start = self.batch_start, frames, "batch loaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::{Recorder, RecorderConfig};
    use crate::schema::Shape;
    use std::io::Cursor;

    /// `frames` frames of one scalar channel `a` with value == frame index.
    fn recorded(frames: u32, frames_before_write: u32) -> Vec<u8> {
        let mut rec = Recorder::new(
            Cursor::new(Vec::new()),
            RecorderConfig {
                frames_before_write,
                settings: b"blob".to_vec(),
                ..RecorderConfig::default()
            },
        );
        rec.register_action("a", Shape::Scalar).unwrap();
        rec.finalize_schema().unwrap();
        for i in 0..frames {
            rec.set_value("a", f64::from(i)).unwrap();
            rec.commit_frame().unwrap();
        }
        rec.close_into_inner().unwrap().0.into_inner()
    }

    fn player(bytes: Vec<u8>) -> Result<Player<Cursor<Vec<u8>>>, LogError> {
        Player::from_reader(Cursor::new(bytes), PlayerConfig::default())
    }

    #[test]
    fn end_of_log_after_last_frame() {
        let mut p = player(recorded(5, 2)).unwrap();
        assert_eq!(p.frame_count(), 5);
        for i in 0..5 {
            assert!(p.has_next_frame());
            assert_eq!(p.advance_frame().unwrap(), i);
        }
        assert!(!p.has_next_frame());
        assert_eq!(p.state(), PlayerState::Exhausted);
        assert!(matches!(
            p.advance_frame(),
            Err(LogError::EndOfLog { frame_count: 5 })
        ));
        // last frame stays readable
        assert_eq!(p.read_value("a").unwrap().as_scalar(), Some(4.0));
    }

    #[test]
    fn frames_come_back_in_order_across_batches() {
        let mut p = player(recorded(10, 3)).unwrap();
        let mut seen = Vec::new();
        while p.has_next_frame() {
            p.advance_frame().unwrap();
            seen.push(p.read_value("a").unwrap().as_scalar().unwrap());
        }
        let expected: Vec<f64> = (0..10_u32).map(f64::from).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn read_before_advance_and_unknown_channel() {
        let mut p = player(recorded(2, 2)).unwrap();
        assert!(matches!(p.read_value("a"), Err(LogError::NoCurrentFrame)));
        assert_eq!(p.current_frame_index(), None);
        p.advance_frame().unwrap();
        assert_eq!(p.current_frame_index(), Some(0));
        assert!(matches!(
            p.read_value("nonexistent"),
            Err(LogError::UnknownChannel(path)) if path == "nonexistent"
        ));
    }

    #[test]
    fn metadata_blob_is_unmodified() {
        let p = player(recorded(1, 1)).unwrap();
        assert_eq!(p.read_metadata_blob(), b"blob");
        assert_eq!(p.frames_before_write(), 1);
        assert_eq!(p.header().frame_count, Some(1));
        assert_eq!(p.schema().channels().len(), 1);
    }

    #[test]
    fn empty_log_is_immediately_exhausted() {
        let mut p = player(recorded(0, 4)).unwrap();
        assert_eq!(p.state(), PlayerState::Exhausted);
        assert!(matches!(
            p.advance_frame(),
            Err(LogError::EndOfLog { frame_count: 0 })
        ));
    }

    #[test]
    fn truncated_closed_log_is_corrupt() {
        let mut bytes = recorded(4, 4);
        bytes.truncate(bytes.len() - 8);
        assert!(matches!(player(bytes), Err(LogError::CorruptLog(_))));
    }

    #[test]
    fn unclosed_log_recovered_from_length() {
        let mut bytes = recorded(4, 4);
        // put the open sentinel back and add half a torn frame
        bytes[16..24].copy_from_slice(&format::OPEN_FRAME_COUNT.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 4]);

        let mut p = player(bytes).unwrap();
        assert_eq!(p.frame_count(), 4);
        let mut last = None;
        while p.has_next_frame() {
            p.advance_frame().unwrap();
            last = p.read_value("a").unwrap().as_scalar();
        }
        assert_eq!(last, Some(3.0));
    }

    #[test]
    fn not_a_log_is_corrupt() {
        assert!(matches!(
            player(b"definitely not a replay log, just some text".to_vec()),
            Err(LogError::CorruptLog(_))
        ));
    }

    #[test]
    fn read_settings_without_full_open() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.rlog");
        std::fs::write(&path, recorded(3, 2)).unwrap();
        assert_eq!(Player::read_settings(&path).unwrap(), b"blob");

        let p = Player::open(&path).unwrap();
        assert_eq!(p.frames_remaining(), 3);
    }
}
