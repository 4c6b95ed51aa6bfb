//! Channel schema: a mutable [`SchemaBuilder`] that freezes into an
//! immutable [`FrozenSchema`] shared by the recorder and the player.

use crate::error::LogError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fixed dimensionality of a channel. Every slot is an `f64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Scalar,
    Vector3,
    /// x, y, z, w
    Quaternion,
    /// Position xyz followed by orientation xyzw.
    Pose,
    /// Flat array of `n` slots, `n >= 1`.
    Array(u32),
}

impl Shape {
    /// Number of `f64` slots a value of this shape occupies.
    pub fn width(&self) -> usize {
        match self {
            Shape::Scalar => 1,
            Shape::Vector3 => 3,
            Shape::Quaternion => 4,
            Shape::Pose => 7,
            Shape::Array(n) => *n as usize,
        }
    }

    /// Slots a channel holds before its first `set_value`: zeros, with
    /// identity rotation for orientations.
    pub fn default_slots(&self) -> Vec<f64> {
        match self {
            Shape::Quaternion => vec![0.0, 0.0, 0.0, 1.0],
            Shape::Pose => vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
            other => vec![0.0; other.width()],
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Scalar => f.write_str("scalar"),
            Shape::Vector3 => f.write_str("vec3"),
            Shape::Quaternion => f.write_str("quat"),
            Shape::Pose => f.write_str("pose"),
            Shape::Array(n) => write!(f, "array[{n}]"),
        }
    }
}

/// Whether a channel records an input to the simulation or its resulting state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    Action,
    State,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Action => f.write_str("action"),
            ChannelKind::State => f.write_str("state"),
        }
    }
}

/// A named, shape-fixed recorded quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub path: String,
    pub shape: Shape,
    pub kind: ChannelKind,
}

/// Collects channels before recording starts.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    channels: Vec<Channel>,
    index: HashMap<String, usize>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a channel. Paths must be unique and non-empty.
    pub fn register(
        &mut self,
        path: impl Into<String>,
        shape: Shape,
        kind: ChannelKind,
    ) -> Result<(), LogError> {
        let path = path.into();
        if path.is_empty() {
            return Err(LogError::InvalidChannel {
                path,
                reason: "path is empty".into(),
            });
        }
        if shape.width() == 0 {
            return Err(LogError::InvalidChannel {
                path,
                reason: "array shape must have at least one slot".into(),
            });
        }
        if self.index.contains_key(&path) {
            return Err(LogError::DuplicateChannel(path));
        }
        self.index.insert(path.clone(), self.channels.len());
        self.channels.push(Channel { path, shape, kind });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Freeze the channel set. Empty schemas are rejected.
    pub fn freeze(self) -> Result<FrozenSchema, LogError> {
        if self.channels.is_empty() {
            return Err(LogError::EmptySchema);
        }
        let mut offsets = Vec::with_capacity(self.channels.len());
        let mut width = 0;
        for channel in &self.channels {
            offsets.push(width);
            width += channel.shape.width();
        }
        Ok(FrozenSchema {
            channels: self.channels,
            offsets,
            index: self.index,
            frame_width: width,
        })
    }
}

/// Immutable channel set plus the slot layout of one frame.
///
/// Slots are laid out in registration order.
#[derive(Debug, Clone)]
pub struct FrozenSchema {
    channels: Vec<Channel>,
    offsets: Vec<usize>,
    index: HashMap<String, usize>,
    frame_width: usize,
}

impl FrozenSchema {
    /// Channels in registration order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn get(&self, path: &str) -> Option<&Channel> {
        self.index.get(path).map(|&i| &self.channels[i])
    }

    /// Channels of one kind, in registration order.
    pub fn channels_of(&self, kind: ChannelKind) -> impl Iterator<Item = &Channel> {
        self.channels.iter().filter(move |c| c.kind == kind)
    }

    /// Slots per frame.
    pub fn frame_width(&self) -> usize {
        self.frame_width
    }

    /// Bytes per persisted frame.
    pub fn stride(&self) -> usize {
        self.frame_width * std::mem::size_of::<f64>()
    }

    /// Slot offset and channel for `path`.
    pub(crate) fn slot(&self, path: &str) -> Result<(usize, &Channel), LogError> {
        self.index
            .get(path)
            .map(|&i| (self.offsets[i], &self.channels[i]))
            .ok_or_else(|| LogError::UnknownChannel(path.to_string()))
    }

    /// Slots for a frame in which nothing has been set yet.
    pub(crate) fn default_frame(&self) -> Vec<f64> {
        self.channels
            .iter()
            .flat_map(|c| c.shape.default_slots())
            .collect()
    }

    /// CBOR encoding of the channel list, as stored in a log header.
    pub(crate) fn encode(&self) -> Result<Vec<u8>, LogError> {
        let mut buf = Vec::new();
        ciborium::into_writer(&self.channels, &mut buf)
            .map_err(|e| LogError::CborEncode(e.to_string()))?;
        Ok(buf)
    }

    /// Decode a channel list written by [`FrozenSchema::encode`].
    ///
    /// The list is re-validated through a builder; anything a builder would
    /// reject is reported as a corrupt log.
    pub(crate) fn decode(bytes: &[u8]) -> Result<Self, LogError> {
        let channels: Vec<Channel> = ciborium::from_reader(bytes)
            .map_err(|e| LogError::CorruptLog(format!("schema block: {e}")))?;
        let mut builder = SchemaBuilder::new();
        for channel in channels {
            builder
                .register(channel.path, channel.shape, channel.kind)
                .map_err(|e| LogError::CorruptLog(format!("schema block: {e}")))?;
        }
        builder
            .freeze()
            .map_err(|e| LogError::CorruptLog(format!("schema block: {e}")))
    }
}
