//! On-disk log layout.
//!
//! ```text
//! offset  size  field
//! 0       8     magic b"RPLYLOG\0"
//! 8       2     format version (u16)
//! 10      2     reserved flags (u16, zero)
//! 12      4     frames_before_write (u32)
//! 16      8     frame_count (u64, OPEN_FRAME_COUNT until close)
//! 24      4     schema_len (u32)
//! 28      4     settings_len (u32)
//! 32      ..    schema block (CBOR channel list)
//! ..      ..    settings blob
//! ..      32    SHA-256 of bytes [0, 16) ++ [24, end of settings)
//! ..      ..    frames: frame_count * stride, f64 little-endian slots
//! ```
//!
//! The digest skips `frame_count` because it is patched in place at close.

use crate::error::LogError;
use crate::schema::FrozenSchema;
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Seek, SeekFrom, Write};

pub const MAGIC: [u8; 8] = *b"RPLYLOG\0";
/// Current log format version.
pub const FORMAT_VERSION: u16 = 1;
/// Frame count stored while a recording is still open.
pub const OPEN_FRAME_COUNT: u64 = u64::MAX;

const FIXED_HEADER_LEN: usize = 32;
const FRAME_COUNT_OFFSET: u64 = 16;
const DIGEST_LEN: usize = 32;

/// Fixed header fields plus the resolved offset of the first frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u16,
    pub frames_before_write: u32,
    /// `None` if the recorder never reached `close()`.
    pub frame_count: Option<u64>,
    /// Byte offset of frame 0.
    pub data_offset: u64,
}

/// Everything read from the front of a log.
#[derive(Debug)]
pub(crate) struct Metadata {
    pub header: LogHeader,
    pub schema: FrozenSchema,
    pub settings: Vec<u8>,
}

/// Write the metadata block in one call. Returns the offset of frame 0.
pub(crate) fn write_metadata<W: Write>(
    writer: &mut W,
    schema: &FrozenSchema,
    frames_before_write: u32,
    settings: &[u8],
) -> Result<u64, LogError> {
    let schema_bytes = schema.encode()?;
    let schema_len = u32::try_from(schema_bytes.len())
        .map_err(|_| LogError::InvalidConfig("schema block exceeds 4 GiB".into()))?;
    let settings_len = u32::try_from(settings.len())
        .map_err(|_| LogError::InvalidConfig("settings blob exceeds 4 GiB".into()))?;

    let mut buf = Vec::with_capacity(
        FIXED_HEADER_LEN + schema_bytes.len() + settings.len() + DIGEST_LEN,
    );
    buf.write_all(&MAGIC)?;
    buf.write_u16::<LittleEndian>(FORMAT_VERSION)?;
    buf.write_u16::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(frames_before_write)?;
    buf.write_u64::<LittleEndian>(OPEN_FRAME_COUNT)?;
    buf.write_u32::<LittleEndian>(schema_len)?;
    buf.write_u32::<LittleEndian>(settings_len)?;
    buf.write_all(&schema_bytes)?;
    buf.write_all(settings)?;
    let digest = metadata_digest(&buf);
    buf.write_all(&digest)?;

    writer.write_all(&buf)?;
    Ok(buf.len() as u64)
}

/// Patch the frame count of a log whose metadata starts at offset 0.
pub(crate) fn write_frame_count<W: Write + Seek>(
    writer: &mut W,
    frame_count: u64,
) -> io::Result<()> {
    writer.seek(SeekFrom::Start(FRAME_COUNT_OFFSET))?;
    writer.write_u64::<LittleEndian>(frame_count)
}

/// Read and verify the metadata block from the reader's current position.
pub(crate) fn read_metadata<R: Read>(reader: &mut R) -> Result<Metadata, LogError> {
    let mut fixed = [0u8; FIXED_HEADER_LEN];
    read_block(reader, &mut fixed, "fixed header")?;
    if fixed[..8] != MAGIC {
        return Err(LogError::CorruptLog("bad magic".into()));
    }

    let mut cur = &fixed[8..];
    let version = cur.read_u16::<LittleEndian>()?;
    if version != FORMAT_VERSION {
        return Err(LogError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }
    let _flags = cur.read_u16::<LittleEndian>()?;
    let frames_before_write = cur.read_u32::<LittleEndian>()?;
    let frame_count = cur.read_u64::<LittleEndian>()?;
    let schema_len = cur.read_u32::<LittleEndian>()? as usize;
    let settings_len = cur.read_u32::<LittleEndian>()? as usize;
    if frames_before_write == 0 {
        return Err(LogError::CorruptLog("frames_before_write is zero".into()));
    }

    let schema_bytes = read_exact_len(reader, schema_len, "schema block")?;
    let settings = read_exact_len(reader, settings_len, "settings blob")?;
    let mut stored_digest = [0u8; DIGEST_LEN];
    read_block(reader, &mut stored_digest, "metadata digest")?;

    let mut hashed = Vec::with_capacity(FIXED_HEADER_LEN + schema_len + settings_len);
    hashed.extend_from_slice(&fixed);
    hashed.extend_from_slice(&schema_bytes);
    hashed.extend_from_slice(&settings);
    if metadata_digest(&hashed) != stored_digest {
        return Err(LogError::CorruptLog("metadata digest mismatch".into()));
    }

    let schema = FrozenSchema::decode(&schema_bytes)?;
    let data_offset = (FIXED_HEADER_LEN + schema_len + settings_len + DIGEST_LEN) as u64;
    Ok(Metadata {
        header: LogHeader {
            version,
            frames_before_write,
            frame_count: (frame_count != OPEN_FRAME_COUNT).then_some(frame_count),
            data_offset,
        },
        schema,
        settings,
    })
}

/// Append one frame's slots to `out` as little-endian f64.
pub(crate) fn encode_frame(slots: &[f64], out: &mut Vec<u8>) {
    let start = out.len();
    out.resize(start + slots.len() * std::mem::size_of::<f64>(), 0);
    LittleEndian::write_f64_into(slots, &mut out[start..]);
}

/// Decode consecutive frames from `bytes` into `out`, replacing its contents.
pub(crate) fn decode_frames(bytes: &[u8], out: &mut Vec<f64>) {
    out.clear();
    out.resize(bytes.len() / std::mem::size_of::<f64>(), 0.0);
    LittleEndian::read_f64_into(bytes, out);
}

/// SHA-256 over the metadata bytes, skipping the mutable frame-count field.
fn metadata_digest(buf: &[u8]) -> [u8; DIGEST_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(&buf[..FRAME_COUNT_OFFSET as usize]);
    hasher.update(&buf[FRAME_COUNT_OFFSET as usize + 8..]);
    hasher.finalize().into()
}

fn read_block<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<(), LogError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => LogError::CorruptLog(format!("truncated {what}")),
        _ => LogError::Io(e),
    })
}

/// Read exactly `len` bytes without trusting `len` for the allocation.
fn read_exact_len<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>, LogError> {
    let mut buf = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len {
        return Err(LogError::CorruptLog(format!("truncated {what}")));
    }
    Ok(buf)
}
