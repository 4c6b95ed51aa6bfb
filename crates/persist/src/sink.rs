use std::fs::File;
use std::io::{self, Cursor, Seek, Write};
use std::path::PathBuf;

/// Storage a recording is written to.
///
/// The handle is acquired once, when the recorder's schema is finalized, and
/// is owned exclusively by that recorder until it closes. Two recorders (or a
/// recorder and a player) on the same location at once are unsupported.
pub trait LogSink {
    type Handle: Write + Seek;

    fn acquire(self) -> io::Result<Self::Handle>;
}

/// Creates (or truncates) the file, creating parent directories as needed.
impl LogSink for PathBuf {
    type Handle = File;

    fn acquire(self) -> io::Result<File> {
        if let Some(parent) = self.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        File::create(&self)
    }
}

impl LogSink for File {
    type Handle = File;

    fn acquire(self) -> io::Result<File> {
        Ok(self)
    }
}

impl LogSink for Cursor<Vec<u8>> {
    type Handle = Cursor<Vec<u8>>;

    fn acquire(self) -> io::Result<Self::Handle> {
        Ok(self)
    }
}
