//! Incremental reads of append-only log files.
//!
//! A tail only ever returns the bytes written after a remembered offset. The
//! caller owns the offset and decides when to advance it.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Bytes replayed from the end of an existing log when a session starts.
pub const DEFAULT_BACKFILL_BYTES: u64 = 1024 * 1024;

/// Longest header line we are willing to scan for.
const HEADER_PROBE_BYTES: u64 = 64 * 1024;

#[derive(Debug, Error)]
pub enum TailError {
    #[error("file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TailError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => TailError::NotFound(path.to_path_buf()),
            _ => TailError::Io {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}

/// The file operations a tail needs.
pub trait FileSystem {
    /// Current length of the regular file at `path`.
    fn size(&self, path: &Path) -> Result<u64, TailError>;

    /// Bytes in `[start, end)`. Fewer bytes may come back if the file shrank.
    fn read_range(&self, path: &Path, start: u64, end: u64) -> Result<Vec<u8>, TailError>;

    fn exists(&self, path: &Path) -> bool {
        self.size(path).is_ok()
    }
}

/// Files on the local disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFs;

impl FileSystem for LocalFs {
    fn size(&self, path: &Path) -> Result<u64, TailError> {
        let meta = std::fs::metadata(path).map_err(|e| TailError::from_io(path, e))?;
        if !meta.is_file() {
            return Err(TailError::NotAFile(path.to_path_buf()));
        }
        Ok(meta.len())
    }

    fn read_range(&self, path: &Path, start: u64, end: u64) -> Result<Vec<u8>, TailError> {
        let mut file = File::open(path).map_err(|e| TailError::from_io(path, e))?;
        file.seek(SeekFrom::Start(start))
            .map_err(|e| TailError::from_io(path, e))?;

        let mut buf = Vec::with_capacity(end.saturating_sub(start) as usize);
        file.take(end.saturating_sub(start))
            .read_to_end(&mut buf)
            .map_err(|e| TailError::from_io(path, e))?;
        Ok(buf)
    }
}

/// An in-memory file system.
#[derive(Clone, Debug, Default)]
#[allow(dead_code, reason = "this is a testing utility.")]
pub struct MemoryFs {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
}

#[allow(dead_code, reason = "this is a testing utility.")]
impl MemoryFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, path: impl Into<PathBuf>, contents: &str) {
        self.lock().insert(path.into(), contents.as_bytes().to_vec());
    }

    pub fn append(&self, path: impl AsRef<Path>, contents: &str) {
        self.lock()
            .entry(path.as_ref().to_path_buf())
            .or_default()
            .extend_from_slice(contents.as_bytes());
    }

    pub fn remove(&self, path: impl AsRef<Path>) {
        self.lock().remove(path.as_ref());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, Vec<u8>>> {
        // a panicking test thread must not take the other tests down with it.
        self.files.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl FileSystem for MemoryFs {
    fn size(&self, path: &Path) -> Result<u64, TailError> {
        self.lock()
            .get(path)
            .map(|f| f.len() as u64)
            .ok_or_else(|| TailError::NotFound(path.to_path_buf()))
    }

    fn read_range(&self, path: &Path, start: u64, end: u64) -> Result<Vec<u8>, TailError> {
        let files = self.lock();
        let file = files
            .get(path)
            .ok_or_else(|| TailError::NotFound(path.to_path_buf()))?;
        let len = file.len() as u64;
        let (start, end) = (start.min(len) as usize, end.min(len) as usize);
        Ok(file[start..end.max(start)].to_vec())
    }
}

/// Bytes appended to a file between two offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TailChunk {
    pub bytes: Vec<u8>,
    pub start: u64,
    /// Offset to resume from on the next read.
    pub end: u64,
}

impl TailChunk {
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// The header line of a log and the offset of the first data byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderLine {
    pub line: String,
    pub end: u64,
}

/// Reads whatever was appended after `last_position`.
///
/// Returns an empty chunk with an unchanged position when the file has not
/// grown.
pub fn read<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
    last_position: u64,
) -> Result<TailChunk, TailError> {
    let size = fs.size(path)?;
    if size <= last_position {
        return Ok(TailChunk {
            bytes: Vec::new(),
            start: last_position,
            end: last_position,
        });
    }

    let bytes = fs.read_range(path, last_position, size)?;
    let end = last_position + bytes.len() as u64;
    Ok(TailChunk {
        bytes,
        start: last_position,
        end,
    })
}

/// A read that starts on a line boundary.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AlignedChunk {
    pub chunk: TailChunk,
    /// The dropped line has no newline yet, so its remainder is still to come.
    pub open_line: bool,
}

/// Like [`read`], but when `last_position` falls inside a line the rest of
/// that line is dropped. `floor` must be a line start, usually the header end.
pub fn read_aligned<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
    last_position: u64,
    floor: u64,
) -> Result<AlignedChunk, TailError> {
    if last_position <= floor {
        return Ok(AlignedChunk {
            chunk: read(fs, path, floor)?,
            open_line: false,
        });
    }

    // start one byte early: if that byte ends a line, last_position is a line start.
    let mut chunk = read(fs, path, last_position - 1)?;
    if chunk.is_empty() {
        return Ok(AlignedChunk {
            chunk: read(fs, path, last_position)?,
            open_line: false,
        });
    }

    let newline = chunk.bytes.iter().position(|&b| b == b'\n');
    let cut = newline.map_or(chunk.bytes.len(), |i| i + 1);
    chunk.bytes = chunk.bytes.split_off(cut);
    chunk.start += cut as u64;

    Ok(AlignedChunk {
        chunk,
        open_line: newline.is_none(),
    })
}

/// Start offset for a fresh tail that replays at most `backfill` bytes.
pub fn seed<F: FileSystem + ?Sized>(fs: &F, path: &Path, backfill: u64) -> Result<u64, TailError> {
    Ok(fs.size(path)?.saturating_sub(backfill))
}

/// Reads the first line of the file.
///
/// `None` while the file does not yet hold a complete first line.
pub fn read_header<F: FileSystem + ?Sized>(
    fs: &F,
    path: &Path,
) -> Result<Option<HeaderLine>, TailError> {
    let size = fs.size(path)?;
    let probe = fs.read_range(path, 0, size.min(HEADER_PROBE_BYTES))?;

    Ok(probe.iter().position(|&b| b == b'\n').map(|newline| {
        let line = String::from_utf8_lossy(&probe[..newline])
            .trim_end_matches('\r')
            .to_string();
        HeaderLine {
            line,
            end: newline as u64 + 1,
        }
    }))
}
