//! Storage backend traits.
//!
//! The engine only ever consumes this interface: random reads over a byte
//! range and append-only writes with a final commit. Implementations decide
//! what is behind a logical path.

use fovea_core::error::EngineError;

/// Terminal state of a successful read.
///
/// Reading exactly up to the end of a file reports `EndOfFile` with a full
/// byte count; both outcomes are acceptable to the load stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Complete,
    EndOfFile,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("transient failure on {path}: {source}")]
    Transient {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

/// Byte-addressable random-read handle.
pub trait RandomRead: Send + std::fmt::Debug {
    fn size(&mut self) -> Result<u64, StorageError>;

    /// Fill as much of `dst` as the file allows starting at `offset`.
    /// Returns the byte count actually read and the terminal outcome.
    fn read_at(&mut self, offset: u64, dst: &mut [u8]) -> Result<(usize, ReadOutcome), StorageError>;
}

/// Append-only write handle. Nothing is durable until `commit`.
pub trait AppendFile: Send {
    fn append(&mut self, src: &[u8]) -> Result<(), StorageError>;
    fn commit(&mut self) -> Result<(), StorageError>;
}

pub trait StorageBackend: Send + Sync {
    fn open_read(&self, path: &str) -> Result<Box<dyn RandomRead>, StorageError>;
    fn open_write(&self, path: &str) -> Result<Box<dyn AppendFile>, StorageError>;
}

/// Read a whole logical file into memory.
pub fn read_all(storage: &dyn StorageBackend, path: &str) -> Result<Vec<u8>, StorageError> {
    let mut file = storage.open_read(path)?;
    let size = file.size()? as usize;
    let mut buf = vec![0u8; size];
    let (read, _) = file.read_at(0, &mut buf)?;
    buf.truncate(read);
    Ok(buf)
}

/// Write a whole logical file and commit it.
pub fn write_all(storage: &dyn StorageBackend, path: &str, bytes: &[u8]) -> Result<(), StorageError> {
    let mut file = storage.open_write(path)?;
    file.append(bytes)?;
    file.commit()
}
