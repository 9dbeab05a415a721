//! Filesystem storage backend rooted in a directory.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use crate::backend::{AppendFile, RandomRead, ReadOutcome, StorageBackend, StorageError};

/// Maps logical paths onto files under a root directory.
#[derive(Debug, Clone)]
pub struct PosixStorage {
    root: PathBuf,
}

impl PosixStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        let clean = rel
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !clean {
            return Err(StorageError::InvalidPath {
                path: path.to_string(),
                reason: "logical paths must be relative and free of parent components",
            });
        }
        Ok(self.root.join(rel))
    }
}

fn classify(path: &str, err: std::io::Error) -> StorageError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound {
            path: path.to_string(),
        },
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            StorageError::Transient {
                path: path.to_string(),
                source: err,
            }
        }
        _ => StorageError::Io {
            path: path.to_string(),
            source: err,
        },
    }
}

#[derive(Debug)]
struct PosixRead {
    path: String,
    file: File,
}

impl RandomRead for PosixRead {
    fn size(&mut self) -> Result<u64, StorageError> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| classify(&self.path, e))
    }

    fn read_at(&mut self, offset: u64, dst: &mut [u8]) -> Result<(usize, ReadOutcome), StorageError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map_err(|e| classify(&self.path, e))?;
        let mut filled = 0;
        while filled < dst.len() {
            match self.file.read(&mut dst[filled..]) {
                Ok(0) => return Ok((filled, ReadOutcome::EndOfFile)),
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(&self.path, e)),
            }
        }
        Ok((filled, ReadOutcome::Complete))
    }
}

struct PosixWrite {
    path: String,
    file: File,
}

impl AppendFile for PosixWrite {
    fn append(&mut self, src: &[u8]) -> Result<(), StorageError> {
        self.file
            .write_all(src)
            .map_err(|e| classify(&self.path, e))
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        self.file
            .sync_all()
            .map_err(|e| classify(&self.path, e))
    }
}

impl StorageBackend for PosixStorage {
    fn open_read(&self, path: &str) -> Result<Box<dyn RandomRead>, StorageError> {
        let full = self.resolve(path)?;
        let file = File::open(&full).map_err(|e| classify(path, e))?;
        Ok(Box::new(PosixRead {
            path: path.to_string(),
            file,
        }))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn AppendFile>, StorageError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(|e| classify(path, e))?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&full)
            .map_err(|e| classify(path, e))?;
        Ok(Box::new(PosixWrite {
            path: path.to_string(),
            file,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{read_all, write_all};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn unique_temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "fovea_storage_{label}_{}_{}",
            std::process::id(),
            nanos
        ));
        fs::create_dir_all(&dir).expect("create temp dir");
        dir
    }

    #[test]
    fn write_then_read_round_trips() {
        let storage = PosixStorage::new(unique_temp_dir("roundtrip"));
        write_all(&storage, "a/b/file.bin", b"payload").unwrap();
        assert_eq!(read_all(&storage, "a/b/file.bin").unwrap(), b"payload");
    }

    #[test]
    fn range_read_reports_eof() {
        let storage = PosixStorage::new(unique_temp_dir("eof"));
        write_all(&storage, "f", b"0123456789").unwrap();

        let mut file = storage.open_read("f").unwrap();
        let mut buf = [0u8; 4];
        let (n, outcome) = file.read_at(2, &mut buf).unwrap();
        assert_eq!((n, outcome), (4, ReadOutcome::Complete));
        assert_eq!(&buf, b"2345");

        // Reading past the end fills what exists and flags EndOfFile.
        let (n, outcome) = file.read_at(8, &mut buf).unwrap();
        assert_eq!((n, outcome), (2, ReadOutcome::EndOfFile));
        assert_eq!(&buf[..2], b"89");
    }

    #[test]
    fn missing_file_is_not_found() {
        let storage = PosixStorage::new(unique_temp_dir("missing"));
        assert!(matches!(
            storage.open_read("nope").unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[test]
    fn parent_components_rejected() {
        let storage = PosixStorage::new(unique_temp_dir("escape"));
        assert!(matches!(
            storage.open_read("../etc/passwd").unwrap_err(),
            StorageError::InvalidPath { .. }
        ));
    }
}
