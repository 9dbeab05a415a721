#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod backend;
pub mod dataset;
pub mod paths;
pub mod posix;
pub mod retry;

pub use backend::{AppendFile, RandomRead, ReadOutcome, StorageBackend, StorageError};
pub use posix::PosixStorage;
pub use retry::{BackoffPolicy, with_backoff};
