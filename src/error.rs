// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

use thiserror::Error;

/// Discriminated error kinds of the storage core.
///
/// Store-layer errors fail the originating query; ingest-path errors are
/// logged and the offending slice dropped.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("lookup error: {0}")]
    Lookup(String),
    #[error("format error: {0}")]
    Format(String),
    #[error("IO error: {0}")]
    Io(#[from] Box<std::io::Error>),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("capacity exhausted: {0}")]
    CapacityExhausted(String),
    #[error("encode error: {0}")]
    Encode(#[from] Box<bincode::ErrorKind>),
    #[error("invalid checksum: found {found}, expected {expected}")]
    Checksum { found: u32, expected: u32 },
}

impl From<std::io::Error> for StorageError {
    #[inline]
    fn from(e: std::io::Error) -> StorageError {
        StorageError::Io(e.into())
    }
}

impl StorageError {
    /// A lookup error for a store that is shutting down or unreachable.
    pub fn store_down() -> Self {
        StorageError::Lookup("partition store shutting down".into())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;
