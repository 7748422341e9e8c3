// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The store backend surface.
//!
//! A backend exposes two factory operations; everything else about a store is
//! opaque to the index. The header bytes returned by `make_store_builder`
//! travel through the partition metadata and come back verbatim to
//! `make_store`. For the local backend they are the UTF-8 relative path of
//! the segment file.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{spawn_active_store, spawn_passive_store, StoreHandle};
use crate::error::{StorageError, StorageResult};
use crate::fs::FsHandle;
use crate::slice::TableSlice;

pub type SliceSender = mpsc::Sender<TableSlice>;

/// Factory surface of a store implementation.
pub trait StoreBackend: Send + Sync {
    /// Spawn a store builder for a new partition. Returns the query handle,
    /// the ingest sender, and the opaque header identifying the store.
    fn make_store_builder(&self, id: Uuid) -> (StoreHandle, SliceSender, Bytes);

    /// Spawn a reader for a persisted store from its header bytes.
    fn make_store(&self, header: &[u8]) -> StorageResult<StoreHandle>;
}

/// Relative path of a partition's segment file.
pub fn store_path_for_partition(id: Uuid) -> PathBuf {
    PathBuf::from("archive").join(format!("{id}.store"))
}

/// The local segment-store backend.
pub struct LocalStoreBackend {
    fs: FsHandle,
    max_segment_size: usize,
    ingest_buffer: usize,
}

impl LocalStoreBackend {
    pub fn new(fs: FsHandle, max_segment_size: usize, ingest_buffer: usize) -> Self {
        Self {
            fs,
            max_segment_size,
            ingest_buffer,
        }
    }
}

impl StoreBackend for LocalStoreBackend {
    fn make_store_builder(&self, id: Uuid) -> (StoreHandle, SliceSender, Bytes) {
        let path = store_path_for_partition(id);
        let header = Bytes::from(path.to_string_lossy().into_owned());
        let (handle, slices) = spawn_active_store(
            self.fs.clone(),
            path,
            id,
            self.max_segment_size,
            self.ingest_buffer,
        );
        (handle, slices, header)
    }

    fn make_store(&self, header: &[u8]) -> StorageResult<StoreHandle> {
        let path = std::str::from_utf8(header)
            .map_err(|_| StorageError::Format("store header is not a UTF-8 path".into()))?;
        Ok(spawn_passive_store(self.fs.clone(), PathBuf::from(path)))
    }
}
