// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

use std::path::PathBuf;

/// Options for the storage core.
#[derive(Clone, Debug)]
pub struct StorageOptions {
    /// Root directory for persistent state (`index.bin`, `archive/`).
    pub path: PathBuf,
    /// Directory for partition synopses.
    pub synopsis_path: PathBuf,
    /// Maximum number of events a partition can hold before rotation.
    pub partition_capacity: u64,
    /// Soft byte limit consulted by segment builders.
    pub max_segment_size: usize,
    /// Maximum number of passive partitions loaded into memory.
    pub max_inmem_partitions: usize,
    /// Number of partitions scheduled immediately at query submission.
    pub taste_partitions: usize,
    /// Number of query supervisor workers.
    pub num_workers: usize,
    /// Capacity of the ingest channel into the active store.
    pub ingest_buffer: usize,
    /// Whether writes are followed by fdatasync.
    pub enable_fsync: bool,
}

impl StorageOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            synopsis_path: path.join("synopses"),
            path,
            partition_capacity: 1 << 20,
            max_segment_size: 128 << 20,
            max_inmem_partitions: 10,
            taste_partitions: 5,
            num_workers: 4,
            ingest_buffer: 64,
            enable_fsync: true,
        }
    }

    pub fn default_for_test() -> Self {
        let mut options = Self::new(PathBuf::new().join("argus.db"));
        options.partition_capacity = 1024;
        options.max_inmem_partitions = 4;
        options.enable_fsync = false;
        options
    }
}
