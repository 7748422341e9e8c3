// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Passive-partition loading and the bounded in-memory cache.
//!
//! The factory spawns a passive store for a persisted partition on demand;
//! the cache keeps a bounded number of them alive, evicting the least
//! recently used. An evicted store actor shuts down once its last external
//! reference goes away. Partitions that are still persisting are pinned in a
//! separate map owned by the index and never pass through this cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tracing::debug;
use uuid::Uuid;

use crate::error::StorageResult;
use crate::store::{store_path_for_partition, StoreBackend, StoreHandle};

/// Loads passive partitions from disk by id.
pub struct PartitionFactory {
    backend: Arc<dyn StoreBackend>,
}

impl PartitionFactory {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    pub fn load(&self, id: Uuid) -> StorageResult<StoreHandle> {
        let header = store_path_for_partition(id);
        self.backend.make_store(header.to_string_lossy().as_bytes())
    }
}

/// Bounded map of loaded passive partitions with least-recently-used
/// eviction.
pub struct PartitionCache {
    partitions: LruCache<Uuid, StoreHandle>,
    factory: PartitionFactory,
}

impl PartitionCache {
    pub fn new(capacity: usize, factory: PartitionFactory) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            partitions: LruCache::new(capacity),
            factory,
        }
    }

    /// Fetch a partition, loading it through the factory on a miss.
    pub fn get_or_load(&mut self, id: Uuid) -> StorageResult<StoreHandle> {
        if let Some(handle) = self.partitions.get(&id) {
            return Ok(handle.clone());
        }
        let handle = self.factory.load(id)?;
        if let Some((evicted, _)) = self.partitions.push(id, handle.clone()) {
            if evicted != id {
                debug!("evicting passive partition {evicted}");
            }
        }
        Ok(handle)
    }

    /// Drop a cached partition, e.g. after its on-disk body changed.
    pub fn invalidate(&mut self, id: &Uuid) {
        self.partitions.pop(id);
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.partitions.contains(id)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::spawn_filesystem;
    use crate::store::LocalStoreBackend;

    fn test_cache(capacity: usize) -> PartitionCache {
        let dir = tempfile::tempdir().unwrap();
        let fs = spawn_filesystem(dir.path().to_path_buf(), false);
        let backend = Arc::new(LocalStoreBackend::new(fs, 1 << 20, 8));
        PartitionCache::new(capacity, PartitionFactory::new(backend))
    }

    #[tokio::test]
    async fn test_eviction_order() {
        let mut cache = test_cache(2);
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        cache.get_or_load(a).unwrap();
        cache.get_or_load(b).unwrap();
        // Touch `a` so `b` becomes the eviction victim.
        cache.get_or_load(a).unwrap();
        cache.get_or_load(c).unwrap();
        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_hit_reuses_actor() {
        let mut cache = test_cache(2);
        let id = Uuid::new_v4();
        cache.get_or_load(id).unwrap();
        cache.get_or_load(id).unwrap();
        assert_eq!(cache.len(), 1);
    }
}
