// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The passive store: serves lookups and erases over one on-disk segment.
//!
//! ```text
//!                mmap chunk             any request
//! Loading ───────────────────────▶ Ready ─────────────▶ Ready
//!    │          segment parsed
//!    ▼
//! Failed (exits)
//! ```
//!
//! Requests arriving before the segment is loaded park in a deferred queue
//! and are re-dispatched in FIFO order once loading completes, so pre-load
//! request order is preserved. If loading fails, every deferred request fails
//! with a lookup error and the actor exits.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use super::{handle_lookup, StoreHandle, StoreRequest};
use crate::error::{StorageError, StorageResult};
use crate::fs::FsHandle;
use crate::ids::IdSet;
use crate::query::Query;
use crate::segment::Segment;

type Deferred = (Query, IdSet, oneshot::Sender<StorageResult<()>>);

/// Spawn a passive store reading the segment at `path` (relative to the
/// filesystem actor's root).
pub fn spawn_passive_store(fs: FsHandle, path: PathBuf) -> StoreHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(run(fs, path, rx));
    StoreHandle::new(tx)
}

async fn run(fs: FsHandle, path: PathBuf, mut rx: mpsc::UnboundedReceiver<StoreRequest>) {
    let mut deferred: Vec<Deferred> = Vec::new();

    // Loading: accept requests but only park them.
    let mmap = fs.mmap(path.clone());
    tokio::pin!(mmap);
    let loaded = loop {
        tokio::select! {
            chunk = &mut mmap => break chunk.and_then(|c| Segment::decode(&c)),
            req = rx.recv() => match req {
                Some(StoreRequest::Query { query, ids, reply }) => {
                    deferred.push((query, ids, reply));
                }
                Some(StoreRequest::Flush { reply }) => {
                    let _ = reply.send(Ok(()));
                }
                None => {
                    fail_deferred(deferred);
                    return;
                }
            },
        }
    };

    let mut segment = match loaded {
        Ok(segment) => segment,
        Err(e) => {
            error!("could not load segment from {}: {e}", path.display());
            fail_deferred(deferred);
            return;
        }
    };

    debug!(
        "passive store {} delegates {} deferred evaluations",
        segment.id(),
        deferred.len()
    );
    for (query, ids, reply) in deferred {
        handle(&fs, &path, &mut segment, query, ids, reply).await;
    }

    // Ready.
    while let Some(req) = rx.recv().await {
        match req {
            StoreRequest::Query { query, ids, reply } => {
                handle(&fs, &path, &mut segment, query, ids, reply).await;
            }
            StoreRequest::Flush { reply } => {
                let _ = reply.send(Ok(()));
            }
        }
    }
}

fn fail_deferred(deferred: Vec<Deferred>) {
    for (_, _, reply) in deferred {
        let _ = reply.send(Err(StorageError::store_down()));
    }
}

async fn handle(
    fs: &FsHandle,
    path: &Path,
    segment: &mut Segment,
    query: Query,
    ids: IdSet,
    reply: oneshot::Sender<StorageResult<()>>,
) {
    let result = if query.is_erase() {
        erase(fs, path, segment, &ids).await
    } else {
        let slices = segment.lookup(&ids);
        handle_lookup(&query, &ids, &slices)
    };
    let _ = reply.send(result);
}

/// Copy the segment without `ids`, write it next to the current file, and
/// atomically rename over it. The rename is the commit point: on any failure
/// before it returns, the in-memory segment is retained and on-disk state is
/// unchanged.
async fn erase(
    fs: &FsHandle,
    path: &Path,
    segment: &mut Segment,
    ids: &IdSet,
) -> StorageResult<()> {
    let new_segment = segment.copy_without(ids);
    let data = new_segment.encode()?;
    // Re-use the old filename so the partition header referencing this store
    // does not need rewriting.
    let next = next_path(path);
    if let Err(e) = fs.write(next.clone(), data).await {
        error!("failed to write replacement segment {}: {e}", segment.id());
        return Err(e);
    }
    if let Err(e) = fs.rename(next, path.to_path_buf()).await {
        error!("failed to replace segment {}: {e}", segment.id());
        return Err(e);
    }
    *segment = new_segment;
    Ok(())
}

/// `<path>.next`, the staging name of the atomic replace protocol.
pub(crate) fn next_path(path: &Path) -> PathBuf {
    let mut next = path.as_os_str().to_owned();
    next.push(".next");
    PathBuf::from(next)
}
