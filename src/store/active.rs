// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The active store: accepts streamed slices into a segment builder and
//! answers lookups straight from memory.
//!
//! Ingest arrives over a bounded channel, so a slow store back-pressures the
//! producer instead of buffering without bound. Erase is implemented by
//! sealing the builder, erasing, resetting it to the same id, and replaying
//! the surviving slices. A flush request seals the builder and persists the
//! segment; the store then keeps serving queries from the sealed in-memory
//! segment until the last handle drops.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use super::{handle_lookup, StoreHandle, StoreRequest};
use crate::error::StorageResult;
use crate::fs::FsHandle;
use crate::ids::IdSet;
use crate::segment::{Segment, SegmentBuilder};
use crate::slice::TableSlice;

enum Contents {
    Building(SegmentBuilder),
    Sealed(Segment),
}

/// Spawn an active store writing to `path` on flush. Returns the query handle
/// and the bounded ingest sender.
pub fn spawn_active_store(
    fs: FsHandle,
    path: PathBuf,
    id: Uuid,
    max_segment_size: usize,
    ingest_buffer: usize,
) -> (StoreHandle, mpsc::Sender<TableSlice>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let (slice_tx, slice_rx) = mpsc::channel(ingest_buffer);
    tokio::spawn(run(fs, path, id, max_segment_size, rx, slice_rx));
    (StoreHandle::new(tx), slice_tx)
}

async fn run(
    fs: FsHandle,
    path: PathBuf,
    id: Uuid,
    max_segment_size: usize,
    mut rx: mpsc::UnboundedReceiver<StoreRequest>,
    slice_rx: mpsc::Receiver<TableSlice>,
) {
    let mut contents = Contents::Building(SegmentBuilder::new(id, max_segment_size));
    let mut flushed = false;
    let mut ingest = Some(slice_rx);

    loop {
        tokio::select! {
            req = rx.recv() => match req {
                Some(StoreRequest::Query { query, ids, reply }) => {
                    // Slices already handed off by the producer must be
                    // visible to this query, regardless of channel arrival
                    // order.
                    drain_ingest(&mut contents, &mut ingest, id);
                    let result = if query.is_erase() {
                        erase(&mut contents, &ids)
                    } else {
                        let slices = match &contents {
                            Contents::Building(builder) => builder.lookup(&ids),
                            Contents::Sealed(segment) => segment.lookup(&ids),
                        };
                        handle_lookup(&query, &ids, &slices)
                    };
                    let _ = reply.send(result);
                }
                Some(StoreRequest::Flush { reply }) => {
                    drain_ingest(&mut contents, &mut ingest, id);
                    let result = flush(&fs, &path, &mut contents).await;
                    flushed |= result.is_ok();
                    let _ = reply.send(result);
                }
                None => break,
            },
            slice = recv_slice(&mut ingest), if ingest.is_some() => match slice {
                Some(slice) => {
                    if let Contents::Building(builder) = &mut contents {
                        if let Err(e) = builder.add(slice) {
                            error!("failed to add table slice to store {id}: {e}");
                        }
                    } else {
                        error!("dropping slice streamed into sealed store {id}");
                    }
                }
                None => ingest = None,
            },
        }
    }

    // Orderly exit: a non-empty builder that was never flushed still goes to
    // disk.
    drain_ingest(&mut contents, &mut ingest, id);
    let has_events = matches!(&contents, Contents::Building(builder) if builder.num_events() > 0);
    if !flushed && has_events {
        if let Err(e) = flush(&fs, &path, &mut contents).await {
            error!("failed to flush store {id} on exit: {e}");
        }
    }
    debug!("active store {id} exiting");
}

async fn recv_slice(ingest: &mut Option<mpsc::Receiver<TableSlice>>) -> Option<TableSlice> {
    match ingest {
        Some(rx) => rx.recv().await,
        None => None,
    }
}

fn drain_ingest(contents: &mut Contents, ingest: &mut Option<mpsc::Receiver<TableSlice>>, id: Uuid) {
    let Some(rx) = ingest else { return };
    while let Ok(slice) = rx.try_recv() {
        if let Contents::Building(builder) = contents {
            if let Err(e) = builder.add(slice) {
                error!("failed to add table slice to store {id}: {e}");
            }
        } else {
            error!("dropping slice streamed into sealed store {id}");
        }
    }
}

fn erase(contents: &mut Contents, ids: &IdSet) -> StorageResult<()> {
    match contents {
        Contents::Building(builder) => {
            let segment = builder.finish();
            let id = segment.id();
            let survivors = segment.erase(ids);
            builder.reset(id);
            for slice in survivors {
                if !slice.is_empty() {
                    builder.add(slice)?;
                }
            }
        }
        Contents::Sealed(segment) => {
            *segment = segment.copy_without(ids);
        }
    }
    Ok(())
}

async fn flush(fs: &FsHandle, path: &PathBuf, contents: &mut Contents) -> StorageResult<()> {
    if let Contents::Building(builder) = contents {
        let segment = builder.finish();
        let result = match segment.encode() {
            Ok(data) => fs.write(path.clone(), data).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            // Keep the data: replay the sealed slices into the builder so a
            // later flush can retry.
            builder.reset(segment.id());
            for slice in segment.slices() {
                let _ = builder.add(slice.clone());
            }
            return Err(e);
        }
        debug!("flushed segment {} to {}", segment.id(), path.display());
        *contents = Contents::Sealed(segment);
    }
    Ok(())
}
