// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Partition stores.
//!
//! A store serves id-based lookups over one segment. The active store answers
//! from its in-memory builder while ingest streams in; the passive store
//! answers from an on-disk segment loaded on demand. Both share one lookup
//! handler so the query-mode semantics cannot drift apart.

mod active;
mod backend;
mod passive;

pub use active::spawn_active_store;
pub use backend::{store_path_for_partition, LocalStoreBackend, SliceSender, StoreBackend};
pub use passive::spawn_passive_store;

use tokio::sync::{mpsc, oneshot};

use crate::error::{StorageError, StorageResult};
use crate::expr::{tailor, Checker};
use crate::ids::IdSet;
use crate::query::{CountMode, ExtractPolicy, Query, QueryCmd, QueryReply};
use crate::slice::TableSlice;

pub(crate) enum StoreRequest {
    Query {
        query: Query,
        ids: IdSet,
        reply: oneshot::Sender<StorageResult<()>>,
    },
    /// Seal and persist; only meaningful for the active store.
    Flush {
        reply: oneshot::Sender<StorageResult<()>>,
    },
}

/// Cheap handle to a store actor. The actor shuts down when the last handle
/// drops.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreRequest>,
}

impl StoreHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StoreRequest>) -> Self {
        Self { tx }
    }

    /// Run a query over the store. Resolves once the store has fanned all
    /// results to the query's sink (or, for erase, once the commit is
    /// complete).
    pub async fn query(&self, query: Query, ids: IdSet) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StoreRequest::Query {
                query,
                ids,
                reply: tx,
            })
            .map_err(|_| StorageError::store_down())?;
        rx.await.map_err(|_| StorageError::store_down())?
    }

    /// Seal the store's builder and persist the segment.
    pub async fn flush(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(StoreRequest::Flush { reply: tx })
            .map_err(|_| StorageError::store_down())?;
        rx.await.map_err(|_| StorageError::store_down())?
    }
}

/// Query-mode dispatch shared by the active and passive store.
///
/// `slices` is the segment-level lookup result for `ids`; records are
/// filtered here. A tailoring failure for any slice fails the whole request
/// before a single result is sent.
pub(crate) fn handle_lookup(
    query: &Query,
    ids: &IdSet,
    slices: &[TableSlice],
) -> StorageResult<()> {
    let mut checkers = Vec::with_capacity(slices.len());
    for slice in slices {
        if query.expr.is_trivially_true() {
            checkers.push(Checker::accept_all());
        } else {
            checkers.push(tailor(&query.expr, slice.layout())?);
        }
    }
    match &query.cmd {
        QueryCmd::Count { mode, sink } => {
            if *mode == CountMode::Estimate {
                debug_assert!(false, "count.estimate reached the store layer");
                return Err(StorageError::InvalidQuery(
                    "count.estimate must be answered from synopses".into(),
                ));
            }
            for (slice, checker) in slices.iter().zip(&checkers) {
                let result = slice.count_matching(checker, ids);
                let _ = sink.send(QueryReply::Count(result));
            }
        }
        QueryCmd::Extract { policy, sink } => {
            for (slice, checker) in slices.iter().zip(&checkers) {
                match policy {
                    ExtractPolicy::PreserveIds => {
                        for sub_slice in slice.select(ids) {
                            if query.expr.is_trivially_true() {
                                let _ = sink.send(QueryReply::Slice(sub_slice));
                            } else {
                                let hits = sub_slice.evaluate(checker);
                                for final_slice in sub_slice.select(&hits) {
                                    let _ = sink.send(QueryReply::Slice(final_slice));
                                }
                            }
                        }
                    }
                    ExtractPolicy::DropIds => {
                        if let Some(final_slice) = slice.filter(checker, ids) {
                            let _ = sink.send(QueryReply::Slice(final_slice));
                        }
                    }
                }
            }
        }
        QueryCmd::Erase { .. } => {
            // The stores special-case erase before ever calling this.
            unreachable!("cannot look up an erase query");
        }
    }
    Ok(())
}
