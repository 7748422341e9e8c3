// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Query supervisors: short-lived workers that fan one query across a batch
//! of partitions and aggregate their completion signals.
//!
//! A supervisor registers itself with its master on spawn and re-registers
//! after every job, so the idle pool size is invariant across queries.
//! Partition failures surface to the query's sink as errors; the supervisor
//! still waits for the remaining partitions before sending the final `Done`.

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ids::IdSet;
use crate::query::{Query, QueryReply};
use crate::store::StoreHandle;

/// A batch of partitions to fan one query across.
pub struct SupervisorJob {
    pub query_id: Uuid,
    pub query: Query,
    pub ids: IdSet,
    pub partitions: Vec<(Uuid, StoreHandle)>,
}

/// The batch a worker just completed, reported alongside re-registration.
pub struct FinishedBatch {
    pub query_id: Uuid,
    pub erase: bool,
    pub partitions: Vec<Uuid>,
}

/// Sent to the master whenever a worker is ready for a job.
pub struct WorkerEvent {
    pub worker: SupervisorHandle,
    /// `None` for the initial registration on spawn.
    pub finished: Option<FinishedBatch>,
}

pub type MasterHandle = mpsc::UnboundedSender<WorkerEvent>;

#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::UnboundedSender<SupervisorJob>,
}

impl SupervisorHandle {
    /// Hand a job to the worker. Returns false if the worker is gone.
    pub fn supervise(&self, job: SupervisorJob) -> bool {
        self.tx.send(job).is_ok()
    }
}

/// Spawn a supervisor registered with `master`.
pub fn spawn_supervisor(master: MasterHandle) -> SupervisorHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SupervisorHandle { tx };
    tokio::spawn(run(master, rx, handle.clone()));
    handle
}

async fn run(
    master: MasterHandle,
    mut rx: mpsc::UnboundedReceiver<SupervisorJob>,
    handle: SupervisorHandle,
) {
    let mut finished = None;
    loop {
        if master
            .send(WorkerEvent {
                worker: handle.clone(),
                finished: finished.take(),
            })
            .is_err()
        {
            break;
        }
        let job = tokio::select! {
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
            // The master going away orphans this worker; exit instead of
            // waiting for a job that can never come.
            _ = master.closed() => break,
        };
        let SupervisorJob {
            query_id,
            query,
            ids,
            partitions,
        } = job;
        debug!(
            "supervisor fans query {query_id} across {} partitions",
            partitions.len()
        );
        let partition_ids = partitions.iter().map(|(id, _)| *id).collect();
        let sink = query.sink().clone();
        let mut pending: FuturesUnordered<_> = partitions
            .into_iter()
            .map(|(partition_id, store)| {
                let query = query.clone();
                let ids = ids.clone();
                async move { (partition_id, store.query(query, ids).await) }
            })
            .collect();
        while let Some((partition_id, result)) = pending.next().await {
            if let Err(e) = result {
                warn!("partition {partition_id} failed query {query_id}: {e}");
                let _ = sink.send(QueryReply::Error(e));
            }
        }
        let _ = sink.send(QueryReply::Done);
        finished = Some(FinishedBatch {
            query_id,
            erase: query.is_erase(),
            partitions: partition_ids,
        });
    }
}
