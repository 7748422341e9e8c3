// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The index: owner of the partition lifecycle and the query scheduler.
//!
//! Exactly one partition is active at any time; slices stream into its store
//! until the partition's capacity is spent, at which point the index
//! decommissions it (seal, flush, synopsis extraction) and starts a fresh
//! one. Partitions being persisted are pinned in the `unpersisted` map and
//! keep serving queries from memory; once their synopsis is on disk they
//! graduate to the persisted set and are loaded on demand through the
//! passive-partition cache.
//!
//! Query dispatch is gated by the idle supervisor pool. Excess queries wait
//! in a two-queue backlog (normal before low) that drains whenever a worker
//! re-registers.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::fs::{spawn_filesystem, FsHandle};
use crate::ids::IdSet;
use crate::meta_index::MetaIndex;
use crate::options::StorageOptions;
use crate::partition::{PartitionCache, PartitionFactory};
use crate::query::{Priority, Query, QueryCursor, QueryReply};
use crate::segment::Segment;
use crate::slice::TableSlice;
use crate::store::{
    store_path_for_partition, LocalStoreBackend, SliceSender, StoreBackend, StoreHandle,
};
use crate::supervisor::{spawn_supervisor, SupervisorHandle, SupervisorJob, WorkerEvent};
use crate::synopsis::PartitionSynopsis;
use crate::types::Layout;

const INDEX_FILE_NAME: &str = "index.bin";
const INDEX_MAGIC: u32 = 0x4149_4458; // "AIDX"
const INDEX_VERSION: u32 = 1;

/// Persisted index root: layout statistics plus the persisted partition set.
#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexMeta {
    stats: HashMap<String, u64>,
    partitions: Vec<Uuid>,
}

fn encode_index_meta(meta: &IndexMeta) -> StorageResult<Bytes> {
    let body = bincode::serialize(meta)?;
    let mut out = BytesMut::with_capacity(8 + body.len());
    out.put_u32(INDEX_MAGIC);
    out.put_u32(INDEX_VERSION);
    out.put_slice(&body);
    Ok(out.freeze())
}

fn decode_index_meta(data: &[u8]) -> StorageResult<IndexMeta> {
    if data.len() < 8 {
        return Err(StorageError::Format("index state truncated".into()));
    }
    let mut buf = data;
    let magic = buf.get_u32();
    if magic != INDEX_MAGIC {
        return Err(StorageError::Format(format!("bad index magic {magic:#010x}")));
    }
    let version = buf.get_u32();
    if version != INDEX_VERSION {
        return Err(StorageError::Format(format!(
            "unsupported index version {version}"
        )));
    }
    // Unknown trailing fields are ignored for forward compatibility.
    Ok(bincode::deserialize(buf)?)
}

/// Read a partition's segment, summarize it, and persist the synopsis.
async fn extract_partition_synopsis(
    fs: &FsHandle,
    synopsis_dir: &Path,
    id: Uuid,
) -> StorageResult<PartitionSynopsis> {
    let chunk = fs.read(store_path_for_partition(id)).await?;
    let segment = Segment::decode(&chunk)?;
    let synopsis = PartitionSynopsis::from_segment(&segment);
    fs.write(synopsis_dir.join(id.to_string()), synopsis.encode()?)
        .await?;
    Ok(synopsis)
}

/// Point-in-time introspection of the index actor.
#[derive(Clone, Debug)]
pub struct IndexStatus {
    /// Events indexed per layout name.
    pub layout_stats: HashMap<String, u64>,
    pub persisted_partitions: usize,
    pub unpersisted_partitions: usize,
    /// Passive partitions currently loaded in memory.
    pub inmem_partitions: usize,
    pub active_partition_events: u64,
    pub idle_workers: usize,
    pub backlogged_queries: usize,
}

enum IndexRequest {
    Query {
        query: Query,
        ids: IdSet,
        priority: Priority,
        reply: oneshot::Sender<StorageResult<QueryCursor>>,
    },
    Resume {
        query_id: Uuid,
        reply: oneshot::Sender<StorageResult<u32>>,
    },
    /// A partition's segment and synopsis reached disk (or failed to).
    Persisted {
        id: Uuid,
        result: StorageResult<PartitionSynopsis>,
    },
    Flush {
        reply: oneshot::Sender<StorageResult<()>>,
    },
    Status {
        reply: oneshot::Sender<IndexStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<StorageResult<()>>,
    },
}

enum Job {
    New {
        query: Query,
        ids: IdSet,
        reply: oneshot::Sender<StorageResult<QueryCursor>>,
    },
    Resume {
        query_id: Uuid,
        reply: oneshot::Sender<StorageResult<u32>>,
    },
}

/// Received but unprocessed queries, drained normal-first.
#[derive(Default)]
struct QueryBacklog {
    normal: VecDeque<Job>,
    low: VecDeque<Job>,
}

impl QueryBacklog {
    fn emplace(&mut self, priority: Priority, job: Job) {
        match priority {
            Priority::Normal => self.normal.push_back(job),
            Priority::Low => self.low.push_back(job),
        }
    }

    fn take_next(&mut self) -> Option<Job> {
        self.normal.pop_front().or_else(|| self.low.pop_front())
    }
}

/// Pending lookup state for one query.
struct QueryState {
    query: Query,
    ids: IdSet,
    /// Unscheduled candidate partitions.
    partitions: Vec<Uuid>,
}

/// The single active (read/write) partition.
struct ActivePartition {
    id: Uuid,
    store: StoreHandle,
    slices: SliceSender,
    /// Remaining capacity in events.
    capacity: u64,
    events: u64,
    /// Layout groups seen so far, for conflict checks before streaming.
    layouts: HashMap<String, Layout>,
}

struct IndexState {
    options: StorageOptions,
    fs: FsHandle,
    backend: Arc<dyn StoreBackend>,
    tx: mpsc::UnboundedSender<IndexRequest>,

    active: Option<ActivePartition>,
    /// Partitions currently persisting; pinned, never evicted.
    unpersisted: HashMap<Uuid, StoreHandle>,
    inmem_partitions: PartitionCache,
    persisted_partitions: HashSet<Uuid>,
    meta_index: MetaIndex,

    stats: HashMap<String, u64>,
    next_id: u64,

    backlog: QueryBacklog,
    pending: HashMap<Uuid, QueryState>,
    idle_workers: Vec<SupervisorHandle>,

    /// Partitions whose persist job failed; retried once on shutdown.
    failed_persists: HashSet<Uuid>,
    shutting_down: bool,
    shutdown_reply: Option<oneshot::Sender<StorageResult<()>>>,
}

/// Handle to the index actor.
pub struct Index {
    tx: mpsc::UnboundedSender<IndexRequest>,
    ingest: mpsc::Sender<TableSlice>,
}

impl Index {
    /// Open (or create) the index rooted at `options.path` and start
    /// accepting ingest and queries.
    pub async fn open(options: StorageOptions) -> StorageResult<Index> {
        let fs = spawn_filesystem(options.path.clone(), options.enable_fsync);
        let backend: Arc<dyn StoreBackend> = Arc::new(LocalStoreBackend::new(
            fs.clone(),
            options.max_segment_size,
            options.ingest_buffer,
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        let (ingest_tx, ingest_rx) = mpsc::channel(options.ingest_buffer);
        let (idle_tx, idle_rx) = mpsc::unbounded_channel();

        let mut state = IndexState {
            fs,
            backend: backend.clone(),
            tx: tx.clone(),
            active: None,
            unpersisted: HashMap::new(),
            inmem_partitions: PartitionCache::new(
                options.max_inmem_partitions,
                PartitionFactory::new(backend),
            ),
            persisted_partitions: HashSet::new(),
            meta_index: MetaIndex::default(),
            stats: HashMap::new(),
            next_id: 0,
            backlog: QueryBacklog::default(),
            pending: HashMap::new(),
            idle_workers: Vec::new(),
            failed_persists: HashSet::new(),
            shutting_down: false,
            shutdown_reply: None,
            options,
        };
        state.load_from_disk().await?;

        for _ in 0..state.options.num_workers {
            spawn_supervisor(idle_tx.clone());
        }
        tokio::spawn(state.run(rx, idle_rx, ingest_rx));
        Ok(Index { tx, ingest: ingest_tx })
    }

    /// Stream a slice into the active partition. Back-pressures when the
    /// ingest buffer is full.
    pub async fn ingest(&self, slice: TableSlice) -> StorageResult<()> {
        self.ingest
            .send(slice)
            .await
            .map_err(|_| StorageError::Lookup("index terminated".into()))
    }

    pub async fn query(&self, query: Query, ids: IdSet) -> StorageResult<QueryCursor> {
        self.query_with_priority(query, ids, Priority::Normal).await
    }

    pub async fn query_with_priority(
        &self,
        query: Query,
        ids: IdSet,
        priority: Priority,
    ) -> StorageResult<QueryCursor> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Query {
                query,
                ids,
                priority,
                reply: tx,
            })
            .map_err(|_| StorageError::Lookup("index terminated".into()))?;
        rx.await
            .map_err(|_| StorageError::Lookup("index terminated".into()))?
    }

    /// Schedule the next batch of partitions for a running query. Returns the
    /// number of partitions scheduled; zero means the cursor is exhausted.
    pub async fn resume(&self, query_id: Uuid) -> StorageResult<u32> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Resume {
                query_id,
                reply: tx,
            })
            .map_err(|_| StorageError::Lookup("index terminated".into()))?;
        rx.await
            .map_err(|_| StorageError::Lookup("index terminated".into()))?
    }

    /// Current status metrics of the index actor.
    pub async fn status(&self) -> StorageResult<IndexStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Status { reply: tx })
            .map_err(|_| StorageError::Lookup("index terminated".into()))?;
        rx.await
            .map_err(|_| StorageError::Lookup("index terminated".into()))
    }

    /// Persist the index root now.
    pub async fn flush(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Flush { reply: tx })
            .map_err(|_| StorageError::Lookup("index terminated".into()))?;
        rx.await
            .map_err(|_| StorageError::Lookup("index terminated".into()))?
    }

    /// Graceful shutdown: seals the active partition, waits for every
    /// unpersisted partition, and persists the index root.
    pub async fn shutdown(&self) -> StorageResult<()> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(IndexRequest::Shutdown { reply: tx })
            .map_err(|_| StorageError::Lookup("index terminated".into()))?;
        rx.await
            .map_err(|_| StorageError::Lookup("index terminated".into()))?
    }
}

impl IndexState {
    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<IndexRequest>,
        mut idle_rx: mpsc::UnboundedReceiver<WorkerEvent>,
        ingest_rx: mpsc::Receiver<TableSlice>,
    ) {
        let mut ingest = Some(ingest_rx);
        loop {
            tokio::select! {
                // The ingest stream drains ahead of control messages so a
                // client that completed an ingest sees its slices reflected
                // in anything it asks afterwards.
                biased;
                slice = recv_slice(&mut ingest), if ingest.is_some() => match slice {
                    Some(slice) => self.handle_ingest(slice).await,
                    None => ingest = None,
                },
                Some(event) = idle_rx.recv() => self.handle_worker_event(event).await,
                req = rx.recv() => match req {
                    Some(req) => {
                        if self.handle_request(req).await {
                            break;
                        }
                    }
                    // All index handles dropped; the active store flushes
                    // itself once its handle goes away below.
                    None => break,
                },
            }
        }
        debug!("index actor exiting");
    }

    /// Returns true once shutdown is complete and the loop should stop.
    async fn handle_request(&mut self, req: IndexRequest) -> bool {
        match req {
            IndexRequest::Query {
                query,
                ids,
                priority,
                reply,
            } => {
                if self.shutting_down {
                    let _ = reply.send(Err(StorageError::Lookup("index shutting down".into())));
                    return false;
                }
                let job = Job::New { query, ids, reply };
                if self.idle_workers.is_empty() {
                    self.backlog.emplace(priority, job);
                } else {
                    self.run_job(job);
                }
            }
            IndexRequest::Resume { query_id, reply } => {
                let job = Job::Resume { query_id, reply };
                if self.idle_workers.is_empty() {
                    self.backlog.emplace(Priority::Normal, job);
                } else {
                    self.run_job(job);
                }
            }
            IndexRequest::Persisted { id, result } => {
                self.handle_persisted(id, result).await;
                return self.try_finish_shutdown().await;
            }
            IndexRequest::Flush { reply } => {
                let _ = reply.send(self.flush_to_disk().await);
            }
            IndexRequest::Status { reply } => {
                let _ = reply.send(IndexStatus {
                    layout_stats: self.stats.clone(),
                    persisted_partitions: self.persisted_partitions.len(),
                    unpersisted_partitions: self.unpersisted.len(),
                    inmem_partitions: self.inmem_partitions.len(),
                    active_partition_events: self.active.as_ref().map_or(0, |a| a.events),
                    idle_workers: self.idle_workers.len(),
                    backlogged_queries: self.backlog.normal.len() + self.backlog.low.len(),
                });
            }
            IndexRequest::Shutdown { reply } => {
                info!("index shutting down");
                self.shutting_down = true;
                self.shutdown_reply = Some(reply);
                match self.active.take() {
                    Some(active) if active.events > 0 => {
                        self.active = Some(active);
                        self.decommission_active_partition();
                    }
                    _ => {}
                }
                // One last chance for partitions whose persist job failed.
                for id in std::mem::take(&mut self.failed_persists) {
                    if let Some(store) = self.unpersisted.get(&id) {
                        self.spawn_persist_job(id, store.clone());
                    }
                }
                return self.try_finish_shutdown().await;
            }
        }
        false
    }

    async fn handle_persisted(&mut self, id: Uuid, result: StorageResult<PartitionSynopsis>) {
        match result {
            Ok(synopsis) => {
                if self.unpersisted.remove(&id).is_some() {
                    info!("partition {id} persisted ({} events)", synopsis.events);
                }
                self.failed_persists.remove(&id);
                self.persisted_partitions.insert(id);
                self.meta_index.add(id, synopsis);
                if let Err(e) = self.flush_to_disk().await {
                    error!("failed to persist index state: {e}");
                }
            }
            Err(e) => {
                // The partition stays pinned in `unpersisted` and keeps
                // serving from memory; new ingest continues elsewhere.
                error!("failed to persist partition {id}: {e}");
                if self.shutting_down {
                    error!("giving up on partition {id} during shutdown");
                    self.unpersisted.remove(&id);
                } else {
                    self.failed_persists.insert(id);
                }
            }
        }
    }

    async fn handle_worker_event(&mut self, event: WorkerEvent) {
        if let Some(batch) = event.finished {
            debug!("worker finished batch for query {}", batch.query_id);
            if batch.erase {
                self.refresh_synopses(batch.partitions);
            }
        }
        self.idle_workers.push(event.worker);
        self.drain_backlog();
    }

    /// Re-extract synopses after an erase so the meta-index reflects the new
    /// (possibly empty) contents.
    fn refresh_synopses(&mut self, partitions: Vec<Uuid>) {
        for id in partitions {
            if !self.persisted_partitions.contains(&id) {
                // In-memory partitions get a fresh synopsis at seal time.
                continue;
            }
            let fs = self.fs.clone();
            let synopsis_dir = self.options.synopsis_path.clone();
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let result = extract_partition_synopsis(&fs, &synopsis_dir, id).await;
                let _ = tx.send(IndexRequest::Persisted { id, result });
            });
        }
    }

    fn drain_backlog(&mut self) {
        while !self.idle_workers.is_empty() {
            let Some(job) = self.backlog.take_next() else {
                break;
            };
            self.run_job(job);
        }
    }

    fn run_job(&mut self, job: Job) {
        match job {
            Job::New { query, ids, reply } => {
                let cursor = self.dispatch_query(query, ids);
                let _ = reply.send(cursor);
            }
            Job::Resume { query_id, reply } => {
                let scheduled = self.schedule_batch(query_id, self.options.num_workers);
                let _ = reply.send(Ok(scheduled as u32));
            }
        }
    }

    fn dispatch_query(&mut self, query: Query, ids: IdSet) -> StorageResult<QueryCursor> {
        let query_id = Uuid::new_v4();
        let mut candidates: Vec<Uuid> = Vec::new();
        if let Some(active) = &self.active {
            if active.events > 0 {
                candidates.push(active.id);
            }
        }
        candidates.extend(self.unpersisted.keys().copied());
        candidates.extend(self.meta_index.candidates(&query.expr));
        let total = candidates.len() as u32;
        debug!("query {query_id} has {total} candidate partitions");
        if candidates.is_empty() {
            let _ = query.sink().send(QueryReply::Done);
            return Ok(QueryCursor {
                query_id,
                scheduled: 0,
                candidates: 0,
            });
        }
        self.pending.insert(
            query_id,
            QueryState {
                query,
                ids,
                partitions: candidates,
            },
        );
        let scheduled = self.schedule_batch(query_id, self.options.taste_partitions);
        Ok(QueryCursor {
            query_id,
            scheduled: scheduled as u32,
            candidates: total,
        })
    }

    /// Hand the next `batch_size` partitions of a query to an idle worker.
    fn schedule_batch(&mut self, query_id: Uuid, batch_size: usize) -> usize {
        let closed = match self.pending.get(&query_id) {
            None => return 0,
            Some(state) => state.query.sink().is_closed(),
        };
        if closed {
            // Client went away: abort remaining batch scheduling.
            debug!("client of query {query_id} went away, dropping query state");
            self.pending.remove(&query_id);
            return 0;
        }
        if self.idle_workers.is_empty() {
            return 0;
        }
        let (query, ids, batch) = {
            let state = self.pending.get_mut(&query_id).unwrap();
            let n = batch_size.min(state.partitions.len());
            if n == 0 {
                return 0;
            }
            let batch: Vec<Uuid> = state.partitions.drain(..n).collect();
            (state.query.clone(), state.ids.clone(), batch)
        };
        if self.pending[&query_id].partitions.is_empty() {
            self.pending.remove(&query_id);
        }
        let mut partitions = Vec::with_capacity(batch.len());
        for id in &batch {
            match self.collect_partition_actor(*id) {
                Ok(handle) => partitions.push((*id, handle)),
                Err(e) => {
                    warn!("could not collect partition {id} for query {query_id}: {e}");
                    let _ = query.sink().send(QueryReply::Error(e));
                }
            }
        }
        let worker = self.idle_workers.pop().unwrap();
        if !worker.supervise(SupervisorJob {
            query_id,
            query,
            ids,
            partitions,
        }) {
            warn!("query supervisor went down, dropping batch of query {query_id}");
        }
        batch.len()
    }

    /// Resolve a partition id to its store actor, spawning passive stores
    /// through the factory as needed.
    fn collect_partition_actor(&mut self, id: Uuid) -> StorageResult<StoreHandle> {
        if let Some(active) = &self.active {
            if active.id == id {
                return Ok(active.store.clone());
            }
        }
        if let Some(handle) = self.unpersisted.get(&id) {
            return Ok(handle.clone());
        }
        if self.persisted_partitions.contains(&id) {
            return self.inmem_partitions.get_or_load(id);
        }
        Err(StorageError::Lookup(format!("unknown partition {id}")))
    }

    async fn handle_ingest(&mut self, slice: TableSlice) {
        if self.shutting_down {
            return;
        }
        let events = slice.len() as u64;
        if events == 0 {
            return;
        }
        if slice.id_range().0 < self.next_id {
            error!(
                "dropping slice with non-monotone ids {:?} (next id {})",
                slice.id_range(),
                self.next_id
            );
            return;
        }
        if self.active.is_none() {
            self.create_active_partition();
        }
        let layout_name = slice.layout().name.clone();
        let next_id = slice.id_range().1;
        {
            let active = self.active.as_mut().unwrap();
            match active.layouts.entry(layout_name.clone()) {
                Entry::Occupied(entry) if entry.get() != slice.layout() => {
                    error!("dropping slice with conflicting layout {layout_name}");
                    return;
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(entry) => {
                    entry.insert(slice.layout().clone());
                }
            }
            if active.slices.send(slice).await.is_err() {
                error!("active store for partition {} went away", active.id);
                return;
            }
            active.events += events;
            active.capacity = active.capacity.saturating_sub(events);
        }
        self.next_id = next_id;
        *self.stats.entry(layout_name).or_default() += events;
        if self.active.as_ref().unwrap().capacity == 0 {
            self.decommission_active_partition();
            self.create_active_partition();
        }
    }

    fn create_active_partition(&mut self) {
        let id = Uuid::new_v4();
        let (store, slices, _header) = self.backend.make_store_builder(id);
        debug!("created new active partition {id}");
        self.active = Some(ActivePartition {
            id,
            store,
            slices,
            capacity: self.options.partition_capacity,
            events: 0,
            layouts: HashMap::new(),
        });
    }

    /// Seal the active partition: close its ingest stream, pin it as
    /// unpersisted, and kick off flush + synopsis extraction.
    fn decommission_active_partition(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        info!(
            "decommissioning active partition {} ({} events)",
            active.id, active.events
        );
        drop(active.slices);
        self.unpersisted.insert(active.id, active.store.clone());
        self.spawn_persist_job(active.id, active.store);
    }

    fn spawn_persist_job(&self, id: Uuid, store: StoreHandle) {
        let fs = self.fs.clone();
        let synopsis_dir = self.options.synopsis_path.clone();
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = async {
                store.flush().await?;
                extract_partition_synopsis(&fs, &synopsis_dir, id).await
            }
            .await;
            let _ = tx.send(IndexRequest::Persisted { id, result });
        });
    }

    async fn try_finish_shutdown(&mut self) -> bool {
        if !self.shutting_down || !self.unpersisted.is_empty() {
            return false;
        }
        if let Err(e) = self.flush_to_disk().await {
            error!("failed to persist index state on shutdown: {e}");
        }
        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(Ok(()));
        }
        true
    }

    async fn flush_to_disk(&self) -> StorageResult<()> {
        let meta = IndexMeta {
            stats: self.stats.clone(),
            partitions: self.persisted_partitions.iter().copied().sorted().collect(),
        };
        self.fs.write(INDEX_FILE_NAME, encode_index_meta(&meta)?).await
    }

    async fn load_from_disk(&mut self) -> StorageResult<()> {
        match self.fs.read(INDEX_FILE_NAME).await {
            Ok(bytes) => {
                let meta = decode_index_meta(&bytes)?;
                self.stats = meta.stats;
                for id in meta.partitions {
                    let synopsis = match self
                        .fs
                        .read(self.options.synopsis_path.join(id.to_string()))
                        .await
                    {
                        Ok(data) => PartitionSynopsis::decode(&data)?,
                        Err(e) => {
                            warn!("missing synopsis for partition {id}, re-extracting: {e}");
                            extract_partition_synopsis(&self.fs, &self.options.synopsis_path, id)
                                .await?
                        }
                    };
                    self.meta_index.add(id, synopsis);
                    self.persisted_partitions.insert(id);
                }
                info!(
                    "loaded {} persisted partitions from the index state",
                    self.persisted_partitions.len()
                );
            }
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no index state on disk, starting empty");
            }
            Err(e) => return Err(e),
        }
        self.adopt_orphans().await?;
        self.next_id = self
            .meta_index
            .iter()
            .filter_map(|(_, synopsis)| synopsis.id_range.map(|(_, end)| end))
            .max()
            .unwrap_or(0);
        Ok(())
    }

    /// Roll forward partitions whose flush completed but whose index.bin
    /// entry did not, and clean up interrupted erase staging files.
    async fn adopt_orphans(&mut self) -> StorageResult<()> {
        for path in self.fs.list_dir("archive").await? {
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(".store.next") {
                // Rename is the erase commit point; pre-erase state wins.
                warn!("removing interrupted erase staging file {name}");
                let _ = self
                    .fs
                    .remove_file(PathBuf::from("archive").join(name))
                    .await;
                continue;
            }
            let Some(stem) = name.strip_suffix(".store") else {
                continue;
            };
            let Ok(id) = Uuid::parse_str(stem) else {
                continue;
            };
            if self.persisted_partitions.contains(&id) {
                continue;
            }
            match extract_partition_synopsis(&self.fs, &self.options.synopsis_path, id).await {
                Ok(synopsis) => {
                    info!("adopted partition {id} not recorded in the index state");
                    for layout in &synopsis.layouts {
                        *self.stats.entry(layout.name.clone()).or_default() += layout.count;
                    }
                    self.meta_index.add(id, synopsis);
                    self.persisted_partitions.insert(id);
                }
                Err(e) => {
                    warn!("could not adopt partition file {name}: {e}");
                }
            }
        }
        Ok(())
    }
}

async fn recv_slice(ingest: &mut Option<mpsc::Receiver<TableSlice>>) -> Option<TableSlice> {
    match ingest {
        Some(rx) => rx.recv().await,
        None => None,
    }
}
