// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Storage and query core for structured telemetry events.
//!
//! Events ingest as [`TableSlice`]s into the single active partition, seal
//! into immutable on-disk [`Segment`]s grouped into partitions, and are
//! queried with expression-based count/extract/erase commands fanned across
//! candidate partitions by a pool of query supervisors.
//!
//! ```no_run
//! use argus::{CountMode, Expression, IdSet, Index, Query, StorageOptions};
//!
//! # async fn example() -> argus::StorageResult<()> {
//! let index = Index::open(StorageOptions::new("/var/lib/argus")).await?;
//! let (sink, mut results) = argus::response_channel();
//! let query = Query::count(Expression::True, CountMode::Exact, sink);
//! let cursor = index.query(query, IdSet::from_range(0, 10_000)).await?;
//! # let _ = (cursor, results.recv().await);
//! # Ok(())
//! # }
//! ```

#![deny(unused_must_use)]

mod error;
pub mod expr;
pub mod fs;
pub mod ids;
pub mod index;
pub mod meta_index;
mod options;
pub mod partition;
pub mod query;
pub mod segment;
pub mod slice;
pub mod store;
pub mod supervisor;
pub mod synopsis;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use expr::{tailor, Checker, CompareOp, Expression, MetaPredicate};
pub use ids::IdSet;
pub use index::{Index, IndexStatus};
pub use options::StorageOptions;
pub use query::{
    response_channel, CountMode, ExtractPolicy, Priority, Query, QueryCursor, QueryReply,
};
pub use segment::{Segment, SegmentBuilder};
pub use slice::{Encoding, TableSlice};
pub use synopsis::PartitionSynopsis;
pub use types::{Field, FieldType, Layout, Value};
