// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The query command surface.
//!
//! A query is an expression plus one of three commands; results stream to the
//! caller's sink while the final `Done` is delivered by the supervisor that
//! fanned the query out. Dropping the sink's receiver cancels the query:
//! further writes become no-ops and the index stops scheduling batches.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::StorageError;
use crate::expr::Expression;
use crate::slice::TableSlice;

/// Messages delivered to a query's response sink.
#[derive(Debug)]
pub enum QueryReply {
    /// A partial count from one slice.
    Count(u64),
    Slice(TableSlice),
    Error(StorageError),
    /// All partitions of the current batch have reported.
    Done,
}

pub type QuerySink = mpsc::UnboundedSender<QueryReply>;
pub type QueryReceiver = mpsc::UnboundedReceiver<QueryReply>;

/// Make a response sink and its receiving end.
pub fn response_channel() -> (QuerySink, QueryReceiver) {
    mpsc::unbounded_channel()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CountMode {
    Exact,
    /// Answered from synopses upstream; reaching a store with this mode is a
    /// logic error.
    Estimate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractPolicy {
    PreserveIds,
    DropIds,
}

/// Backlog priority of a query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    Normal,
    Low,
}

#[derive(Clone, Debug)]
pub enum QueryCmd {
    Count { mode: CountMode, sink: QuerySink },
    Extract { policy: ExtractPolicy, sink: QuerySink },
    Erase { sink: QuerySink },
}

/// An expression-based query against the corpus.
#[derive(Clone, Debug)]
pub struct Query {
    pub expr: Expression,
    pub cmd: QueryCmd,
}

impl Query {
    pub fn count(expr: Expression, mode: CountMode, sink: QuerySink) -> Self {
        Self {
            expr,
            cmd: QueryCmd::Count { mode, sink },
        }
    }

    pub fn extract(expr: Expression, policy: ExtractPolicy, sink: QuerySink) -> Self {
        Self {
            expr,
            cmd: QueryCmd::Extract { policy, sink },
        }
    }

    pub fn erase(sink: QuerySink) -> Self {
        Self {
            expr: Expression::True,
            cmd: QueryCmd::Erase { sink },
        }
    }

    pub fn is_erase(&self) -> bool {
        matches!(self.cmd, QueryCmd::Erase { .. })
    }

    pub fn sink(&self) -> &QuerySink {
        match &self.cmd {
            QueryCmd::Count { sink, .. }
            | QueryCmd::Extract { sink, .. }
            | QueryCmd::Erase { sink } => sink,
        }
    }
}

/// Client-visible handle for a multi-batch query.
#[derive(Clone, Debug)]
pub struct QueryCursor {
    pub query_id: Uuid,
    /// Partitions scheduled immediately (the taste batch).
    pub scheduled: u32,
    /// Total candidate partitions for this query.
    pub candidates: u32,
}
