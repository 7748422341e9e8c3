// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Table slices: the unit of I/O across the core.
//!
//! A slice is an ordered block of homogeneous records sharing one layout and
//! a contiguous, monotone id range assigned at ingest. Slices are immutable
//! once constructed and cheap to clone: the payload sits behind an `Arc`, so
//! query results can outlive the segment that produced them.

use std::sync::Arc;

use bitvec::prelude::BitVec;
use serde::{Deserialize, Serialize};

use crate::expr::Checker;
use crate::ids::IdSet;
use crate::types::{Layout, Value};

/// How a slice's records are arranged on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Encoding {
    Row,
    Columnar,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SliceInner {
    layout: Layout,
    /// Id of the first record.
    offset: u64,
    encoding: Encoding,
    rows: Vec<Vec<Value>>,
}

/// An immutable, reference-counted block of records.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSlice {
    inner: Arc<SliceInner>,
}

impl Serialize for TableSlice {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.inner.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TableSlice {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        SliceInner::deserialize(deserializer).map(|inner| TableSlice {
            inner: Arc::new(inner),
        })
    }
}

impl TableSlice {
    /// Build a slice whose first record has id `offset`.
    ///
    /// Every row must match the layout's arity; the builder side guarantees
    /// this, so it is only debug-checked here.
    pub fn new(layout: Layout, offset: u64, encoding: Encoding, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == layout.fields.len()));
        Self {
            inner: Arc::new(SliceInner {
                layout,
                offset,
                encoding,
                rows,
            }),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.inner.layout
    }

    pub fn encoding(&self) -> Encoding {
        self.inner.encoding
    }

    pub fn offset(&self) -> u64 {
        self.inner.offset
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.inner.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.rows.is_empty()
    }

    /// Half-open id range `[offset, offset + len)`.
    pub fn id_range(&self) -> (u64, u64) {
        (self.inner.offset, self.inner.offset + self.len() as u64)
    }

    pub fn row(&self, index: usize) -> &[Value] {
        &self.inner.rows[index]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Value]> {
        self.inner.rows.iter().map(|r| r.as_slice())
    }

    /// Rough in-memory footprint, used for segment size accounting.
    pub fn estimated_size(&self) -> usize {
        self.inner
            .rows
            .iter()
            .map(|r| r.iter().map(Value::estimated_size).sum::<usize>())
            .sum()
    }

    /// Visibility mask of the records whose id is in `ids`.
    fn visibility(&self, ids: &IdSet) -> BitVec {
        let mut mask = BitVec::repeat(false, self.len());
        let (begin, end) = self.id_range();
        for (b, e) in ids.intersect_range(begin, end).runs() {
            for id in b..e {
                mask.set((id - begin) as usize, true);
            }
        }
        mask
    }

    /// Restrict to `ids`, preserving record ids.
    ///
    /// Returns one sub-slice per contiguous surviving run, in ascending id
    /// order. Disjoint `ids` yield an empty vector.
    pub fn select(&self, ids: &IdSet) -> Vec<TableSlice> {
        let (begin, end) = self.id_range();
        ids.intersect_range(begin, end)
            .runs()
            .map(|(b, e)| self.subslice(b, e))
            .collect()
    }

    fn subslice(&self, begin: u64, end: u64) -> TableSlice {
        let lo = (begin - self.inner.offset) as usize;
        let hi = (end - self.inner.offset) as usize;
        TableSlice::new(
            self.inner.layout.clone(),
            begin,
            self.inner.encoding,
            self.inner.rows[lo..hi].to_vec(),
        )
    }

    /// Ids of the records matching `checker`.
    pub fn evaluate(&self, checker: &Checker) -> IdSet {
        self.rows()
            .enumerate()
            .filter(|(_, row)| checker.matches(row))
            .map(|(i, _)| self.inner.offset + i as u64)
            .collect()
    }

    /// Number of records whose id is in `ids` and which match `checker`.
    pub fn count_matching(&self, checker: &Checker, ids: &IdSet) -> u64 {
        let mask = self.visibility(ids);
        self.rows()
            .enumerate()
            .filter(|(i, row)| mask[*i] && checker.matches(row))
            .count() as u64
    }

    /// Fused restrict-and-evaluate that drops record ids.
    ///
    /// Produces at most one compacted result slice; its id range is synthetic
    /// (offset zero) because the caller asked for `drop_ids` semantics.
    pub fn filter(&self, checker: &Checker, ids: &IdSet) -> Option<TableSlice> {
        let mask = self.visibility(ids);
        let rows: Vec<Vec<Value>> = self
            .inner
            .rows
            .iter()
            .enumerate()
            .filter(|(i, row)| mask[*i] && checker.matches(row))
            .map(|(_, row)| row.clone())
            .collect();
        if rows.is_empty() {
            return None;
        }
        Some(TableSlice::new(
            self.inner.layout.clone(),
            0,
            self.inner.encoding,
            rows,
        ))
    }

    /// Remove every record whose id is in `ids`, preserving surviving ids.
    ///
    /// Survivors split into one slice per contiguous run. A fully-erased
    /// slice yields a single empty slice so callers can observe the result.
    pub fn without(&self, ids: &IdSet) -> Vec<TableSlice> {
        let mask = self.visibility(ids);
        let mut out = Vec::new();
        let mut run_start: Option<usize> = None;
        for i in 0..=self.len() {
            let erased = i == self.len() || mask[i];
            match (run_start, erased) {
                (None, false) => run_start = Some(i),
                (Some(start), true) => {
                    let begin = self.inner.offset + start as u64;
                    let end = self.inner.offset + i as u64;
                    out.push(self.subslice(begin, end));
                    run_start = None;
                }
                _ => {}
            }
        }
        if out.is_empty() {
            out.push(TableSlice::new(
                self.inner.layout.clone(),
                self.inner.offset,
                self.inner.encoding,
                vec![],
            ));
        }
        out
    }
}
