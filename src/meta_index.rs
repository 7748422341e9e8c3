// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! The meta-index: maps queries to candidate partition sets.
//!
//! Built incrementally from partition synopses. The candidate list is a
//! superset of the partitions that could contain matching records: false
//! positives are filtered at the store layer, false negatives must never
//! happen.

use std::collections::HashMap;

use itertools::Itertools;
use uuid::Uuid;

use crate::expr::Expression;
use crate::synopsis::PartitionSynopsis;

#[derive(Default)]
pub struct MetaIndex {
    synopses: HashMap<Uuid, PartitionSynopsis>,
}

impl MetaIndex {
    /// Register or replace the synopsis of a partition.
    pub fn add(&mut self, id: Uuid, synopsis: PartitionSynopsis) {
        self.synopses.insert(id, synopsis);
    }

    pub fn remove(&mut self, id: &Uuid) {
        self.synopses.remove(id);
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.synopses.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.synopses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.synopses.is_empty()
    }

    pub fn synopsis(&self, id: &Uuid) -> Option<&PartitionSynopsis> {
        self.synopses.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &PartitionSynopsis)> {
        self.synopses.iter()
    }

    /// Candidate partitions for `expr`, ordered by ascending id range so that
    /// results stream in roughly chronological order.
    pub fn candidates(&self, expr: &Expression) -> Vec<Uuid> {
        self.synopses
            .iter()
            .filter(|(_, synopsis)| synopsis.could_match(expr))
            .sorted_by_key(|(id, synopsis)| (synopsis.id_range, **id))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CompareOp;
    use crate::synopsis::{FieldSynopsis, LayoutSynopsis};
    use crate::types::{FieldType, Value};

    fn synopsis(id_begin: u64, events: u64, x_min: i64, x_max: i64) -> PartitionSynopsis {
        PartitionSynopsis {
            id_range: Some((id_begin, id_begin + events)),
            events,
            time_range: None,
            layouts: vec![LayoutSynopsis {
                name: "conn".into(),
                count: events,
                fields: vec![FieldSynopsis {
                    name: "x".into(),
                    ty: FieldType::Int,
                    min: Value::Int(x_min),
                    max: Value::Int(x_max),
                }],
            }],
        }
    }

    #[test]
    fn test_candidates_prune_by_range() {
        let mut index = MetaIndex::default();
        let low = Uuid::new_v4();
        let high = Uuid::new_v4();
        index.add(low, synopsis(0, 10, 0, 50));
        index.add(high, synopsis(10, 10, 100, 200));

        let expr = Expression::field("x", CompareOp::Eq, Value::Int(42));
        let candidates = index.candidates(&expr);
        assert_eq!(candidates, vec![low]);

        // A predicate nothing satisfies prunes everything.
        let expr = Expression::field("x", CompareOp::Gt, Value::Int(500));
        assert!(index.candidates(&expr).is_empty());
    }

    #[test]
    fn test_candidates_ordered_by_id_range() {
        let mut index = MetaIndex::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index.add(a, synopsis(100, 10, 0, 1));
        index.add(b, synopsis(0, 10, 0, 1));
        assert_eq!(index.candidates(&Expression::True), vec![b, a]);
    }

    #[test]
    fn test_replaced_synopsis_wins() {
        let mut index = MetaIndex::default();
        let id = Uuid::new_v4();
        index.add(id, synopsis(0, 10, 0, 50));
        index.add(id, PartitionSynopsis::default());
        // The replacement reports emptiness, so the partition is pruned.
        assert!(index.candidates(&Expression::True).is_empty());
        assert_eq!(index.len(), 1);
    }
}
