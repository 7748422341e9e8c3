// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Partition synopses: compact, lossy per-partition summaries.
//!
//! A synopsis is persisted separately from the partition body so the
//! meta-index can be rebuilt at startup without touching any segment. It
//! records id and time bounds plus per-field value ranges; everything it
//! cannot prove is answered conservatively.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::StorageResult;
use crate::expr::{CompareOp, Expression, MetaPredicate};
use crate::segment::Segment;
use crate::types::{FieldType, Value};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldSynopsis {
    pub name: String,
    pub ty: FieldType,
    pub min: Value,
    pub max: Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayoutSynopsis {
    pub name: String,
    /// Number of records with this layout.
    pub count: u64,
    pub fields: Vec<FieldSynopsis>,
}

/// Per-partition metadata consumed by the meta-index.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartitionSynopsis {
    pub id_range: Option<(u64, u64)>,
    pub events: u64,
    /// Bounds over every timestamp-typed field, if any.
    pub time_range: Option<(i64, i64)>,
    pub layouts: Vec<LayoutSynopsis>,
}

impl PartitionSynopsis {
    /// Summarize a sealed segment.
    pub fn from_segment(segment: &Segment) -> Self {
        let mut synopsis = PartitionSynopsis::default();
        for slice in segment.slices() {
            if slice.is_empty() {
                continue;
            }
            let (begin, end) = slice.id_range();
            synopsis.id_range = Some(match synopsis.id_range {
                Some((b, e)) => (b.min(begin), e.max(end)),
                None => (begin, end),
            });
            synopsis.events += slice.len() as u64;

            let layout = slice.layout();
            let pos = match synopsis.layouts.iter().position(|l| l.name == layout.name) {
                Some(pos) => pos,
                None => {
                    synopsis.layouts.push(LayoutSynopsis {
                        name: layout.name.clone(),
                        count: 0,
                        fields: Vec::new(),
                    });
                    synopsis.layouts.len() - 1
                }
            };
            let entry = &mut synopsis.layouts[pos];
            entry.count += slice.len() as u64;

            let mut time_range = synopsis.time_range;
            for (column, field) in layout.fields.iter().enumerate() {
                for row in slice.rows() {
                    let value = &row[column];
                    if let Value::Timestamp(ts) = value {
                        time_range = Some(match time_range {
                            Some((lo, hi)) => (lo.min(*ts), hi.max(*ts)),
                            None => (*ts, *ts),
                        });
                    }
                    match entry.fields.iter().position(|f| f.name == field.name) {
                        Some(fpos) => {
                            let f = &mut entry.fields[fpos];
                            if value.partial_cmp_same_type(&f.min)
                                == Some(std::cmp::Ordering::Less)
                            {
                                f.min = value.clone();
                            }
                            if value.partial_cmp_same_type(&f.max)
                                == Some(std::cmp::Ordering::Greater)
                            {
                                f.max = value.clone();
                            }
                        }
                        None => entry.fields.push(FieldSynopsis {
                            name: field.name.clone(),
                            ty: field.ty,
                            min: value.clone(),
                            max: value.clone(),
                        }),
                    }
                }
            }
            synopsis.time_range = time_range;
        }
        synopsis
    }

    pub fn encode(&self) -> StorageResult<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    pub fn decode(data: &[u8]) -> StorageResult<Self> {
        Ok(bincode::deserialize(data)?)
    }

    /// Whether this partition could contain a record matching `expr`.
    ///
    /// Sound, not complete: `true` may be a false positive, `false` is a
    /// guarantee. Anything the synopsis cannot decide degrades to `true`.
    pub fn could_match(&self, expr: &Expression) -> bool {
        if self.events == 0 {
            return false;
        }
        self.node_could_match(expr)
    }

    fn node_could_match(&self, expr: &Expression) -> bool {
        match expr {
            Expression::True => true,
            Expression::Meta(MetaPredicate::LayoutIs(name)) => {
                self.layouts.iter().any(|l| l.name == *name)
            }
            Expression::Compare { field, op, value } => self
                .layouts
                .iter()
                .flat_map(|l| &l.fields)
                .any(|f| f.name == *field && range_could_match(f, *op, value)),
            Expression::And(xs) => xs.iter().all(|x| self.node_could_match(x)),
            Expression::Or(xs) => xs.iter().any(|x| self.node_could_match(x)),
            // Negations are not prunable from min/max bounds.
            Expression::Not(_) => true,
        }
    }
}

fn range_could_match(field: &FieldSynopsis, op: CompareOp, value: &Value) -> bool {
    if field.ty != value.field_type() {
        return false;
    }
    use std::cmp::Ordering::*;
    let lo = field.min.partial_cmp_same_type(value);
    let hi = field.max.partial_cmp_same_type(value);
    match op {
        CompareOp::Eq => lo != Some(Greater) && hi != Some(Less),
        CompareOp::Ne => !(lo == Some(Equal) && hi == Some(Equal)),
        CompareOp::Lt => lo == Some(Less),
        CompareOp::Le => lo != Some(Greater),
        CompareOp::Gt => hi == Some(Greater),
        CompareOp::Ge => hi != Some(Less),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdSet;
    use crate::segment::SegmentBuilder;
    use crate::slice::{Encoding, TableSlice};
    use crate::types::{Field, Layout};
    use uuid::Uuid;

    fn sample_segment() -> Segment {
        let layout = Layout::new(
            "conn",
            vec![
                Field::new("ts", FieldType::Timestamp),
                Field::new("x", FieldType::Int),
            ],
        );
        let rows = |vals: &[(i64, i64)]| {
            vals.iter()
                .map(|&(ts, x)| vec![Value::Timestamp(ts), Value::Int(x)])
                .collect()
        };
        let mut builder = SegmentBuilder::new(Uuid::new_v4(), 1 << 20);
        builder
            .add(TableSlice::new(
                layout.clone(),
                0,
                Encoding::Row,
                rows(&[(100, 1), (200, 5)]),
            ))
            .unwrap();
        builder
            .add(TableSlice::new(
                layout,
                2,
                Encoding::Row,
                rows(&[(150, 9)]),
            ))
            .unwrap();
        builder.finish()
    }

    #[test]
    fn test_from_segment_bounds() {
        let synopsis = PartitionSynopsis::from_segment(&sample_segment());
        assert_eq!(synopsis.events, 3);
        assert_eq!(synopsis.id_range, Some((0, 3)));
        assert_eq!(synopsis.time_range, Some((100, 200)));
        let conn = &synopsis.layouts[0];
        assert_eq!(conn.count, 3);
        let x = conn.fields.iter().find(|f| f.name == "x").unwrap();
        assert_eq!(x.min, Value::Int(1));
        assert_eq!(x.max, Value::Int(9));
    }

    #[test]
    fn test_could_match_is_sound() {
        let synopsis = PartitionSynopsis::from_segment(&sample_segment());
        // In range: must be a candidate.
        assert!(synopsis.could_match(&Expression::field("x", CompareOp::Eq, Value::Int(5))));
        // Out of range: provably no match.
        assert!(!synopsis.could_match(&Expression::field("x", CompareOp::Gt, Value::Int(9))));
        assert!(!synopsis.could_match(&Expression::field("x", CompareOp::Eq, Value::Int(42))));
        // Unknown field: no record can carry it.
        assert!(!synopsis.could_match(&Expression::field("y", CompareOp::Eq, Value::Int(1))));
        // Negation degrades to candidate.
        assert!(synopsis.could_match(&Expression::Not(Box::new(Expression::field(
            "x",
            CompareOp::Eq,
            Value::Int(5)
        )))));
    }

    #[test]
    fn test_empty_partition_never_matches() {
        let synopsis = PartitionSynopsis::default();
        assert!(!synopsis.could_match(&Expression::True));
    }

    #[test]
    fn test_encode_roundtrip() {
        let synopsis = PartitionSynopsis::from_segment(&sample_segment());
        let decoded = PartitionSynopsis::decode(&synopsis.encode().unwrap()).unwrap();
        assert_eq!(decoded.events, synopsis.events);
        assert_eq!(decoded.id_range, synopsis.id_range);
    }

    #[test]
    fn test_erased_segment_reports_emptiness() {
        let segment = sample_segment();
        let erased = segment.copy_without(&IdSet::from_range(0, 3));
        let synopsis = PartitionSynopsis::from_segment(&erased);
        assert_eq!(synopsis.events, 0);
        assert!(!synopsis.could_match(&Expression::True));
    }
}
