// Copyright 2024 Argus Project Authors. Licensed under Apache-2.0.

//! Logically-normalized predicate trees and their layout-tailored form.
//!
//! An [`Expression`] refers to fields by name and may contain meta predicates
//! over slice-level metadata. Before per-record evaluation it is *tailored*
//! against a concrete [`Layout`]: field references resolve to column
//! positions, meta predicates fold to constants, and comparisons that cannot
//! type-check prune to `false`. Tailoring fails only for fields the layout
//! does not know, which indicates a caller-visible mismatch.

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::types::{Layout, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Eq => ord == Equal,
            CompareOp::Ne => ord != Equal,
            CompareOp::Lt => ord == Less,
            CompareOp::Le => ord != Greater,
            CompareOp::Gt => ord == Greater,
            CompareOp::Ge => ord != Less,
        }
    }
}

/// A predicate over slice-level metadata rather than record fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MetaPredicate {
    /// Matches slices whose layout has the given name.
    LayoutIs(String),
}

/// A predicate tree over typed fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Matches every record.
    True,
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    Meta(MetaPredicate),
}

impl Expression {
    pub fn field(name: impl Into<String>, op: CompareOp, value: Value) -> Self {
        Expression::Compare {
            field: name.into(),
            op,
            value,
        }
    }

    pub fn is_trivially_true(&self) -> bool {
        matches!(self, Expression::True)
    }
}

/// A tailored, meta-pruned expression applied per record during evaluation.
///
/// Column positions are resolved against one layout; applying a checker to a
/// record of a different layout is a logic error.
#[derive(Clone, Debug)]
pub struct Checker {
    node: CheckNode,
}

#[derive(Clone, Debug)]
enum CheckNode {
    Const(bool),
    Compare {
        column: usize,
        op: CompareOp,
        value: Value,
    },
    And(Vec<CheckNode>),
    Or(Vec<CheckNode>),
    Not(Box<CheckNode>),
}

impl Checker {
    /// A checker that accepts every record.
    pub fn accept_all() -> Self {
        Self {
            node: CheckNode::Const(true),
        }
    }

    pub fn matches(&self, record: &[Value]) -> bool {
        Self::eval(&self.node, record)
    }

    fn eval(node: &CheckNode, record: &[Value]) -> bool {
        match node {
            CheckNode::Const(v) => *v,
            CheckNode::Compare { column, op, value } => record[*column]
                .partial_cmp_same_type(value)
                .is_some_and(|ord| op.apply(ord)),
            CheckNode::And(xs) => xs.iter().all(|x| Self::eval(x, record)),
            CheckNode::Or(xs) => xs.iter().any(|x| Self::eval(x, record)),
            CheckNode::Not(x) => !Self::eval(x, record),
        }
    }
}

/// Tailor `expr` against `layout`.
///
/// Meta predicates are folded against the layout, so the result never
/// consults slice metadata again. Comparisons whose value type cannot match
/// the field type prune to `false`; unknown fields fail with
/// [`StorageError::InvalidQuery`].
pub fn tailor(expr: &Expression, layout: &Layout) -> StorageResult<Checker> {
    Ok(Checker {
        node: tailor_node(expr, layout)?,
    })
}

fn tailor_node(expr: &Expression, layout: &Layout) -> StorageResult<CheckNode> {
    Ok(match expr {
        Expression::True => CheckNode::Const(true),
        Expression::Meta(MetaPredicate::LayoutIs(name)) => CheckNode::Const(layout.name == *name),
        Expression::Compare { field, op, value } => {
            let column = layout.field_index(field).ok_or_else(|| {
                StorageError::InvalidQuery(format!(
                    "field {field} unknown for layout {}",
                    layout.name
                ))
            })?;
            if layout.fields[column].ty != value.field_type() {
                // Impossible predicate for this layout.
                CheckNode::Const(false)
            } else {
                CheckNode::Compare {
                    column,
                    op: *op,
                    value: value.clone(),
                }
            }
        }
        Expression::And(xs) => CheckNode::And(
            xs.iter()
                .map(|x| tailor_node(x, layout))
                .collect::<StorageResult<_>>()?,
        ),
        Expression::Or(xs) => CheckNode::Or(
            xs.iter()
                .map(|x| tailor_node(x, layout))
                .collect::<StorageResult<_>>()?,
        ),
        Expression::Not(x) => CheckNode::Not(Box::new(tailor_node(x, layout)?)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, FieldType};

    fn conn_layout() -> Layout {
        Layout::new(
            "conn",
            vec![
                Field::new("ts", FieldType::Timestamp),
                Field::new("x", FieldType::Int),
                Field::new("host", FieldType::Str),
            ],
        )
    }

    fn record(ts: i64, x: i64, host: &str) -> Vec<Value> {
        vec![
            Value::Timestamp(ts),
            Value::Int(x),
            Value::Str(host.into()),
        ]
    }

    #[test]
    fn test_tailor_resolves_fields() {
        let expr = Expression::field("x", CompareOp::Eq, Value::Int(42));
        let checker = tailor(&expr, &conn_layout()).unwrap();
        assert!(checker.matches(&record(0, 42, "a")));
        assert!(!checker.matches(&record(0, 41, "a")));
    }

    #[test]
    fn test_tailor_unknown_field_fails() {
        let expr = Expression::field("nope", CompareOp::Eq, Value::Int(1));
        assert!(matches!(
            tailor(&expr, &conn_layout()),
            Err(StorageError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_tailor_prunes_impossible_compare() {
        // Int field compared against a string can never match.
        let expr = Expression::field("x", CompareOp::Eq, Value::Str("42".into()));
        let checker = tailor(&expr, &conn_layout()).unwrap();
        assert!(!checker.matches(&record(0, 42, "a")));
    }

    #[test]
    fn test_meta_predicate_folds() {
        let hit = Expression::Meta(MetaPredicate::LayoutIs("conn".into()));
        let miss = Expression::Meta(MetaPredicate::LayoutIs("dns".into()));
        assert!(tailor(&hit, &conn_layout())
            .unwrap()
            .matches(&record(0, 0, "")));
        assert!(!tailor(&miss, &conn_layout())
            .unwrap()
            .matches(&record(0, 0, "")));
    }

    #[test]
    fn test_boolean_connectives() {
        let expr = Expression::And(vec![
            Expression::field("x", CompareOp::Ge, Value::Int(10)),
            Expression::Not(Box::new(Expression::field(
                "host",
                CompareOp::Eq,
                Value::Str("deny".into()),
            ))),
        ]);
        let checker = tailor(&expr, &conn_layout()).unwrap();
        assert!(checker.matches(&record(0, 10, "ok")));
        assert!(!checker.matches(&record(0, 10, "deny")));
        assert!(!checker.matches(&record(0, 9, "ok")));
    }
}
