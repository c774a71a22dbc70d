//! # Boolean Predicates
//!
//! The predicate tree a planner hands to scans and indexes. An
//! [`AtomicPredicate`] compares one column against literal values; compound
//! predicates combine atoms with AND / OR / NOT.
//!
//! Null semantics are strict: a comparison against an absent value matches
//! only for `IsNull`. Cross-variant comparisons never match.

use crate::error::QueryError;
use crate::types::Value;

use super::Recordset;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
    In,
    IsNull,
}

#[derive(Debug, Clone)]
pub struct AtomicPredicate {
    pub column: String,
    pub operator: ComparisonOperator,
    pub values: Vec<Value>,
    pub negated: bool,
}

impl AtomicPredicate {
    pub fn new(column: impl Into<String>, operator: ComparisonOperator, values: Vec<Value>) -> Self {
        Self {
            column: column.into(),
            operator,
            values,
            negated: false,
        }
    }

    pub fn equal(column: impl Into<String>, value: Value) -> Self {
        Self::new(column, ComparisonOperator::Equal, vec![value])
    }

    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self::new(column, ComparisonOperator::In, values)
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// Evaluates this atom against one optional cell value.
    pub fn matches_value(&self, value: Option<&Value>) -> bool {
        let outcome = match (self.operator, value) {
            (ComparisonOperator::IsNull, v) => v.is_none(),
            (_, None) => false,
            (op, Some(v)) => {
                use std::cmp::Ordering;
                match op {
                    ComparisonOperator::Equal => self
                        .values
                        .first()
                        .and_then(|rhs| v.partial_compare(rhs))
                        .is_some_and(|o| o == Ordering::Equal),
                    ComparisonOperator::NotEqual => self
                        .values
                        .first()
                        .and_then(|rhs| v.partial_compare(rhs))
                        .is_some_and(|o| o != Ordering::Equal),
                    ComparisonOperator::Greater => self
                        .values
                        .first()
                        .and_then(|rhs| v.partial_compare(rhs))
                        .is_some_and(|o| o == Ordering::Greater),
                    ComparisonOperator::GreaterEqual => self
                        .values
                        .first()
                        .and_then(|rhs| v.partial_compare(rhs))
                        .is_some_and(|o| o != Ordering::Less),
                    ComparisonOperator::Less => self
                        .values
                        .first()
                        .and_then(|rhs| v.partial_compare(rhs))
                        .is_some_and(|o| o == Ordering::Less),
                    ComparisonOperator::LessEqual => self
                        .values
                        .first()
                        .and_then(|rhs| v.partial_compare(rhs))
                        .is_some_and(|o| o != Ordering::Greater),
                    ComparisonOperator::In => self.values.iter().any(|rhs| {
                        v.partial_compare(rhs) == Some(Ordering::Equal)
                    }),
                    ComparisonOperator::IsNull => unreachable!("handled above"),
                }
            }
        };
        outcome != self.negated
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Atomic(AtomicPredicate),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn atomic(atom: AtomicPredicate) -> Self {
        Predicate::Atomic(atom)
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// The single atom of this predicate, when it is one.
    pub fn as_atomic(&self) -> Option<&AtomicPredicate> {
        match self {
            Predicate::Atomic(atom) => Some(atom),
            _ => None,
        }
    }

    /// All column names this predicate touches, in first-mention order.
    pub fn columns(&self) -> Vec<&str> {
        fn walk<'a>(p: &'a Predicate, out: &mut Vec<&'a str>) {
            match p {
                Predicate::Atomic(atom) => {
                    if !out.contains(&atom.column.as_str()) {
                        out.push(&atom.column);
                    }
                }
                Predicate::And(a, b) | Predicate::Or(a, b) => {
                    walk(a, out);
                    walk(b, out);
                }
                Predicate::Not(inner) => walk(inner, out),
            }
        }
        let mut out = Vec::new();
        walk(self, &mut out);
        out
    }

    /// Evaluates this predicate against a row, resolving column names
    /// through the recordset's schema.
    pub fn matches(&self, set: &Recordset, row: usize) -> Result<bool, QueryError> {
        match self {
            Predicate::Atomic(atom) => {
                let idx = set
                    .column_index(&atom.column)
                    .ok_or_else(|| QueryError::ColumnNotFound(atom.column.clone()))?;
                let record = &set.rows()[row];
                Ok(atom.matches_value(record.value(idx)))
            }
            Predicate::And(a, b) => Ok(a.matches(set, row)? && b.matches(set, row)?),
            Predicate::Or(a, b) => Ok(a.matches(set, row)? || b.matches(set, row)?),
            Predicate::Not(inner) => Ok(!inner.matches(set, row)?),
        }
    }

    /// Evaluates against a bag of named optional values (used by entity
    /// scans that materialise rows column by column).
    pub fn matches_values(
        &self,
        lookup: &dyn Fn(&str) -> Option<Option<Value>>,
    ) -> Result<bool, QueryError> {
        match self {
            Predicate::Atomic(atom) => {
                let cell = lookup(&atom.column)
                    .ok_or_else(|| QueryError::ColumnNotFound(atom.column.clone()))?;
                Ok(atom.matches_value(cell.as_ref()))
            }
            Predicate::And(a, b) => {
                Ok(a.matches_values(lookup)? && b.matches_values(lookup)?)
            }
            Predicate::Or(a, b) => Ok(a.matches_values(lookup)? || b.matches_values(lookup)?),
            Predicate::Not(inner) => Ok(!inner.matches_values(lookup)?),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_and_in_match_same_variant_only() {
        let eq = AtomicPredicate::equal("c", Value::Int(5));
        assert!(eq.matches_value(Some(&Value::Int(5))));
        assert!(!eq.matches_value(Some(&Value::Int(6))));
        assert!(!eq.matches_value(Some(&Value::Long(5))));
        assert!(!eq.matches_value(None));

        let isin = AtomicPredicate::is_in("c", vec![Value::Int(1), Value::Int(3)]);
        assert!(isin.matches_value(Some(&Value::Int(3))));
        assert!(!isin.matches_value(Some(&Value::Int(2))));
    }

    #[test]
    fn negation_and_null_checks() {
        let not_eq = AtomicPredicate::equal("c", Value::Int(5)).negate();
        assert!(not_eq.matches_value(Some(&Value::Int(4))));
        assert!(!not_eq.matches_value(Some(&Value::Int(5))));
        // Negation is a plain complement, so it also flips the null outcome.
        assert!(not_eq.matches_value(None));

        let is_null = AtomicPredicate::new("c", ComparisonOperator::IsNull, vec![]);
        assert!(is_null.matches_value(None));
        assert!(!is_null.matches_value(Some(&Value::Int(0))));
    }

    #[test]
    fn ordering_operators() {
        let gt = AtomicPredicate::new("c", ComparisonOperator::Greater, vec![Value::Double(1.0)]);
        assert!(gt.matches_value(Some(&Value::Double(1.5))));
        assert!(!gt.matches_value(Some(&Value::Double(1.0))));

        let le = AtomicPredicate::new(
            "c",
            ComparisonOperator::LessEqual,
            vec![Value::String("m".into())],
        );
        assert!(le.matches_value(Some(&Value::String("a".into()))));
        assert!(le.matches_value(Some(&Value::String("m".into()))));
        assert!(!le.matches_value(Some(&Value::String("z".into()))));
    }

    #[test]
    fn compound_predicates_collect_columns() {
        let p = Predicate::atomic(AtomicPredicate::equal("a", Value::Int(1)))
            .and(Predicate::atomic(AtomicPredicate::equal("b", Value::Int(2))));
        assert_eq!(p.columns(), vec!["a", "b"]);
        assert!(p.as_atomic().is_none());
    }
}
