//! # kNN Compute Core
//!
//! The similarity-search primitives: distance metrics over typed vectors
//! and the bounded heap selection that turns a distance stream into a
//! top-k result.
//!
//! [`Distance`] is the metric surface the planner and the scan tasks see.
//! Dispatch happens once per `(query, tuple)` pair: the variant match
//! validates vector kinds and lengths, then hands plain slices to the
//! scalar kernels in [`kernels`]. There is no process-wide math handle;
//! everything here is a pure function over its inputs.

pub mod kernels;
mod selection;

pub use selection::{HeapSelection, Neighbour};

use crate::error::QueryError;
use crate::types::Value;

/// A distance metric over two vectors of equal logical size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distance {
    /// L1, Manhattan.
    Manhattan,
    /// L2, Euclidean.
    Euclidean,
    /// Lp for integer p.
    Minkowski(u32),
    /// Angular distance `1 - cos`.
    Cosine,
    /// `1 - |dot|`.
    AbsoluteInnerProduct,
    /// Great-circle distance over `(lat, lon)` degree pairs.
    Haversine,
    /// Differing-bit count over bit vectors.
    Hamming,
}

impl Distance {
    pub fn name(&self) -> &'static str {
        match self {
            Distance::Manhattan => "L1",
            Distance::Euclidean => "L2",
            Distance::Minkowski(_) => "LP",
            Distance::Cosine => "COSINE",
            Distance::AbsoluteInnerProduct => "ABSINNERPROD",
            Distance::Haversine => "HAVERSINE",
            Distance::Hamming => "HAMMING",
        }
    }

    /// Nominal cost per vector component, used by the planner to weigh
    /// access paths.
    pub fn cost_per_component(&self) -> f32 {
        match self {
            Distance::Manhattan => 1.0,
            Distance::Euclidean => 1.0,
            Distance::Minkowski(_) => 4.0,
            Distance::Cosine => 3.0,
            Distance::AbsoluteInnerProduct => 2.0,
            Distance::Haversine => 20.0,
            Distance::Hamming => 0.125,
        }
    }

    fn unsupported(&self, reason: impl Into<String>) -> QueryError {
        QueryError::UnsupportedMetric {
            metric: self.name().to_string(),
            reason: reason.into(),
        }
    }

    fn check_len(&self, a: usize, b: usize) -> Result<(), QueryError> {
        if a != b {
            return Err(self.unsupported(format!("vectors of unequal logical size {a} and {b}")));
        }
        if *self == Distance::Haversine && a != 2 {
            return Err(self.unsupported(format!("requires logical size 2, got {a}")));
        }
        Ok(())
    }

    /// Computes the distance between two vector values of the same type
    /// and logical size.
    pub fn compute(&self, a: &Value, b: &Value) -> Result<f64, QueryError> {
        use kernels as k;
        match (a, b) {
            (Value::IntVector(a), Value::IntVector(b)) => {
                self.check_len(a.len(), b.len())?;
                self.real(a, b)
            }
            (Value::LongVector(a), Value::LongVector(b)) => {
                self.check_len(a.len(), b.len())?;
                self.real(a, b)
            }
            (Value::FloatVector(a), Value::FloatVector(b)) => {
                self.check_len(a.len(), b.len())?;
                self.real(a, b)
            }
            (Value::DoubleVector(a), Value::DoubleVector(b)) => {
                self.check_len(a.len(), b.len())?;
                self.real(a, b)
            }
            (Value::Complex32Vector(a), Value::Complex32Vector(b)) => {
                self.check_len(a.len(), b.len())?;
                match self {
                    Distance::Manhattan => Ok(k::manhattan_complex32(a, b)),
                    Distance::Euclidean => Ok(k::euclidean_complex32(a, b)),
                    _ => Err(self.unsupported("complex vectors support L1 and L2 only")),
                }
            }
            (Value::Complex64Vector(a), Value::Complex64Vector(b)) => {
                self.check_len(a.len(), b.len())?;
                match self {
                    Distance::Manhattan => Ok(k::manhattan_complex64(a, b)),
                    Distance::Euclidean => Ok(k::euclidean_complex64(a, b)),
                    _ => Err(self.unsupported("complex vectors support L1 and L2 only")),
                }
            }
            (Value::BooleanVector(a), Value::BooleanVector(b)) => {
                self.check_len(a.len(), b.len())?;
                match self {
                    Distance::Hamming => Ok(a.hamming(b) as f64),
                    _ => Err(self.unsupported("bit vectors support HAMMING only")),
                }
            }
            _ => Err(self.unsupported(format!(
                "incompatible operands {} and {}",
                a.column_type(),
                b.column_type()
            ))),
        }
    }

    /// Weighted variant for the metrics that support per-component weights
    /// (L1, L2, Lp). The weight vector shares the operands' element type.
    pub fn compute_weighted(&self, a: &Value, b: &Value, w: &Value) -> Result<f64, QueryError> {
        match (a, b, w) {
            (Value::IntVector(a), Value::IntVector(b), Value::IntVector(w)) => {
                self.real_weighted(a, b, w)
            }
            (Value::LongVector(a), Value::LongVector(b), Value::LongVector(w)) => {
                self.real_weighted(a, b, w)
            }
            (Value::FloatVector(a), Value::FloatVector(b), Value::FloatVector(w)) => {
                self.real_weighted(a, b, w)
            }
            (Value::DoubleVector(a), Value::DoubleVector(b), Value::DoubleVector(w)) => {
                self.real_weighted(a, b, w)
            }
            _ => Err(self.unsupported("weighted distances take matching-typed numeric vectors")),
        }
    }

    fn real_weighted<T: kernels::AsF64>(&self, a: &[T], b: &[T], w: &[T]) -> Result<f64, QueryError> {
        use kernels as k;
        self.check_len(a.len(), b.len())?;
        self.check_len(a.len(), w.len())?;
        match self {
            Distance::Manhattan => Ok(k::manhattan_weighted(a, b, w)),
            Distance::Euclidean => Ok(k::euclidean_weighted(a, b, w)),
            Distance::Minkowski(p) => Ok(k::minkowski_weighted(a, b, w, *p)),
            _ => Err(self.unsupported("weights apply to L1, L2 and Lp only")),
        }
    }

    fn real<T: kernels::AsF64>(&self, a: &[T], b: &[T]) -> Result<f64, QueryError> {
        use kernels as k;
        Ok(match self {
            Distance::Manhattan => k::manhattan(a, b),
            Distance::Euclidean => k::euclidean(a, b),
            Distance::Minkowski(p) => k::minkowski(a, b, *p),
            Distance::Cosine => k::cosine(a, b),
            Distance::AbsoluteInnerProduct => k::absolute_inner_product(a, b),
            Distance::Haversine => k::haversine(a, b),
            Distance::Hamming => {
                return Err(self.unsupported("HAMMING operates on bit vectors"));
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BitVector;

    #[test]
    fn dispatches_over_float_vectors() {
        let a = Value::FloatVector(vec![0.0, 0.0]);
        let b = Value::FloatVector(vec![3.0, 4.0]);
        assert!((Distance::Euclidean.compute(&a, &b).unwrap() - 5.0).abs() < 1e-9);
        assert!((Distance::Manhattan.compute(&a, &b).unwrap() - 7.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_size_mismatch() {
        let a = Value::FloatVector(vec![0.0, 0.0]);
        let b = Value::FloatVector(vec![1.0]);
        assert!(matches!(
            Distance::Euclidean.compute(&a, &b),
            Err(QueryError::UnsupportedMetric { .. })
        ));
    }

    #[test]
    fn rejects_cross_type_operands() {
        let a = Value::FloatVector(vec![0.0]);
        let b = Value::DoubleVector(vec![0.0]);
        assert!(Distance::Euclidean.compute(&a, &b).is_err());
    }

    #[test]
    fn haversine_requires_two_components() {
        let a = Value::DoubleVector(vec![0.0, 0.0, 0.0]);
        let b = Value::DoubleVector(vec![1.0, 1.0, 1.0]);
        assert!(Distance::Haversine.compute(&a, &b).is_err());
    }

    #[test]
    fn weighted_distances_cover_every_numeric_element_type() {
        let w = |d: Distance, a: Value, b: Value, weights: Value| {
            d.compute_weighted(&a, &b, &weights).unwrap()
        };

        let int = w(
            Distance::Manhattan,
            Value::IntVector(vec![0, 0]),
            Value::IntVector(vec![1, 1]),
            Value::IntVector(vec![2, 0]),
        );
        assert!((int - 2.0).abs() < 1e-9);

        let long = w(
            Distance::Euclidean,
            Value::LongVector(vec![0, 0]),
            Value::LongVector(vec![3, 4]),
            Value::LongVector(vec![1, 1]),
        );
        assert!((long - 5.0).abs() < 1e-9);

        let double = w(
            Distance::Minkowski(2),
            Value::DoubleVector(vec![0.0, 0.0]),
            Value::DoubleVector(vec![3.0, 4.0]),
            Value::DoubleVector(vec![1.0, 1.0]),
        );
        assert!((double - 5.0).abs() < 1e-9);

        // Mixed element types still do not combine.
        assert!(Distance::Manhattan
            .compute_weighted(
                &Value::IntVector(vec![0]),
                &Value::IntVector(vec![1]),
                &Value::FloatVector(vec![1.0]),
            )
            .is_err());
    }

    #[test]
    fn hamming_over_bit_vectors_only() {
        let a = Value::BooleanVector(BitVector::from_bits(&[true, false, true]));
        let b = Value::BooleanVector(BitVector::from_bits(&[true, true, false]));
        assert_eq!(Distance::Hamming.compute(&a, &b).unwrap(), 2.0);

        let f = Value::FloatVector(vec![1.0]);
        assert!(Distance::Hamming.compute(&f, &f).is_err());
    }
}
