//! # Distance Kernels
//!
//! Scalar distance computations over numeric slices. Every kernel promotes
//! its elements to `f64` internally and returns an `f64` distance; callers
//! guarantee equal slice lengths (the [`Distance`](super::Distance)
//! dispatcher validates that once per pair, keeping the inner loops free of
//! checks).
//!
//! The kernels are stateless free functions, safe to call concurrently from
//! any number of scan workers.

use crate::types::{Complex32, Complex64};

/// Mean Earth radius in metres, used by the haversine kernel.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Element types the real-valued kernels accept.
pub trait AsF64: Copy {
    fn as_f64(self) -> f64;
}

impl AsF64 for i32 {
    fn as_f64(self) -> f64 {
        f64::from(self)
    }
}

impl AsF64 for i64 {
    fn as_f64(self) -> f64 {
        self as f64
    }
}

impl AsF64 for f32 {
    fn as_f64(self) -> f64 {
        f64::from(self)
    }
}

impl AsF64 for f64 {
    fn as_f64(self) -> f64 {
        self
    }
}

/// L1 (Manhattan) distance: `Σ |aᵢ - bᵢ|`.
pub fn manhattan<T: AsF64>(a: &[T], b: &[T]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += (x.as_f64() - y.as_f64()).abs();
    }
    sum
}

pub fn manhattan_weighted<T: AsF64>(a: &[T], b: &[T], w: &[T]) -> f64 {
    let mut sum = 0.0;
    for ((x, y), wi) in a.iter().zip(b.iter()).zip(w.iter()) {
        sum += (x.as_f64() - y.as_f64()).abs() * wi.as_f64();
    }
    sum
}

/// Squared L2 distance: `Σ (aᵢ - bᵢ)²`.
pub fn squared_euclidean<T: AsF64>(a: &[T], b: &[T]) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let d = x.as_f64() - y.as_f64();
        sum += d * d;
    }
    sum
}

/// L2 (Euclidean) distance: `sqrt(Σ (aᵢ - bᵢ)²)`.
pub fn euclidean<T: AsF64>(a: &[T], b: &[T]) -> f64 {
    squared_euclidean(a, b).sqrt()
}

pub fn euclidean_weighted<T: AsF64>(a: &[T], b: &[T], w: &[T]) -> f64 {
    let mut sum = 0.0;
    for ((x, y), wi) in a.iter().zip(b.iter()).zip(w.iter()) {
        let d = x.as_f64() - y.as_f64();
        sum += d * d * wi.as_f64();
    }
    sum.sqrt()
}

/// Lp (Minkowski) distance for integer `p`: `(Σ |aᵢ - bᵢ|ᵖ)^(1/p)`.
pub fn minkowski<T: AsF64>(a: &[T], b: &[T], p: u32) -> f64 {
    let mut sum = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        sum += (x.as_f64() - y.as_f64()).abs().powi(p as i32);
    }
    sum.powf(1.0 / f64::from(p))
}

pub fn minkowski_weighted<T: AsF64>(a: &[T], b: &[T], w: &[T], p: u32) -> f64 {
    let mut sum = 0.0;
    for ((x, y), wi) in a.iter().zip(b.iter()).zip(w.iter()) {
        sum += (x.as_f64() - y.as_f64()).abs().powi(p as i32) * wi.as_f64();
    }
    sum.powf(1.0 / f64::from(p))
}

/// Cosine distance: `1 - dot(a,b) / (|a| * |b|)`, clamped at zero.
pub fn cosine<T: AsF64>(a: &[T], b: &[T]) -> f64 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (x.as_f64(), y.as_f64());
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let norm_product = (norm_a * norm_b).sqrt();
    if norm_product == 0.0 {
        return 1.0;
    }
    (1.0 - dot / norm_product).max(0.0)
}

/// Absolute inner product distance: `1 - |dot(a,b)|`, clamped at zero.
pub fn absolute_inner_product<T: AsF64>(a: &[T], b: &[T]) -> f64 {
    let mut dot = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x.as_f64() * y.as_f64();
    }
    (1.0 - dot.abs()).max(0.0)
}

/// Haversine distance between `(latitude, longitude)` pairs in degrees,
/// over the mean Earth radius, in metres.
pub fn haversine<T: AsF64>(a: &[T], b: &[T]) -> f64 {
    debug_assert!(a.len() == 2 && b.len() == 2);
    let phi1 = a[0].as_f64().to_radians();
    let phi2 = b[0].as_f64().to_radians();
    let d_phi = phi2 - phi1;
    let d_lambda = (b[1].as_f64() - a[1].as_f64()).to_radians();

    let h = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// L1 over complex elements via the component-wise modulus.
pub fn manhattan_complex32(a: &[Complex32], b: &[Complex32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| Complex64::new(f64::from(x.re) - f64::from(y.re), f64::from(x.im) - f64::from(y.im)).modulus())
        .sum()
}

pub fn manhattan_complex64(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| Complex64::new(x.re - y.re, x.im - y.im).modulus())
        .sum()
}

/// L2 over complex elements via the component-wise modulus.
pub fn euclidean_complex32(a: &[Complex32], b: &[Complex32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let re = f64::from(x.re) - f64::from(y.re);
            let im = f64::from(x.im) - f64::from(y.im);
            re * re + im * im
        })
        .sum::<f64>()
        .sqrt()
}

pub fn euclidean_complex64(a: &[Complex64], b: &[Complex64]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let re = x.re - y.re;
            let im = x.im - y.im;
            re * re + im * im
        })
        .sum::<f64>()
        .sqrt()
}
