//! Dense kernels over the row-major `max_neurons × max_neurons` weight buffer.
//!
//! Only the leading `n × n` block (the active neurons) is ever touched. The
//! buffer keeps a fixed `stride` so growth never reallocates or moves rows.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[cfg(feature = "simd")]
use wide::f32x4;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Execution tier for the dense mat-vec kernels.
///
/// - `Scalar`: single-threaded baseline, works everywhere
/// - `Simd`: 4-lane dot products (requires `simd` feature)
/// - `Parallel`: row-parallel via rayon (requires `parallel` feature)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ExecutionTier {
    #[default]
    Scalar,
    Simd,
    Parallel,
}

impl ExecutionTier {
    /// The tier that will actually run, honoring compile-time feature gates.
    pub fn effective(self) -> ExecutionTier {
        match self {
            ExecutionTier::Scalar => ExecutionTier::Scalar,
            ExecutionTier::Simd => {
                if cfg!(feature = "simd") {
                    ExecutionTier::Simd
                } else {
                    ExecutionTier::Scalar
                }
            }
            ExecutionTier::Parallel => {
                if cfg!(feature = "parallel") {
                    ExecutionTier::Parallel
                } else {
                    ExecutionTier::Scalar
                }
            }
        }
    }
}

#[inline]
fn dot_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(feature = "simd")]
fn dot_simd(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let lanes = n / 4;
    let mut acc = f32x4::ZERO;
    for c in 0..lanes {
        let i = c * 4;
        let va = f32x4::from([a[i], a[i + 1], a[i + 2], a[i + 3]]);
        let vb = f32x4::from([b[i], b[i + 1], b[i + 2], b[i + 3]]);
        acc += va * vb;
    }
    let mut sum: f32 = acc.to_array().iter().sum();
    for i in lanes * 4..n {
        sum += a[i] * b[i];
    }
    sum
}

#[inline]
pub fn dot(a: &[f32], b: &[f32], tier: ExecutionTier) -> f32 {
    match tier.effective() {
        #[cfg(feature = "simd")]
        ExecutionTier::Simd => dot_simd(a, b),
        _ => dot_scalar(a, b),
    }
}

/// `out[i] = Σ_j w[i][j] · x[j]` for `i, j < n`.
pub fn matvec(w: &[f32], stride: usize, n: usize, x: &[f32], out: &mut [f32], tier: ExecutionTier) {
    let tier = tier.effective();
    match tier {
        #[cfg(feature = "parallel")]
        ExecutionTier::Parallel => {
            out[..n].par_iter_mut().enumerate().for_each(|(i, o)| {
                *o = dot_scalar(&w[i * stride..i * stride + n], &x[..n]);
            });
        }
        _ => {
            for (i, o) in out[..n].iter_mut().enumerate() {
                *o = dot(&w[i * stride..i * stride + n], &x[..n], tier);
            }
        }
    }
}

/// `out[j] = Σ_i w[i][j] · x[i]` for `i, j < n`.
pub fn matvec_t(w: &[f32], stride: usize, n: usize, x: &[f32], out: &mut [f32], tier: ExecutionTier) {
    match tier.effective() {
        #[cfg(feature = "parallel")]
        ExecutionTier::Parallel => {
            out[..n].par_iter_mut().enumerate().for_each(|(j, o)| {
                let mut s = 0.0;
                for (i, xi) in x[..n].iter().enumerate() {
                    s += w[i * stride + j] * xi;
                }
                *o = s;
            });
        }
        _ => {
            for o in out[..n].iter_mut() {
                *o = 0.0;
            }
            for (i, xi) in x[..n].iter().enumerate() {
                if *xi == 0.0 {
                    continue;
                }
                let row = &w[i * stride..i * stride + n];
                for (o, wij) in out[..n].iter_mut().zip(row.iter()) {
                    *o += wij * xi;
                }
            }
        }
    }
}

#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Normalize in place; returns the original norm (0 and untouched if degenerate).
pub fn normalize(v: &mut [f32]) -> f32 {
    let norm = l2_norm(v);
    if !(norm.is_finite() && norm > 1e-12) {
        return 0.0;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    norm
}
