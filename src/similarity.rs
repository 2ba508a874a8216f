//! Vector similarity primitives.
//!
//! # Formula
//!
//! ```text
//!            a · b
//! cos(θ) = ─────────
//!          ‖a‖ × ‖b‖
//! ```
//!
//! Vectors of different lengths are a caller error and fail with
//! [`RagError::DimensionMismatch`]. A zero-norm vector has no direction,
//! so its similarity with anything is defined as `0.0`. Infinite or NaN
//! components are rejected with [`RagError::InvalidInput`].

use crate::error::{RagError, Result};

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// ```rust
/// use context_rag::similarity::cosine_similarity;
///
/// let sim = cosine_similarity(&[1.0, 0.0], &[1.0, 1.0]).unwrap();
/// assert!((sim - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        if !x.is_finite() || !y.is_finite() {
            return Err(RagError::InvalidInput(
                "vector contains a non-finite component".into(),
            ));
        }
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let sim = dot / (norm_a.sqrt() * norm_b.sqrt());
    // Rounding can push |sim| a hair past 1.
    Ok(sim.clamp(-1.0, 1.0) as f32)
}

/// Scale `v` to unit length. A zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| (*x as f64) * (*x as f64)).sum::<f64>().sqrt();
    if norm == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| (*x as f64 / norm) as f32).collect()
}
