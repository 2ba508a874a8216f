//! Relevance thresholding.
//!
//! Works on anything that carries a relevance score: raw similarity for
//! [`SearchResult`], the model's score for [`RerankedResult`]. Thresholds
//! live in `[0.0, 1.0]`; a negative similarity counts as `0.0`, so a zero
//! threshold keeps every item.

use crate::error::{RagError, Result};
use crate::models::{RerankedResult, SearchResult};

pub trait Scored {
    fn relevance(&self) -> f32;
}

impl Scored for SearchResult {
    fn relevance(&self) -> f32 {
        self.similarity
    }
}

impl Scored for RerankedResult {
    fn relevance(&self) -> f32 {
        self.rerank_score
    }
}

/// Reject thresholds outside `[0.0, 1.0]` (and NaN).
pub fn validate_threshold(threshold: f32) -> Result<f32> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(RagError::ThresholdOutOfRange(threshold))
    }
}

/// Keep items whose relevance (floored at zero) is at least `threshold`,
/// preserving order.
pub fn filter_by_threshold<T: Scored>(items: Vec<T>, threshold: f32) -> Result<Vec<T>> {
    let threshold = validate_threshold(threshold)?;
    Ok(items
        .into_iter()
        .filter(|item| item.relevance().max(0.0) >= threshold)
        .collect())
}
