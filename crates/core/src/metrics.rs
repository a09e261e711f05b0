use serde::{Deserialize, Serialize};

use crate::stats::TokenCounter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionReport {
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    pub ratio: f64,
}

impl CompressionReport {
    pub fn from_counts(original_tokens: usize, compressed_tokens: usize) -> Self {
        Self {
            original_tokens,
            compressed_tokens,
            ratio: compression_ratio(original_tokens, compressed_tokens),
        }
    }

    pub fn measure(original: &str, compressed: &str, counter: &dyn TokenCounter) -> Self {
        Self::from_counts(counter.count(original), counter.count(compressed))
    }

    /// Fraction of the original tokens saved, `1 - ratio`.
    pub fn savings(&self) -> f64 {
        1.0 - self.ratio
    }
}

pub fn compression_ratio(original_tokens: usize, compressed_tokens: usize) -> f64 {
    if original_tokens == 0 {
        1.0
    } else {
        compressed_tokens as f64 / original_tokens as f64
    }
}
