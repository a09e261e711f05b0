use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

use crate::error::{GridError, Result};

/// Approximate subword token count of a piece of text.
pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

impl<F> TokenCounter for F
where
    F: Fn(&str) -> usize,
{
    fn count(&self, text: &str) -> usize {
        self(text)
    }
}

/// `max(1, chars / 4)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EstimateCounter;

impl TokenCounter for EstimateCounter {
    fn count(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() / 4).max(1)
}

pub struct BpeCounter {
    bpe: CoreBPE,
}

impl BpeCounter {
    pub fn new(bpe: CoreBPE) -> Self {
        Self { bpe }
    }
}

impl TokenCounter for BpeCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_with_special_tokens(text).len().max(1)
    }
}

pub type SharedCounter = Arc<dyn TokenCounter + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenizerKind {
    #[default]
    Cl100k,
    O200k,
    P50k,
    Estimate,
}

impl TokenizerKind {
    pub fn build(&self) -> Result<CoreBPE> {
        let bpe = match self {
            TokenizerKind::Cl100k => tiktoken_rs::cl100k_base(),
            TokenizerKind::O200k => tiktoken_rs::o200k_base(),
            TokenizerKind::P50k => tiktoken_rs::p50k_base(),
            TokenizerKind::Estimate => {
                return Err(GridError::Tokenizer("estimate has no bpe table".into()))
            }
        };
        bpe.map_err(|e| GridError::Tokenizer(e.to_string()))
    }

    /// Counter for this tokenizer; falls back to the estimate when the BPE
    /// tables cannot be built.
    pub fn counter(&self) -> SharedCounter {
        if *self == TokenizerKind::Estimate {
            return Arc::new(EstimateCounter);
        }
        match self.build() {
            Ok(bpe) => Arc::new(BpeCounter::new(bpe)),
            Err(err) => {
                tracing::warn!(tokenizer = ?self, %err, "falling back to estimated token counts");
                Arc::new(EstimateCounter)
            }
        }
    }
}

impl FromStr for TokenizerKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cl100k" | "cl100k_base" => Ok(Self::Cl100k),
            "o200k" | "o200k_base" => Ok(Self::O200k),
            "p50k" | "p50k_base" | "gpt2" => Ok(Self::P50k),
            "estimate" | "approx" => Ok(Self::Estimate),
            other => Err(GridError::Tokenizer(format!("unknown tokenizer: {other}"))),
        }
    }
}
