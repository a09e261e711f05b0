use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::Fragment;

static CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"@C\{[A-Z]+\}t\d+").expect("valid regex"));
static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid regex"));

/// Dictionary codes come first as whole tokens, followed by every word run of
/// the same text (codes included, so `@C{A}t1` also yields `c`, `a`, `t1`).
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = CODE_RE
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    tokens.extend(WORD_RE.find_iter(text).map(|m| m.as_str().to_lowercase()));
    tokens
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredFragment {
    pub id: usize,
    pub score: f64,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvertedIndex {
    pub n: usize,
    pub df: BTreeMap<String, usize>,
    pub postings: BTreeMap<String, BTreeMap<usize, usize>>,
}

impl InvertedIndex {
    pub fn build(fragments: &[Fragment]) -> Self {
        let mut index = Self {
            n: fragments.len(),
            ..Self::default()
        };
        for fragment in fragments {
            let mut tf_local: FxHashMap<String, usize> = FxHashMap::default();
            for term in tokenize(&fragment.content) {
                *tf_local.entry(term).or_insert(0) += 1;
            }
            for (term, tf) in tf_local {
                index
                    .postings
                    .entry(term.clone())
                    .or_default()
                    .insert(fragment.id, tf);
                *index.df.entry(term).or_insert(0) += 1;
            }
        }
        tracing::debug!(
            fragments = index.n,
            terms = index.df.len(),
            "built inverted index"
        );
        index
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut file = BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create index {}", path.display()))?,
        );
        bincode::serialize_into(&mut file, self)?;
        file.flush()?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let mut file = BufReader::new(
            File::open(path).with_context(|| format!("failed to open index {}", path.display()))?,
        );
        let index: Self = bincode::deserialize_from(&mut file)
            .with_context(|| format!("corrupt index {}", path.display()))?;
        Ok(index)
    }

    /// Sum of term frequencies per fragment.
    pub fn fragment_lengths(&self) -> BTreeMap<usize, usize> {
        let mut lengths = BTreeMap::new();
        for plist in self.postings.values() {
            for (id, tf) in plist {
                *lengths.entry(*id).or_insert(0) += tf;
            }
        }
        lengths
    }

    /// Raw BM25 scores per fragment id, highest first; equal scores keep
    /// ascending id order.
    pub fn scores(&self, query: &str, params: Bm25Params) -> Vec<(usize, f64)> {
        if query.trim().is_empty() {
            return Vec::new();
        }
        let doc_len = self.fragment_lengths();
        let avgdl = if doc_len.is_empty() {
            1.0
        } else {
            doc_len.values().sum::<usize>() as f64 / doc_len.len() as f64
        };
        let n = self.n as f64;
        let mut scores: BTreeMap<usize, f64> = BTreeMap::new();
        for term in tokenize(query) {
            let Some(&ft) = self.df.get(&term) else {
                continue;
            };
            if ft == 0 {
                continue;
            }
            let ft = ft as f64;
            let idf = (1.0 + (n - ft + 0.5) / (ft + 0.5)).ln();
            let Some(plist) = self.postings.get(&term) else {
                continue;
            };
            for (id, tf) in plist {
                let tf = *tf as f64;
                let dl = doc_len.get(id).copied().unwrap_or(1) as f64;
                let denom = tf + params.k1 * (1.0 - params.b + params.b * (dl / avgdl));
                *scores.entry(*id).or_insert(0.0) += idf * (tf * (params.k1 + 1.0)) / denom;
            }
        }
        let mut ranked: Vec<(usize, f64)> = scores.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        ranked
    }

    /// Ids without a matching fragment are dropped before the top-k cut.
    pub fn search(
        &self,
        query: &str,
        fragments: &[Fragment],
        top_k: usize,
        params: Bm25Params,
    ) -> Vec<ScoredFragment> {
        let by_id: HashMap<usize, &Fragment> = fragments.iter().map(|f| (f.id, f)).collect();
        self.scores(query, params)
            .into_iter()
            .filter_map(|(id, score)| {
                by_id.get(&id).map(|fragment| ScoredFragment {
                    id,
                    score,
                    content: fragment.content.clone(),
                })
            })
            .take(top_k)
            .collect()
    }
}
