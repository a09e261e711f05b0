use gridwise_index::Fragment;
use serde::{Deserialize, Serialize};

use crate::scan::{self, ANCHOR_PREFIX};
use crate::stats::TokenCounter;

/// Characters per token assumed when a token budget has to be turned into a
/// character window.
pub const CHARS_PER_TOKEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            overlap_tokens: 200,
        }
    }
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Splits `text` into fragments of at most `max_tokens`, cutting only
    /// between anchor segments where possible and keeping a trailing
    /// dictionary block whole as the last fragment.
    ///
    /// Every fragment is counted as joined text, overlap seed included. When
    /// the seed plus the next segment would exceed the budget the seed is
    /// dropped, so that fragment starts without overlap.
    pub fn chunk(&self, text: &str, counter: &dyn TokenCounter) -> Vec<Fragment> {
        let max_tokens = self.config.max_tokens.max(1);
        if counter.count(text) <= max_tokens {
            return vec![Fragment::new(0, text)];
        }

        let (body, dict) = scan::split_trailing_dict_block(text);
        let mut packer = Packer::new(max_tokens, self.config.overlap_tokens, counter);
        for segment in anchor_segments(body) {
            if counter.count(&segment.join("\n")) <= max_tokens {
                packer.push(segment.as_slice());
                continue;
            }
            for line in segment {
                if counter.count(line) <= max_tokens {
                    packer.push(&[line]);
                } else {
                    for piece in hard_split(line, max_tokens * CHARS_PER_TOKEN) {
                        packer.push(&[piece]);
                    }
                }
            }
        }
        let mut fragments = packer.finish();

        if let Some(block) = dict {
            let block = block.trim();
            if !block.is_empty() {
                fragments.push(Fragment::new(fragments.len(), block));
            }
        }
        tracing::debug!(
            fragments = fragments.len(),
            max_tokens,
            overlap = self.config.overlap_tokens,
            "chunked encoded text"
        );
        fragments
    }
}

/// Body lines grouped so that every `[ANCHOR]` line starts a new segment.
fn anchor_segments(body: &str) -> Vec<Vec<&str>> {
    let mut segments: Vec<Vec<&str>> = Vec::new();
    for line in body.lines() {
        if line.starts_with(ANCHOR_PREFIX) || segments.is_empty() {
            segments.push(Vec::new());
        }
        if let Some(current) = segments.last_mut() {
            current.push(line);
        }
    }
    segments
}

fn hard_split(line: &str, width: usize) -> Vec<&str> {
    let width = width.max(1);
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut chars = 0;
    for (pos, _) in line.char_indices() {
        if chars == width {
            pieces.push(&line[start..pos]);
            start = pos;
            chars = 0;
        }
        chars += 1;
    }
    pieces.push(&line[start..]);
    pieces
}

/// Trailing `chars` characters of `text`.
pub fn tail_chars(text: &str, chars: usize) -> &str {
    if chars == 0 {
        return "";
    }
    match text.char_indices().rev().nth(chars - 1) {
        Some((pos, _)) => &text[pos..],
        None => text,
    }
}

struct Packer<'c> {
    max_tokens: usize,
    overlap_chars: usize,
    counter: &'c dyn TokenCounter,
    fragments: Vec<Fragment>,
    buf: Vec<String>,
    // buffer holds nothing but the overlap seed
    fresh: bool,
}

impl<'c> Packer<'c> {
    fn new(max_tokens: usize, overlap_tokens: usize, counter: &'c dyn TokenCounter) -> Self {
        Self {
            max_tokens,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
            counter,
            fragments: Vec::new(),
            buf: Vec::new(),
            fresh: false,
        }
    }

    /// Tokens of the buffer with `lines` appended, as it would be emitted.
    fn candidate_tokens<S: AsRef<str>>(&self, lines: &[S]) -> usize {
        let joined: Vec<&str> = self
            .buf
            .iter()
            .map(String::as_str)
            .chain(lines.iter().map(|l| l.as_ref()))
            .collect();
        self.counter.count(&joined.join("\n"))
    }

    fn push<S: AsRef<str>>(&mut self, lines: &[S]) {
        if !self.buf.is_empty() && self.candidate_tokens(lines) > self.max_tokens {
            if !self.fresh {
                self.flush();
            }
            if self.fresh && self.candidate_tokens(lines) > self.max_tokens {
                tracing::debug!(
                    fragment = self.fragments.len(),
                    max_tokens = self.max_tokens,
                    "dropping overlap seed"
                );
                self.clear();
            }
        }
        self.buf.extend(lines.iter().map(|l| l.as_ref().to_string()));
        self.fresh = false;
    }

    fn flush(&mut self) {
        let content = self.buf.join("\n");
        self.clear();
        if self.overlap_chars > 0 {
            self.buf
                .push(tail_chars(&content, self.overlap_chars).to_string());
            self.fresh = true;
        }
        self.fragments.push(Fragment::new(self.fragments.len(), content));
    }

    fn clear(&mut self) {
        self.buf.clear();
        self.fresh = false;
    }

    fn finish(mut self) -> Vec<Fragment> {
        if !self.buf.is_empty() && !self.fresh {
            let content = self.buf.join("\n");
            self.fragments.push(Fragment::new(self.fragments.len(), content));
        }
        self.fragments
    }
}
