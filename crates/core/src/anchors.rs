use serde::Serialize;

use crate::scan::{ANCHOR_PREFIX, META_PREFIX};

const TOTAL_WORDS: [&str; 5] = ["total", "subtotal", "sum", "avg", "average"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnchorMeta {
    /// Original line indices kept as anchors.
    pub anchors: Vec<usize>,
    pub collapse_width: usize,
    pub collapsed_lines: usize,
}

#[derive(Debug, Clone)]
pub struct AnchorPass {
    pub text: String,
    pub meta: AnchorMeta,
}

pub fn is_anchor_line(index: usize, line: &str) -> bool {
    (index == 0 && line.starts_with("# Sheet:"))
        || line.starts_with(ANCHOR_PREFIX)
        || line.contains("::header")
        || line.starts_with(META_PREFIX)
        || mentions_total(line)
}

fn mentions_total(line: &str) -> bool {
    line.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .any(|word| TOTAL_WORDS.iter().any(|t| word.eq_ignore_ascii_case(t)))
}

/// Prefixes anchor lines with `[ANCHOR]`; with `collapse_width > 0` a span of
/// more than `2 * collapse_width` plain lines keeps its first and last
/// `collapse_width` lines around a `[COLLAPSED span=N]` marker.
pub fn apply_anchors(text: &str, collapse_width: usize) -> AnchorPass {
    let lines: Vec<&str> = text.lines().collect();
    let is_anchor: Vec<bool> = lines
        .iter()
        .enumerate()
        .map(|(i, line)| is_anchor_line(i, line))
        .collect();

    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut meta = AnchorMeta {
        collapse_width,
        ..AnchorMeta::default()
    };
    let mut i = 0;
    while i < lines.len() {
        if is_anchor[i] {
            if lines[i].starts_with(ANCHOR_PREFIX) {
                out.push(lines[i].to_string());
            } else {
                out.push(format!("{ANCHOR_PREFIX}{}", lines[i]));
            }
            meta.anchors.push(i);
            i += 1;
            continue;
        }
        let mut j = i;
        while j < lines.len() && !is_anchor[j] {
            j += 1;
        }
        let span = &lines[i..j];
        if collapse_width > 0 && span.len() > 2 * collapse_width {
            let dropped = span.len() - 2 * collapse_width;
            out.extend(span[..collapse_width].iter().map(|l| l.to_string()));
            out.push(format!("[COLLAPSED span={dropped}]"));
            out.extend(span[span.len() - collapse_width..].iter().map(|l| l.to_string()));
            meta.collapsed_lines += dropped;
        } else {
            out.extend(span.iter().map(|l| l.to_string()));
        }
        i = j;
    }
    tracing::debug!(
        anchors = meta.anchors.len(),
        collapsed = meta.collapsed_lines,
        "applied anchors"
    );
    AnchorPass {
        text: out.join("\n"),
        meta,
    }
}
