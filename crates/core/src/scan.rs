//! Scanner for the encoded-text grammar: cell assignments, dictionary codes and
//! the trailing dictionary block.

use std::fmt;
use std::ops::Range;

pub const ANCHOR_PREFIX: &str = "[ANCHOR]";
pub const META_PREFIX: &str = "[META]";
pub const COLLAPSED_PREFIX: &str = "[COLLAPSED";
pub const AGG_PREFIX: &str = "[AGG";
pub const DICT_BEGIN: &str = "[DICT-BEGIN]";
pub const DICT_END: &str = "[DICT-END]";
pub const CELL_SEPARATOR: &str = " | ";
pub const MISSING_VALUE: &str = "<MISSING>";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DictCode {
    pub column: String,
    pub ordinal: u32,
}

impl DictCode {
    pub fn new(column: impl Into<String>, ordinal: u32) -> Self {
        Self {
            column: column.into(),
            ordinal,
        }
    }

    /// Parses a whole token of the form `@C{COL}tN` with `N >= 1`.
    pub fn parse(token: &str) -> Option<Self> {
        let rest = token.strip_prefix("@C{")?;
        let close = rest.find('}')?;
        let column = &rest[..close];
        if column.is_empty() || !column.bytes().all(|b| b.is_ascii_uppercase()) {
            return None;
        }
        let digits = rest[close + 1..].strip_prefix('t')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let ordinal: u32 = digits.parse().ok()?;
        if ordinal == 0 {
            return None;
        }
        Some(Self::new(column, ordinal))
    }
}

impl fmt::Display for DictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@C{{{}}}t{}", self.column, self.ordinal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Quoted,
    Code,
    Bare,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<'a> {
    pub address: &'a str,
    pub column: &'a str,
    pub value: &'a str,
    pub value_span: Range<usize>,
    pub fmt: Option<&'a str>,
    quoted: bool,
}

impl<'a> Assignment<'a> {
    pub fn kind(&self) -> ValueKind {
        if self.quoted {
            ValueKind::Quoted
        } else if DictCode::parse(self.value).is_some() {
            ValueKind::Code
        } else {
            ValueKind::Bare
        }
    }

    pub fn code(&self) -> Option<DictCode> {
        if self.quoted {
            None
        } else {
            DictCode::parse(self.value)
        }
    }

    /// Inner text of a quoted value, escapes left as written.
    pub fn unquoted(&self) -> Option<&'a str> {
        if self.quoted {
            Some(&self.value[1..self.value.len() - 1])
        } else {
            None
        }
    }
}

/// Cell assignments of one line. Assignments start at the line start (after an
/// optional `[ANCHOR]` prefix) or right after a ` | ` separator; text that does
/// not parse is skipped up to the next separator.
pub fn assignments(line: &str) -> Vec<Assignment<'_>> {
    let mut out = Vec::new();
    let mut pos = if line.starts_with(ANCHOR_PREFIX) {
        ANCHOR_PREFIX.len()
    } else {
        0
    };
    while pos < line.len() {
        if let Some((assignment, end)) = parse_assignment(line, pos) {
            out.push(assignment);
            if end >= line.len() {
                break;
            }
            if line[end..].starts_with(CELL_SEPARATOR) {
                pos = end + CELL_SEPARATOR.len();
                continue;
            }
            pos = end;
        }
        match line[pos..].find(CELL_SEPARATOR) {
            Some(offset) => pos += offset + CELL_SEPARATOR.len(),
            None => break,
        }
    }
    out
}

fn parse_assignment(line: &str, start: usize) -> Option<(Assignment<'_>, usize)> {
    let bytes = line.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_uppercase() {
        i += 1;
    }
    if i == start {
        return None;
    }
    let letters_end = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == letters_end || bytes.get(i) != Some(&b'=') {
        return None;
    }
    let address_end = i;
    let value_start = i + 1;

    let quoted_end = match bytes.get(value_start) {
        Some(&q) if q == b'\'' || q == b'"' => closing_quote(bytes, value_start)
            .map(|close| close + 1)
            .filter(|end| at_value_boundary(line, *end)),
        _ => None,
    };
    let (value_end, quoted) = match quoted_end {
        Some(end) => (end, true),
        None => (bare_value_end(line, value_start), false),
    };

    let mut end = value_end;
    let mut fmt = None;
    if line[value_end..].starts_with("::") {
        let fmt_start = value_end + 2;
        let fmt_end = line[fmt_start..]
            .find(CELL_SEPARATOR)
            .map(|offset| fmt_start + offset)
            .unwrap_or(line.len());
        fmt = Some(&line[fmt_start..fmt_end]);
        end = fmt_end;
    }

    Some((
        Assignment {
            address: &line[start..address_end],
            column: &line[start..letters_end],
            value: &line[value_start..value_end],
            value_span: value_start..value_end,
            fmt,
            quoted,
        },
        end,
    ))
}

fn closing_quote(bytes: &[u8], open: usize) -> Option<usize> {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn at_value_boundary(line: &str, pos: usize) -> bool {
    pos >= line.len() || line[pos..].starts_with("::") || line[pos..].starts_with(CELL_SEPARATOR)
}

fn bare_value_end(line: &str, start: usize) -> usize {
    let rest = &line[start..];
    let fmt = rest.find("::");
    let sep = rest.find(CELL_SEPARATOR);
    let offset = match (fmt, sep) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => rest.len(),
    };
    start + offset
}

/// Lines that delimit aggregation spans and are never sampled away.
pub fn is_marker_line(line: &str) -> bool {
    line.starts_with(ANCHOR_PREFIX)
        || line.starts_with(META_PREFIX)
        || line.starts_with("[DICT")
        || line.starts_with(COLLAPSED_PREFIX)
        || line.starts_with(AGG_PREFIX)
}

pub fn is_dict_begin(line: &str) -> bool {
    line.trim() == DICT_BEGIN
}

pub fn is_dict_end(line: &str) -> bool {
    line.trim() == DICT_END
}

/// Removes every complete dictionary block; an unterminated `[DICT-BEGIN]` is
/// left as ordinary text.
pub fn strip_dict_blocks(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut kept = Vec::with_capacity(lines.len());
    let mut i = 0;
    while i < lines.len() {
        if is_dict_begin(lines[i]) {
            if let Some(offset) = lines[i + 1..].iter().position(|l| is_dict_end(l)) {
                i += offset + 2;
                continue;
            }
        }
        kept.push(lines[i]);
        i += 1;
    }
    kept.join("\n").trim_end().to_string()
}

/// Splits off the trailing dictionary block, returning `(body, block)`.
pub fn split_trailing_dict_block(text: &str) -> (&str, Option<&str>) {
    let start = text
        .rmatch_indices(DICT_BEGIN)
        .map(|(pos, _)| pos)
        .find(|pos| *pos == 0 || text[..*pos].ends_with('\n'));
    match start {
        Some(pos) if text[pos..].lines().any(is_dict_end) => (&text[..pos], Some(&text[pos..])),
        _ => (text, None),
    }
}

/// Parses one `@C{COL}tN=value` line of a dictionary block.
pub fn parse_dict_entry(line: &str) -> Option<(DictCode, &str)> {
    let (code, value) = line.trim().split_once('=')?;
    if value.is_empty() {
        return None;
    }
    Some((DictCode::parse(code)?, value))
}

/// Codes referenced by code-valued cells anywhere in `text`.
pub fn referenced_codes(text: &str) -> Vec<DictCode> {
    text.lines()
        .flat_map(|line| {
            assignments(line)
                .into_iter()
                .filter_map(|a| a.code())
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Rewrites selected assignment values of a line; `replace` returns the new
/// value text or `None` to keep the original.
pub fn rewrite_values<F>(line: &str, mut replace: F) -> String
where
    F: FnMut(&Assignment<'_>) -> Option<String>,
{
    let mut edits: Vec<(Range<usize>, String)> = assignments(line)
        .iter()
        .filter_map(|a| replace(a).map(|new| (a.value_span.clone(), new)))
        .collect();
    if edits.is_empty() {
        return line.to_string();
    }
    let mut out = line.to_string();
    edits.reverse();
    for (span, new) in edits {
        out.replace_range(span, &new);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_cell_line() {
        let cells = assignments("A1='Region'::header | B1=12.5 | AA1=NaN");
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].address, "A1");
        assert_eq!(cells[0].column, "A");
        assert_eq!(cells[0].value, "'Region'");
        assert_eq!(cells[0].fmt, Some("header"));
        assert_eq!(cells[0].kind(), ValueKind::Quoted);
        assert_eq!(cells[1].value, "12.5");
        assert_eq!(cells[1].kind(), ValueKind::Bare);
        assert_eq!(cells[2].column, "AA");
    }

    #[test]
    fn anchor_prefix_is_skipped() {
        let cells = assignments("[ANCHOR]A1='Total' | B1=@C{B}t3");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].code(), Some(DictCode::new("B", 3)));
    }

    #[test]
    fn quoted_values_may_contain_separators_and_codes() {
        let line = "A2='left | right' | B2='@C{A}t1' | C2=\"it's\"";
        let cells = assignments(line);
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].unquoted(), Some("left | right"));
        assert_eq!(cells[1].kind(), ValueKind::Quoted);
        assert_eq!(cells[1].code(), None);
        assert_eq!(cells[2].unquoted(), Some("it's"));
    }

    #[test]
    fn escaped_quotes_stay_inside_value() {
        let cells = assignments(r"A2='a\'b' | B2=1");
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].value, r"'a\'b'");
    }

    #[test]
    fn bare_value_splits_numeric_format() {
        let cells = assignments("C5=1250::#,##0.00");
        assert_eq!(cells[0].value, "1250");
        assert_eq!(cells[0].fmt, Some("#,##0.00"));
    }

    #[test]
    fn marker_lines_have_no_assignments() {
        assert!(assignments("# Sheet: Sales (3x2)").is_empty());
        assert!(assignments("[META] merged=0,0,0,1").is_empty());
        assert!(assignments("[AGG span=12 kept=5 stats=B:count=12,min=1 | C:count=12]").is_empty());
        assert!(assignments("@C{A}t1='North'").is_empty());
        assert!(assignments("").is_empty());
    }

    #[test]
    fn code_parsing() {
        assert_eq!(DictCode::parse("@C{AB}t12"), Some(DictCode::new("AB", 12)));
        assert_eq!(DictCode::new("AB", 12).to_string(), "@C{AB}t12");
        assert_eq!(DictCode::parse("@C{ab}t1"), None);
        assert_eq!(DictCode::parse("@C{A}t0"), None);
        assert_eq!(DictCode::parse("@C{A}t1x"), None);
        assert_eq!(DictCode::parse("@C{}t1"), None);
    }

    #[test]
    fn strip_removes_complete_blocks_only() {
        let text = "A1=@C{A}t1\n[DICT-BEGIN]\n[COL A]\n@C{A}t1='x'\n[DICT-END]\n";
        assert_eq!(strip_dict_blocks(text), "A1=@C{A}t1");
        let dangling = "A1=1\n[DICT-BEGIN]\n[COL A]";
        assert_eq!(strip_dict_blocks(dangling), dangling);
    }

    #[test]
    fn split_finds_trailing_block() {
        let text = "A1=@C{A}t1\n[DICT-BEGIN]\n[COL A]\n@C{A}t1='x'\n[DICT-END]\n";
        let (body, block) = split_trailing_dict_block(text);
        assert_eq!(body, "A1=@C{A}t1\n");
        assert!(block.unwrap().starts_with(DICT_BEGIN));
        assert_eq!(split_trailing_dict_block("A1=1").1, None);
    }

    #[test]
    fn dict_entry_parsing() {
        let (code, value) = parse_dict_entry("@C{B}t2='No'").unwrap();
        assert_eq!(code, DictCode::new("B", 2));
        assert_eq!(value, "'No'");
        assert!(parse_dict_entry("[COL B]").is_none());
    }

    #[test]
    fn rewrite_touches_only_selected_values() {
        let line = "[ANCHOR]A1='x' | B1=2 | C1='y'";
        let out = rewrite_values(line, |a| {
            (a.kind() == ValueKind::Quoted).then(|| format!("<{}>", a.column))
        });
        assert_eq!(out, "[ANCHOR]A1=<A> | B1=2 | C1=<C>");
    }
}
