use std::collections::BTreeMap;

use gridwise_index::Fragment;

use crate::scan::{self, DictCode};

pub type CodeTable = BTreeMap<DictCode, String>;

/// Reads the entries of the first dictionary block in `text`.
pub fn parse_dict_block(text: &str) -> CodeTable {
    let mut table = CodeTable::new();
    let mut inside = false;
    for line in text.lines() {
        if scan::is_dict_begin(line) {
            inside = true;
        } else if scan::is_dict_end(line) {
            if inside {
                break;
            }
        } else if inside {
            if let Some((code, value)) = scan::parse_dict_entry(line) {
                table.entry(code).or_insert_with(|| value.to_string());
            }
        }
    }
    table
}

/// Replaces code-valued cells with their literal values; lines inside a
/// dictionary block are left untouched.
pub fn expand_codes(text: &str, table: &CodeTable) -> String {
    if table.is_empty() {
        return text.to_string();
    }
    let mut inside = false;
    let lines: Vec<String> = text
        .lines()
        .map(|line| {
            if scan::is_dict_begin(line) {
                inside = true;
                return line.to_string();
            }
            if scan::is_dict_end(line) {
                inside = false;
                return line.to_string();
            }
            if inside {
                return line.to_string();
            }
            scan::rewrite_values(line, |cell| table.get(&cell.code()?).cloned())
        })
        .collect();
    let mut out = lines.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Expands every fragment using the dictionary carried by the last fragment
/// that has one.
pub fn expand_fragments(fragments: &[Fragment]) -> Vec<Fragment> {
    let table = fragments
        .iter()
        .rev()
        .map(|f| parse_dict_block(&f.content))
        .find(|t| !t.is_empty())
        .unwrap_or_default();
    fragments
        .iter()
        .map(|f| Fragment::new(f.id, expand_codes(&f.content, &table)))
        .collect()
}
