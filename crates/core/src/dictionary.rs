use std::collections::BTreeMap;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::scan::{self, DictCode, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryConfig {
    pub min_freq: usize,
    pub encode_all_strings: bool,
    pub skip_if_shorter_than: Option<usize>,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            min_freq: 3,
            encode_all_strings: false,
            skip_if_shorter_than: Some(3),
        }
    }
}

/// Per column: code ordinal → exemplar quoted value.
pub type ReverseDictionary = BTreeMap<String, BTreeMap<u32, String>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DictionaryMeta {
    pub encode_all_strings: bool,
    pub min_freq: usize,
    pub skip_if_shorter_than: Option<usize>,
    pub columns: usize,
    pub codes: usize,
    pub replaced_cells: usize,
}

#[derive(Debug, Clone)]
pub struct DictionaryPass {
    pub text: String,
    pub reverse: ReverseDictionary,
    pub meta: DictionaryMeta,
}

#[derive(Debug)]
struct ValueStats {
    count: usize,
    exemplar: String,
}

pub(crate) fn normalize_value(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn qualifies(norm: &str, skip_if_shorter_than: Option<usize>) -> bool {
    skip_if_shorter_than.map_or(true, |min| norm.chars().count() >= min)
}

/// Replaces repeated quoted string values with per-column `@C{COL}tN` codes.
pub fn compress(text: &str, config: &DictionaryConfig) -> DictionaryPass {
    let base = scan::strip_dict_blocks(text);

    let mut columns: BTreeMap<String, IndexMap<String, ValueStats>> = BTreeMap::new();
    // document-wide first appearance of each normalized value, for tie breaks
    let mut first_seen: IndexSet<String> = IndexSet::new();
    for line in base.lines() {
        for cell in scan::assignments(line) {
            let Some(inner) = cell.unquoted() else {
                continue;
            };
            let norm = normalize_value(inner);
            if !qualifies(&norm, config.skip_if_shorter_than) {
                continue;
            }
            if !first_seen.contains(&norm) {
                first_seen.insert(norm.clone());
            }
            let stats = columns
                .entry(cell.column.to_string())
                .or_default()
                .entry(norm)
                .or_insert_with(|| ValueStats {
                    count: 0,
                    exemplar: cell.value.to_string(),
                });
            stats.count += 1;
        }
    }

    let mut codes: BTreeMap<String, IndexMap<String, u32>> = BTreeMap::new();
    let mut reverse = ReverseDictionary::new();
    for (column, values) in &columns {
        let mut vocab: Vec<(&String, &ValueStats)> = values
            .iter()
            .filter(|(_, stats)| config.encode_all_strings || stats.count >= config.min_freq)
            .collect();
        if vocab.is_empty() {
            continue;
        }
        vocab.sort_by(|a, b| {
            b.1.count.cmp(&a.1.count).then_with(|| {
                first_seen
                    .get_index_of(a.0)
                    .cmp(&first_seen.get_index_of(b.0))
            })
        });
        let mapping = codes.entry(column.clone()).or_default();
        let rev = reverse.entry(column.clone()).or_default();
        for (ordinal, (norm, stats)) in (1u32..).zip(vocab) {
            mapping.insert(norm.clone(), ordinal);
            rev.insert(ordinal, stats.exemplar.clone());
        }
    }

    let mut replaced_cells = 0usize;
    let out: Vec<String> = base
        .lines()
        .map(|line| {
            scan::rewrite_values(line, |cell| {
                if cell.kind() != ValueKind::Quoted {
                    return None;
                }
                let norm = normalize_value(cell.unquoted()?);
                let ordinal = codes.get(cell.column)?.get(&norm)?;
                replaced_cells += 1;
                Some(DictCode::new(cell.column, *ordinal).to_string())
            })
        })
        .collect();

    let meta = DictionaryMeta {
        encode_all_strings: config.encode_all_strings,
        min_freq: config.min_freq,
        skip_if_shorter_than: config.skip_if_shorter_than,
        columns: reverse.len(),
        codes: reverse.values().map(|m| m.len()).sum(),
        replaced_cells,
    };
    tracing::debug!(
        columns = meta.columns,
        codes = meta.codes,
        replaced = meta.replaced_cells,
        "dictionary compression"
    );
    DictionaryPass {
        text: out.join("\n").trim_end().to_string(),
        reverse,
        meta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_all() -> DictionaryConfig {
        DictionaryConfig {
            min_freq: 1,
            encode_all_strings: true,
            skip_if_shorter_than: None,
        }
    }

    #[test]
    fn codes_follow_frequency_then_first_appearance() {
        let text = "A1='Yes' | B1='No'\nA2='Yes' | B2='Yes'";
        let pass = compress(text, &encode_all());
        assert_eq!(pass.text, "A1=@C{A}t1 | B1=@C{B}t2\nA2=@C{A}t1 | B2=@C{B}t1");
        assert_eq!(pass.reverse["A"][&1], "'Yes'");
        assert_eq!(pass.reverse["B"][&1], "'Yes'");
        assert_eq!(pass.reverse["B"][&2], "'No'");
    }

    #[test]
    fn higher_frequency_gets_lower_ordinal() {
        let text = "A1='cat'\nA2='dog'\nA3='dog'";
        let pass = compress(text, &encode_all());
        assert_eq!(pass.text, "A1=@C{A}t2\nA2=@C{A}t1\nA3=@C{A}t1");
    }

    #[test]
    fn min_freq_filters_rare_values() {
        let config = DictionaryConfig {
            min_freq: 2,
            encode_all_strings: false,
            skip_if_shorter_than: None,
        };
        let text = "A1='North'\nA2='North'\nA3='South'";
        let pass = compress(text, &config);
        assert_eq!(pass.text, "A1=@C{A}t1\nA2=@C{A}t1\nA3='South'");
        assert_eq!(pass.meta.codes, 1);
    }

    #[test]
    fn short_values_are_skipped() {
        let config = DictionaryConfig {
            skip_if_shorter_than: Some(3),
            ..encode_all()
        };
        let pass = compress("A1='NY' | B1='Boston'\nA2='NY' | B2='Boston'", &config);
        assert_eq!(pass.text, "A1='NY' | B1=@C{B}t1\nA2='NY' | B2=@C{B}t1");
        assert!(!pass.reverse.contains_key("A"));
    }

    #[test]
    fn whitespace_variants_share_a_code() {
        let pass = compress("A1='New  York'\nA2='New York'", &encode_all());
        assert_eq!(pass.text, "A1=@C{A}t1\nA2=@C{A}t1");
        assert_eq!(pass.reverse["A"][&1], "'New  York'");
    }

    #[test]
    fn numbers_and_codes_are_untouched() {
        let pass = compress("A1=12 | B1=@C{B}t4 | C1=NaN | D1=True", &encode_all());
        assert_eq!(pass.text, "A1=12 | B1=@C{B}t4 | C1=NaN | D1=True");
        assert!(pass.reverse.is_empty());
    }

    #[test]
    fn existing_dictionary_block_is_stripped_before_scanning() {
        let text = "A1='x y z'\n[DICT-BEGIN]\n[COL A]\n@C{A}t1='stale'\n[DICT-END]";
        let pass = compress(text, &encode_all());
        assert_eq!(pass.text, "A1=@C{A}t1");
        assert_eq!(pass.reverse["A"][&1], "'x y z'");
    }

    #[test]
    fn applying_twice_is_stable() {
        let config = DictionaryConfig {
            min_freq: 2,
            encode_all_strings: false,
            skip_if_shorter_than: Some(2),
        };
        let text = "[ANCHOR]A1='Name'::header\nA2='Ann' | B2='x'\nA3='Ann' | B3='y'\nA4='Bob' | B4='x'";
        let once = compress(text, &config).text;
        let twice = compress(&once, &config).text;
        assert_eq!(once, twice);
    }
}
