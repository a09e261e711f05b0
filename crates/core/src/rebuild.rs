use std::collections::{BTreeMap, BTreeSet};

use crate::dictionary::ReverseDictionary;
use crate::scan::{self, DictCode, DICT_BEGIN, DICT_END, MISSING_VALUE};

/// Replaces any dictionary blocks with one trailing block holding exactly the
/// codes the body references.
pub fn rebuild_dictionary_block(text: &str, reverse: &ReverseDictionary) -> String {
    let base = scan::strip_dict_blocks(text);

    let mut used: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
    for code in scan::referenced_codes(&base) {
        used.entry(code.column).or_default().insert(code.ordinal);
    }
    if used.is_empty() {
        return base;
    }

    let mut block = vec![DICT_BEGIN.to_string()];
    let mut missing = 0usize;
    for (column, ordinals) in &used {
        block.push(format!("[COL {column}]"));
        let known = reverse.get(column);
        for ordinal in ordinals {
            let code = DictCode::new(column.as_str(), *ordinal);
            let value = match known.and_then(|m| m.get(ordinal)) {
                Some(value) => value.as_str(),
                None => {
                    missing += 1;
                    MISSING_VALUE
                }
            };
            block.push(format!("{code}={value}"));
        }
    }
    block.push(DICT_END.to_string());

    if missing > 0 {
        tracing::warn!(missing, "dictionary codes without a reverse mapping");
    }
    format!("{base}\n{}\n", block.join("\n"))
}
