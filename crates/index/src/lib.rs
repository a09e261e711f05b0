use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod bm25;

pub use bm25::{tokenize, Bm25Params, InvertedIndex, ScoredFragment};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: usize,
    pub content: String,
}

impl Fragment {
    pub fn new(id: usize, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
        }
    }
}

pub struct JsonlWriter<W> {
    writer: W,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let mut buf = serde_json::to_vec(record)?;
        buf.push(b'\n');
        self.writer.write_all(&buf)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

pub fn save_fragments(path: &Path, fragments: &[Fragment]) -> Result<()> {
    let mut writer = create_fragment_writer(path)?;
    for fragment in fragments {
        writer.write_record(fragment)?;
    }
    writer.flush()
}

pub fn create_fragment_writer(path: &Path) -> Result<JsonlWriter<BufWriter<File>>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create fragment store {}", path.display()))?;
    Ok(JsonlWriter::new(BufWriter::new(file)))
}

pub fn load_fragments(path: &Path) -> Result<Vec<Fragment>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open fragment store {}", path.display()))?;
    read_fragments(BufReader::new(file))
}

/// Lines that are not objects carrying both `id` and `content` are skipped.
pub fn read_fragments<R: BufRead>(reader: R) -> Result<Vec<Fragment>> {
    let mut fragments = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: Value = serde_json::from_str(&line)
            .with_context(|| format!("invalid fragment record on line {}", line_no + 1))?;
        let id = value.get("id").and_then(Value::as_u64);
        let content = value.get("content").and_then(Value::as_str);
        if let (Some(id), Some(content)) = (id, content) {
            fragments.push(Fragment::new(id as usize, content));
        }
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_writer_roundtrips_fragments() {
        let fragments = vec![
            Fragment::new(0, "[ANCHOR]# Sheet: Sales (3x2)\nA2='North' | B2=10"),
            Fragment::new(1, "[DICT-BEGIN]\n[COL A]\n@C{A}t1='North'\n[DICT-END]"),
        ];
        let mut writer = JsonlWriter::new(Vec::new());
        for fragment in &fragments {
            writer.write_record(fragment).unwrap();
        }
        let buf = writer.into_inner();
        assert!(buf.ends_with(b"\n"));
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 2);
        let parsed = read_fragments(buf.as_slice()).unwrap();
        assert_eq!(parsed, fragments);
    }

    #[test]
    fn reader_skips_records_without_schema() {
        let input = "{\"id\":0,\"content\":\"a\"}\n{\"other\":1}\n\n{\"id\":2,\"content\":\"c\"}\n";
        let parsed = read_fragments(input.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[1].id, 2);
        assert_eq!(parsed[1].content, "c");
    }

    #[test]
    fn save_and_load_preserve_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/store.jsonl");
        let fragments: Vec<Fragment> = (0..5)
            .map(|i| Fragment::new(i, format!("line {i}\nwith \"quotes\" | and pipes")))
            .collect();
        save_fragments(&path, &fragments).unwrap();
        assert_eq!(load_fragments(&path).unwrap(), fragments);
    }
}
