//! Two-pass, bounded-memory encoder for row sources too large to hold as a
//! [`Grid`](crate::model::Grid).
//!
//! Pass one only counts quoted string renderings per column; pass two renders
//! rows, substitutes codes and hands finished fragments to a [`FragmentSink`]
//! as soon as they exceed the token budget. Neither pass keeps more than one
//! row batch alive.

use std::io::Write;
use std::path::{Path, PathBuf};

use gridwise_index::{Fragment, JsonlWriter};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::chunk::{tail_chars, CHARS_PER_TOKEN};
use crate::encoder::OutputMode;
use crate::error::{GridError, Result};
use crate::loader::{self, InputFormat};
use crate::model::{cell_address, column_letters, quote_literal, CellValue};
use crate::scan::{ANCHOR_PREFIX, CELL_SEPARATOR, DICT_BEGIN, DICT_END};
use crate::serializer::{render_assignment, title_line};
use crate::stats::TokenCounter;

/// A re-readable source of typed rows.
pub trait RowSource {
    fn column_names(&mut self) -> Result<Vec<String>>;

    /// Reads the source from the start, handing over batches of at most
    /// `batch_size` rows.
    fn scan(
        &mut self,
        batch_size: usize,
        visit: &mut dyn FnMut(&[Vec<CellValue>]) -> Result<()>,
    ) -> Result<()>;
}

/// Receives fragments as the streaming encoder produces them.
pub trait FragmentSink {
    fn accept(&mut self, fragment: Fragment) -> Result<()>;
}

impl FragmentSink for Vec<Fragment> {
    fn accept(&mut self, fragment: Fragment) -> Result<()> {
        self.push(fragment);
        Ok(())
    }
}

impl<W: Write> FragmentSink for JsonlWriter<W> {
    fn accept(&mut self, fragment: Fragment) -> Result<()> {
        self.write_record(&fragment)?;
        Ok(())
    }
}

pub struct CsvRowSource {
    path: PathBuf,
    format: InputFormat,
    usecols: Option<Vec<String>>,
}

impl CsvRowSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(GridError::InputNotFound(path.to_path_buf()));
        }
        let format = InputFormat::detect(path)?;
        if format == InputFormat::Workbook {
            return Err(GridError::UnsupportedInput(path.to_path_buf()));
        }
        Ok(Self {
            path: path.to_path_buf(),
            format,
            usecols: None,
        })
    }

    /// Restricts the source to the named columns, in source order.
    pub fn with_usecols(mut self, usecols: Vec<String>) -> Self {
        self.usecols = if usecols.is_empty() { None } else { Some(usecols) };
        self
    }

    fn reader(&self) -> Result<csv::Reader<Box<dyn std::io::Read>>> {
        let inner = loader::open_delimited(&self.path, self.format)?;
        Ok(loader::delimited_reader(inner, self.format.delimiter()))
    }

    /// Header names and the source field index of every selected column.
    fn projection(
        &self,
        reader: &mut csv::Reader<Box<dyn std::io::Read>>,
    ) -> Result<(Vec<String>, Vec<usize>)> {
        let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if header.is_empty() || header.iter().all(|h| h.is_empty()) {
            return Err(GridError::EmptySource(self.path.display().to_string()));
        }
        let Some(usecols) = &self.usecols else {
            let indices = (0..header.len()).collect();
            return Ok((header, indices));
        };
        if let Some(unknown) = usecols.iter().find(|c| !header.contains(c)) {
            return Err(GridError::InvalidGrid(format!("unknown column: {unknown}")));
        }
        let indices: Vec<usize> = header
            .iter()
            .enumerate()
            .filter(|(_, h)| usecols.contains(h))
            .map(|(i, _)| i)
            .collect();
        let names = indices.iter().map(|&i| header[i].clone()).collect();
        Ok((names, indices))
    }
}

impl RowSource for CsvRowSource {
    fn column_names(&mut self) -> Result<Vec<String>> {
        let mut reader = self.reader()?;
        Ok(self.projection(&mut reader)?.0)
    }

    fn scan(
        &mut self,
        batch_size: usize,
        visit: &mut dyn FnMut(&[Vec<CellValue>]) -> Result<()>,
    ) -> Result<()> {
        let batch_size = batch_size.max(1);
        let mut reader = self.reader()?;
        let (_, indices) = self.projection(&mut reader)?;
        let mut batch = Vec::with_capacity(batch_size.min(4096));
        for record in reader.records() {
            let record = record?;
            batch.push(
                indices
                    .iter()
                    .map(|&i| CellValue::infer(record.get(i).unwrap_or("")))
                    .collect(),
            );
            if batch.len() == batch_size {
                visit(&batch)?;
                batch.clear();
            }
        }
        if !batch.is_empty() {
            visit(&batch)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub batch_size: usize,
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
    pub build_dictionary: bool,
    pub include_format: bool,
    pub output_mode: OutputMode,
    pub skip_if_shorter_than: Option<usize>,
    /// Unset keeps every distinct value; set applies the same cut-off as the
    /// in-memory compressor.
    pub min_freq: Option<usize>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: 100_000,
            max_tokens_per_chunk: 4_000,
            overlap_tokens: 200,
            build_dictionary: true,
            include_format: true,
            output_mode: OutputMode::Compressed,
            skip_if_shorter_than: Some(3),
            min_freq: None,
        }
    }
}

impl StreamConfig {
    fn compress(&self) -> bool {
        self.build_dictionary && self.output_mode != OutputMode::Expanded
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamSummary {
    pub columns: usize,
    pub rows: usize,
    pub fragments: usize,
    pub dictionary_codes: usize,
}

/// Per column: quoted rendering → code ordinal, plus the codes in order.
#[derive(Default)]
struct StreamDictionary {
    codes: Vec<FxHashMap<String, u32>>,
    ordered: Vec<Vec<String>>,
}

impl StreamDictionary {
    fn build(freqs: Vec<FxHashMap<String, usize>>, config: &StreamConfig) -> Self {
        let mut dict = Self::default();
        for freq in freqs {
            let mut vocab: Vec<(String, usize)> = freq
                .into_iter()
                .filter(|(quoted, _)| {
                    config.skip_if_shorter_than.map_or(true, |min| {
                        quoted.chars().count().saturating_sub(2) >= min
                    })
                })
                .filter(|(_, count)| config.min_freq.map_or(true, |min| *count >= min))
                .collect();
            vocab.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let codes = vocab
                .iter()
                .zip(1u32..)
                .map(|((quoted, _), ordinal)| (quoted.clone(), ordinal))
                .collect();
            dict.codes.push(codes);
            dict.ordered.push(vocab.into_iter().map(|(quoted, _)| quoted).collect());
        }
        dict
    }

    fn len(&self) -> usize {
        self.ordered.iter().map(Vec::len).sum()
    }

    fn code(&self, col: usize, quoted: &str) -> Option<String> {
        let ordinal = self.codes.get(col)?.get(quoted)?;
        Some(format!("@C{{{}}}t{ordinal}", column_letters(col)))
    }

    fn block(&self) -> Option<String> {
        if self.len() == 0 {
            return None;
        }
        let mut lines = vec![DICT_BEGIN.to_string()];
        for (col, values) in self.ordered.iter().enumerate() {
            if values.is_empty() {
                continue;
            }
            let letters = column_letters(col);
            lines.push(format!("[COL {letters}]"));
            for (ordinal, quoted) in (1u32..).zip(values) {
                lines.push(format!("@C{{{letters}}}t{ordinal}={quoted}"));
            }
        }
        lines.push(DICT_END.to_string());
        Some(lines.join("\n"))
    }
}

struct FragmentBuffer<'a, S: ?Sized> {
    sink: &'a mut S,
    counter: &'a dyn TokenCounter,
    max_tokens: usize,
    overlap_chars: usize,
    lines: Vec<String>,
    fresh: bool,
    next_id: usize,
}

impl<'a, S: FragmentSink + ?Sized> FragmentBuffer<'a, S> {
    fn push_line(&mut self, line: String) {
        self.lines.push(line);
        self.fresh = false;
    }

    /// Counts the fragment as it would be emitted; the buffer never holds
    /// more than one line past the budget.
    fn over_budget(&self) -> bool {
        self.counter.count(&self.lines.join("\n")) > self.max_tokens
    }

    fn emit(&mut self, content: String) -> Result<()> {
        self.sink.accept(Fragment::new(self.next_id, content))?;
        self.next_id += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let content = self.lines.join("\n");
        self.lines.clear();
        self.fresh = false;
        if self.overlap_chars > 0 {
            let seed = tail_chars(&content, self.overlap_chars).to_string();
            self.lines.push(seed);
            self.fresh = true;
        }
        self.emit(content)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.lines.is_empty() && !self.fresh {
            let content = self.lines.join("\n");
            self.lines.clear();
            self.emit(content)?;
        }
        Ok(())
    }
}

/// Encodes `source` in two passes, writing fragments to `sink`.
pub fn stream_encode<R, S>(
    source: &mut R,
    name: &str,
    config: &StreamConfig,
    counter: &dyn TokenCounter,
    sink: &mut S,
) -> Result<StreamSummary>
where
    R: RowSource + ?Sized,
    S: FragmentSink + ?Sized,
{
    let columns = source.column_names()?;
    let ncols = columns.len();

    let dictionary = if config.compress() {
        let mut freqs: Vec<FxHashMap<String, usize>> = vec![FxHashMap::default(); ncols];
        source.scan(config.batch_size, &mut |batch| {
            for row in batch {
                for (j, value) in row.iter().enumerate().take(ncols) {
                    if let CellValue::Text(s) = value {
                        *freqs[j].entry(quote_literal(s)).or_default() += 1;
                    }
                }
            }
            Ok(())
        })?;
        StreamDictionary::build(freqs, config)
    } else {
        StreamDictionary::default()
    };
    tracing::debug!(columns = ncols, codes = dictionary.len(), "streaming dictionary built");

    let mut buffer = FragmentBuffer {
        sink,
        counter,
        max_tokens: config.max_tokens_per_chunk.max(1),
        overlap_chars: config.overlap_tokens * CHARS_PER_TOKEN,
        lines: Vec::new(),
        fresh: false,
        next_id: 0,
    };
    buffer.push_line(title_line(name, "unknown", ncols));
    let fmt = config.include_format.then_some("header");
    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(j, column)| render_assignment(&cell_address(0, j), &quote_literal(column), fmt))
        .collect();
    buffer.push_line(format!("{ANCHOR_PREFIX}{}", header.join(CELL_SEPARATOR)));

    let mut rows = 0usize;
    source.scan(config.batch_size, &mut |batch| {
        for row in batch {
            rows += 1;
            let cells: Vec<String> = (0..ncols)
                .map(|j| {
                    let value = row.get(j).unwrap_or(&CellValue::Empty);
                    let rendered = value.render();
                    let shown = match value {
                        CellValue::Text(_) => dictionary.code(j, &rendered).unwrap_or(rendered),
                        _ => rendered,
                    };
                    render_assignment(&cell_address(rows, j), &shown, None)
                })
                .collect();
            buffer.push_line(cells.join(CELL_SEPARATOR));
            if buffer.over_budget() {
                buffer.flush()?;
            }
        }
        Ok(())
    })?;
    buffer.finish()?;

    let dictionary_codes = dictionary.len();
    if let Some(block) = dictionary.block() {
        buffer.emit(block)?;
    }
    let summary = StreamSummary {
        columns: ncols,
        rows,
        fragments: buffer.next_id,
        dictionary_codes,
    };
    tracing::debug!(?summary, "streaming encode finished");
    Ok(summary)
}
