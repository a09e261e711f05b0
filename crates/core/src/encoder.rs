use std::fmt;
use std::str::FromStr;

use gridwise_index::Fragment;
use serde::{Deserialize, Serialize, Serializer};

use crate::aggregate::{apply_aggregation, AggregateConfig, AggregateMeta};
use crate::anchors::{apply_anchors, AnchorMeta};
use crate::chunk::{ChunkConfig, Chunker};
use crate::dictionary::{self, DictionaryConfig, DictionaryMeta, ReverseDictionary};
use crate::error::{GridError, Result};
use crate::expand::{expand_codes, parse_dict_block};
use crate::model::Grid;
use crate::rebuild::rebuild_dictionary_block;
use crate::serializer::{TextSerializer, TextSerializerConfig};
use crate::stats::{SharedCounter, TokenizerKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Compressed,
    Expanded,
    Auto,
}

impl FromStr for OutputMode {
    type Err = GridError;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "compressed" => Ok(Self::Compressed),
            "expanded" => Ok(Self::Expanded),
            "auto" => Ok(Self::Auto),
            other => Err(GridError::Other(format!("unknown output mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodeConfig {
    pub include_format: bool,
    pub compress_min_tokens: usize,
    pub max_tokens_per_chunk: usize,
    pub overlap_tokens: usize,
    pub use_anchors: bool,
    pub use_inverted_index: bool,
    pub use_aggregation: bool,
    pub output_mode: OutputMode,
    pub dict_min_freq: usize,
    pub dict_encode_all_strings: bool,
    pub dict_skip_if_shorter_than: Option<usize>,
    pub collapse_width: usize,
    pub aggregation: AggregateConfig,
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            include_format: true,
            compress_min_tokens: 5_000,
            max_tokens_per_chunk: 4_000,
            overlap_tokens: 200,
            use_anchors: true,
            use_inverted_index: true,
            use_aggregation: true,
            output_mode: OutputMode::Compressed,
            dict_min_freq: 3,
            dict_encode_all_strings: false,
            dict_skip_if_shorter_than: Some(3),
            collapse_width: 0,
            aggregation: AggregateConfig::default(),
        }
    }
}

impl EncodeConfig {
    pub fn dictionary(&self) -> DictionaryConfig {
        DictionaryConfig {
            min_freq: self.dict_min_freq,
            encode_all_strings: self.dict_encode_all_strings,
            skip_if_shorter_than: self.dict_skip_if_shorter_than,
        }
    }

    pub fn chunking(&self) -> ChunkConfig {
        ChunkConfig {
            max_tokens: self.max_tokens_per_chunk,
            overlap_tokens: self.overlap_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchors: Option<AnchorMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dictionary: Option<DictionaryMeta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregateMeta>,
}

/// Which form of the text was chosen: `vanilla` or `compressed`, with a
/// `+expanded` suffix when codes were expanded back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingKind {
    pub compressed: bool,
    pub expanded: bool,
}

impl fmt::Display for EncodingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.compressed { "compressed" } else { "vanilla" })?;
        if self.expanded {
            f.write_str("+expanded")?;
        }
        Ok(())
    }
}

impl Serialize for EncodingKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EncodeResult {
    pub text: String,
    pub kind: EncodingKind,
    pub tokens_vanilla: usize,
    pub tokens_compressed: Option<usize>,
    pub fragments: Vec<Fragment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<StageMeta>,
}

#[derive(Debug, Clone)]
pub struct CompressedText {
    pub text: String,
    pub meta: StageMeta,
}

/// Anchors, dictionary codes and aggregation (each optional) followed by an
/// unconditional dictionary block rebuild.
pub fn compress_text(text: &str, config: &EncodeConfig) -> CompressedText {
    let mut content = text.to_string();
    let mut meta = StageMeta::default();

    if config.use_anchors {
        let pass = apply_anchors(&content, config.collapse_width);
        content = pass.text;
        meta.anchors = Some(pass.meta);
    }

    let mut reverse = ReverseDictionary::new();
    if config.use_inverted_index {
        let pass = dictionary::compress(&content, &config.dictionary());
        content = pass.text;
        reverse = pass.reverse;
        meta.dictionary = Some(pass.meta);
    }

    if config.use_aggregation {
        let pass = apply_aggregation(&content, &config.aggregation);
        content = pass.text;
        meta.aggregation = Some(pass.meta);
    }

    CompressedText {
        text: rebuild_dictionary_block(&content, &reverse),
        meta,
    }
}

#[derive(Clone)]
pub struct EncoderBuilder {
    config: EncodeConfig,
    counter: Option<SharedCounter>,
}

impl EncoderBuilder {
    pub fn new() -> Self {
        Self {
            config: EncodeConfig::default(),
            counter: None,
        }
    }

    pub fn config(mut self, config: EncodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn include_format(mut self, include: bool) -> Self {
        self.config.include_format = include;
        self
    }

    pub fn compress_min_tokens(mut self, tokens: usize) -> Self {
        self.config.compress_min_tokens = tokens;
        self
    }

    pub fn max_tokens_per_chunk(mut self, tokens: usize) -> Self {
        self.config.max_tokens_per_chunk = tokens;
        self
    }

    pub fn overlap_tokens(mut self, tokens: usize) -> Self {
        self.config.overlap_tokens = tokens;
        self
    }

    pub fn use_anchors(mut self, enable: bool) -> Self {
        self.config.use_anchors = enable;
        self
    }

    pub fn use_inverted_index(mut self, enable: bool) -> Self {
        self.config.use_inverted_index = enable;
        self
    }

    pub fn use_aggregation(mut self, enable: bool) -> Self {
        self.config.use_aggregation = enable;
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.config.output_mode = mode;
        self
    }

    pub fn dictionary(mut self, dict: DictionaryConfig) -> Self {
        self.config.dict_min_freq = dict.min_freq;
        self.config.dict_encode_all_strings = dict.encode_all_strings;
        self.config.dict_skip_if_shorter_than = dict.skip_if_shorter_than;
        self
    }

    pub fn collapse_width(mut self, width: usize) -> Self {
        self.config.collapse_width = width;
        self
    }

    pub fn aggregation(mut self, aggregation: AggregateConfig) -> Self {
        self.config.aggregation = aggregation;
        self
    }

    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.counter = Some(kind.counter());
        self
    }

    pub fn counter(mut self, counter: SharedCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn build(self) -> Encoder {
        Encoder {
            config: self.config,
            counter: self
                .counter
                .unwrap_or_else(|| TokenizerKind::default().counter()),
        }
    }
}

impl Default for EncoderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct Encoder {
    config: EncodeConfig,
    counter: SharedCounter,
}

impl Encoder {
    pub fn builder() -> EncoderBuilder {
        EncoderBuilder::new()
    }

    pub fn new(config: EncodeConfig) -> Self {
        EncoderBuilder::new().config(config).build()
    }

    pub fn config(&self) -> &EncodeConfig {
        &self.config
    }

    pub fn counter(&self) -> &SharedCounter {
        &self.counter
    }

    pub fn encode(&self, grid: &Grid) -> Result<EncodeResult> {
        grid.validate()?;
        let serializer = TextSerializer::with_config(TextSerializerConfig {
            include_format: self.config.include_format,
        });
        Ok(self.encode_text(&serializer.to_string(grid)))
    }

    /// Runs the pipeline on an already serialized vanilla text.
    pub fn encode_text(&self, vanilla: &str) -> EncodeResult {
        let counter = self.counter.as_ref();
        let tokens_vanilla = counter.count(vanilla);

        let mut text = vanilla.to_string();
        let mut kind = EncodingKind::default();
        let mut tokens_compressed = None;
        let mut meta = None;

        if tokens_vanilla >= self.config.compress_min_tokens {
            let compressed = compress_text(vanilla, &self.config);
            let tokens = counter.count(&compressed.text);
            tokens_compressed = Some(tokens);
            if tokens < tokens_vanilla {
                text = compressed.text;
                kind.compressed = true;
                meta = Some(compressed.meta);
            }
            tracing::info!(
                tokens_vanilla,
                tokens_compressed = tokens,
                chosen = %kind,
                "compression pass"
            );
        } else {
            tracing::debug!(
                tokens_vanilla,
                threshold = self.config.compress_min_tokens,
                "below compression threshold"
            );
        }

        let table = parse_dict_block(&text);
        if !table.is_empty() {
            match self.config.output_mode {
                OutputMode::Compressed => {}
                OutputMode::Expanded => {
                    text = expand_codes(&text, &table);
                    kind.expanded = true;
                }
                OutputMode::Auto => {
                    let expanded = expand_codes(&text, &table);
                    if counter.count(&expanded) < counter.count(&text) {
                        text = expanded;
                        kind.expanded = true;
                    }
                }
            }
            if kind.expanded {
                tracing::info!(mode = ?self.config.output_mode, "expanded dictionary codes");
            }
        }

        let fragments = Chunker::new(self.config.chunking()).chunk(&text, counter);
        EncodeResult {
            text,
            kind,
            tokens_vanilla,
            tokens_compressed,
            fragments,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::model::CellValue;
    use crate::stats::EstimateCounter;

    fn sales_grid(rows: usize) -> Grid {
        let data: Vec<Vec<CellValue>> = (0..rows)
            .map(|i| {
                vec![
                    CellValue::Text("Northeast region".into()),
                    CellValue::Text("Widget deluxe".into()),
                    CellValue::Int(10 + (i % 7) as i64),
                ]
            })
            .collect();
        Grid::from_rows("Sales", &["Region", "Product", "Units"], data)
    }

    fn encoder(config: EncodeConfig) -> Encoder {
        Encoder::builder()
            .config(config)
            .counter(Arc::new(EstimateCounter))
            .build()
    }

    #[test]
    fn small_grid_stays_vanilla() {
        let result = encoder(EncodeConfig::default())
            .encode(&sales_grid(3))
            .unwrap();
        assert_eq!(result.kind.to_string(), "vanilla");
        assert_eq!(result.tokens_compressed, None);
        assert!(result.meta.is_none());
        assert_eq!(result.fragments.len(), 1);
        assert_eq!(result.fragments[0].content, result.text);
    }

    #[test]
    fn repeated_strings_compress() {
        let config = EncodeConfig {
            compress_min_tokens: 0,
            ..EncodeConfig::default()
        };
        let result = encoder(config).encode(&sales_grid(40)).unwrap();
        assert_eq!(result.kind.to_string(), "compressed");
        assert!(result.tokens_compressed.unwrap() < result.tokens_vanilla);
        assert!(result.text.contains("@C{A}t1='Northeast region'"));
        assert!(result.text.contains("[AGG span=40"));
        let meta = result.meta.unwrap();
        assert!(meta.anchors.is_some());
        assert_eq!(meta.dictionary.unwrap().codes, 2);
    }

    #[test]
    fn expanded_mode_removes_codes_from_body() {
        let config = EncodeConfig {
            compress_min_tokens: 0,
            output_mode: OutputMode::Expanded,
            ..EncodeConfig::default()
        };
        let result = encoder(config).encode(&sales_grid(40)).unwrap();
        assert_eq!(result.kind.to_string(), "compressed+expanded");
        let (body, block) = crate::scan::split_trailing_dict_block(&result.text);
        assert!(block.is_some());
        assert!(!body.contains("@C{"));
        assert!(body.contains("'Widget deluxe'"));
    }

    #[test]
    fn auto_mode_keeps_shorter_form() {
        let config = EncodeConfig {
            compress_min_tokens: 0,
            output_mode: OutputMode::Auto,
            ..EncodeConfig::default()
        };
        let result = encoder(config).encode(&sales_grid(40)).unwrap();
        assert_eq!(result.kind.to_string(), "compressed");
    }

    #[test]
    fn disabled_stages_still_rebuild() {
        let config = EncodeConfig {
            use_anchors: false,
            use_inverted_index: false,
            use_aggregation: false,
            ..EncodeConfig::default()
        };
        let out = compress_text("A1='x'\n[DICT-BEGIN]\n[COL A]\n@C{A}t1='x'\n[DICT-END]", &config);
        assert_eq!(out.text, "A1='x'");
        assert_eq!(out.meta, StageMeta::default());
    }

    #[test]
    fn output_mode_parses() {
        assert_eq!("AUTO".parse::<OutputMode>().unwrap(), OutputMode::Auto);
        assert!("zip".parse::<OutputMode>().is_err());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: EncodeConfig =
            serde_json::from_str(r#"{"output_mode":"expanded","dict_min_freq":1}"#).unwrap();
        assert_eq!(config.output_mode, OutputMode::Expanded);
        assert_eq!(config.dict_min_freq, 1);
        assert_eq!(config.max_tokens_per_chunk, 4_000);
        assert_eq!(config.aggregation.sample_every, 50);
    }
}
