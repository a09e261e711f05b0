mod aggregate;
mod anchors;
mod chunk;
mod dictionary;
mod encoder;
mod error;
mod expand;
mod loader;
mod metrics;
mod model;
mod rebuild;
pub mod scan;
mod serializer;
mod stats;
mod stream;

pub use aggregate::{
    apply_aggregation, format_sig4, parse_numeric, AggregateConfig, AggregateMeta, AggregatePass,
    ColumnStats,
};
pub use anchors::{apply_anchors, is_anchor_line, AnchorMeta, AnchorPass};
pub use chunk::{tail_chars, ChunkConfig, Chunker, CHARS_PER_TOKEN};
pub use dictionary::{
    compress as compress_dictionary, DictionaryConfig, DictionaryMeta, DictionaryPass,
    ReverseDictionary,
};
pub use encoder::{
    compress_text, CompressedText, EncodeConfig, EncodeResult, Encoder, EncoderBuilder,
    EncodingKind, OutputMode, StageMeta,
};
pub use error::{GridError, Result};
pub use expand::{expand_codes, expand_fragments, parse_dict_block, CodeTable};
pub use loader::{default_sheet_name, load_delimited, load_grid, InputFormat};
pub use metrics::{compression_ratio, CompressionReport};
pub use model::{
    cell_address, column_letters, quote_literal, Cell, CellValue, DType, FrozenPanes, Grid,
    MergedRegion,
};
pub use rebuild::rebuild_dictionary_block;
pub use scan::DictCode;
pub use serializer::{TextSerializer, TextSerializerConfig};
pub use stats::{
    estimate_tokens, BpeCounter, EstimateCounter, SharedCounter, TokenCounter, TokenizerKind,
};
pub use stream::{
    stream_encode, CsvRowSource, FragmentSink, RowSource, StreamConfig, StreamSummary,
};

pub use gridwise_index::Fragment;
