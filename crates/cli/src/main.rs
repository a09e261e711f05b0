use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use gridwise_core::{
    compress_text, default_sheet_name, load_grid, stream_encode, CompressionReport, CsvRowSource,
    EncodeConfig, EncodeResult, Encoder, GridError, OutputMode, SharedCounter, StreamConfig,
    StreamSummary, TextSerializer, TextSerializerConfig, TokenizerKind,
};
use gridwise_index::{
    create_fragment_writer, load_fragments, save_fragments, Bm25Params, Fragment, InvertedIndex,
    ScoredFragment,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_CONFIG: &str = "gridwise.toml";
const STORE_SUFFIX: &str = ".gridwise.jsonl";
const INDEX_SUFFIX: &str = ".idx";

#[derive(Parser, Debug)]
#[command(name = "gridwise", version = VERSION, about = "Spreadsheet encoder and fragment retrieval")]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encode and chunk a spreadsheet in memory, writing fragments as JSONL.
    Encode {
        input: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
        #[command(flatten)]
        encode: EncodeArgs,
        /// Fragment store (default: <input>.gridwise.jsonl).
        #[arg(long = "store", alias = "out")]
        store: Option<PathBuf>,
        /// Also build the retrieval index (default path: <store>.idx).
        #[arg(long, num_args = 0..=1)]
        index: Option<Option<PathBuf>>,
        #[arg(long = "text-out")]
        text_out: Option<PathBuf>,
        #[arg(long = "json-out")]
        json_out: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        quiet: bool,
    },
    /// Encode a large CSV in two low-memory passes.
    StreamEncode {
        input: PathBuf,
        /// Name used in the title line (default: file name).
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long, value_delimiter = ',')]
        usecols: Vec<String>,
        #[command(flatten)]
        stream: StreamArgs,
        #[arg(long = "store", alias = "out")]
        store: Option<PathBuf>,
        #[arg(long, num_args = 0..=1)]
        index: Option<Option<PathBuf>>,
        #[arg(long, action = ArgAction::SetTrue)]
        quiet: bool,
    },
    /// Rank stored fragments against a question with BM25.
    Query {
        store: PathBuf,
        question: String,
        /// Index path (default: <store>.idx, rebuilt in memory when missing).
        #[arg(long)]
        index: Option<PathBuf>,
        #[arg(long = "top-k", alias = "topk", default_value_t = 5)]
        top_k: usize,
        #[arg(long, default_value_t = 1.5)]
        k1: f64,
        #[arg(long, default_value_t = 0.75)]
        b: f64,
        #[arg(long = "concat-out")]
        concat_out: Option<PathBuf>,
    },
    /// Print the vanilla encoding of a spreadsheet.
    Serialize {
        input: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
        #[arg(long = "no-format", action = ArgAction::SetTrue)]
        no_format: bool,
        #[arg(short = 'o', long = "out")]
        out: Option<PathBuf>,
    },
    /// Compare vanilla and compressed token counts.
    Stats {
        input: PathBuf,
        #[arg(long)]
        sheet: Option<String>,
        #[command(flatten)]
        encode: EncodeArgs,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct EncodeArgs {
    #[arg(long = "no-format", action = ArgAction::SetTrue)]
    no_format: bool,
    #[arg(long = "compress-min-tokens")]
    compress_min_tokens: Option<usize>,
    #[arg(long = "max-tokens")]
    max_tokens: Option<usize>,
    #[arg(long)]
    overlap: Option<usize>,
    #[arg(long = "no-anchors", action = ArgAction::SetTrue)]
    no_anchors: bool,
    #[arg(long = "no-inverted-index", action = ArgAction::SetTrue)]
    no_inverted_index: bool,
    #[arg(long = "use-aggregation", action = ArgAction::SetTrue)]
    use_aggregation: bool,
    #[arg(long = "no-aggregation", action = ArgAction::SetTrue, conflicts_with = "use_aggregation")]
    no_aggregation: bool,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long = "dict-min-freq")]
    dict_min_freq: Option<usize>,
    #[arg(long = "dict-encode-all", action = ArgAction::SetTrue)]
    dict_encode_all: bool,
    #[arg(long = "dict-skip-shorter-than")]
    dict_skip_shorter_than: Option<usize>,
    #[arg(long = "no-dict-skip", action = ArgAction::SetTrue)]
    no_dict_skip: bool,
    #[arg(long = "collapse-width")]
    collapse_width: Option<usize>,
    #[arg(long)]
    tokenizer: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
struct StreamArgs {
    #[arg(long = "batch-size", alias = "chunksize")]
    batch_size: Option<usize>,
    #[arg(long = "max-tokens")]
    max_tokens: Option<usize>,
    #[arg(long)]
    overlap: Option<usize>,
    #[arg(long = "no-dictionary", action = ArgAction::SetTrue)]
    no_dictionary: bool,
    #[arg(long = "no-format", action = ArgAction::SetTrue)]
    no_format: bool,
    #[arg(long)]
    mode: Option<String>,
    #[arg(long = "min-freq")]
    min_freq: Option<usize>,
    #[arg(long = "skip-shorter-than")]
    skip_shorter_than: Option<usize>,
    #[arg(long = "no-skip", action = ArgAction::SetTrue)]
    no_skip: bool,
    #[arg(long)]
    tokenizer: Option<String>,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let file_config = load_config(&config_path)?;
    let defaults = &file_config.defaults;

    match cli.command {
        Commands::Encode {
            input,
            sheet,
            encode,
            store,
            index,
            text_out,
            json_out,
            quiet,
        } => {
            ensure_input(&input)?;
            let config = resolve_encode_config(&encode, &defaults.encode)?;
            let counter = resolve_tokenizer(encode.tokenizer.as_deref(), defaults)?.counter();
            let grid = load_grid(&input, sheet.as_deref())?;
            let encoder = Encoder::builder().config(config).counter(counter).build();
            let result = encoder.encode(&grid)?;

            let store = store.unwrap_or_else(|| default_store_path(&input));
            save_fragments(&store, &result.fragments)?;
            if let Some(path) = text_out {
                fs::write(&path, &result.text)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            if let Some(path) = json_out {
                write_json(&path, &result)?;
            }
            if !quiet {
                print_encode_summary(&input, &store, &result);
            }
            if let Some(index) = index {
                let index_path = index.unwrap_or_else(|| default_index_path(&store));
                save_index(&index_path, &result.fragments)?;
                if !quiet {
                    println!("[gridwise] Index:      {}", index_path.display());
                }
            }
        }
        Commands::StreamEncode {
            input,
            sheet,
            usecols,
            stream,
            store,
            index,
            quiet,
        } => {
            ensure_input(&input)?;
            let config = resolve_stream_config(&stream, &defaults.stream)?;
            let counter = resolve_tokenizer(stream.tokenizer.as_deref(), defaults)?.counter();
            let name = sheet.unwrap_or_else(|| default_sheet_name(&input));
            let store = store.unwrap_or_else(|| default_store_path(&input));
            let summary = run_stream(&input, &name, usecols, &config, &counter, &store)?;
            if !quiet {
                print_stream_summary(&input, &store, &summary);
            }
            if let Some(index) = index {
                let index_path = index.unwrap_or_else(|| default_index_path(&store));
                let fragments = load_fragments(&store)?;
                save_index(&index_path, &fragments)?;
                if !quiet {
                    println!("[gridwise] Index:      {}", index_path.display());
                }
            }
        }
        Commands::Query {
            store,
            question,
            index,
            top_k,
            k1,
            b,
            concat_out,
        } => {
            ensure_input(&store)?;
            let fragments = load_fragments(&store)?;
            let index_path = index.unwrap_or_else(|| default_index_path(&store));
            let inverted = open_index(&index_path, &fragments)?;
            let hits = inverted.search(&question, &fragments, top_k, Bm25Params { k1, b });
            print_hits(&question, top_k, &hits);
            if let Some(path) = concat_out {
                write_concatenated(&path, &hits)?;
                println!("Concatenated {} fragments -> {}", hits.len(), path.display());
            }
        }
        Commands::Serialize {
            input,
            sheet,
            no_format,
            out,
        } => {
            ensure_input(&input)?;
            let grid = load_grid(&input, sheet.as_deref())?;
            let include_format = !no_format && defaults.encode.include_format;
            let serializer = TextSerializer::with_config(TextSerializerConfig { include_format });
            match out {
                Some(path) => serializer.write_textual(&grid, &path)?,
                None => println!("{}", serializer.to_string(&grid)),
            }
        }
        Commands::Stats {
            input,
            sheet,
            encode,
        } => {
            ensure_input(&input)?;
            let config = resolve_encode_config(&encode, &defaults.encode)?;
            let counter = resolve_tokenizer(encode.tokenizer.as_deref(), defaults)?.counter();
            let grid = load_grid(&input, sheet.as_deref())?;
            grid.validate()?;
            let vanilla = TextSerializer::with_config(TextSerializerConfig {
                include_format: config.include_format,
            })
            .to_string(&grid);
            let compressed = compress_text(&vanilla, &config);
            let report = CompressionReport::measure(&vanilla, &compressed.text, counter.as_ref());
            println!("input={}", input.display());
            println!("rows={}", grid.nrows);
            println!("cols={}", grid.ncols);
            println!("tokens_vanilla={}", report.original_tokens);
            println!("tokens_compressed={}", report.compressed_tokens);
            println!("ratio={:.3}", report.ratio);
            println!("savings={:.1}%", report.savings() * 100.0);
            if let Some(dictionary) = &compressed.meta.dictionary {
                println!("dictionary_codes={}", dictionary.codes);
                println!("dictionary_cells={}", dictionary.replaced_cells);
            }
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    toml::from_str(&contents).map_err(|e| anyhow!("invalid config: {e}"))
}

fn ensure_input(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(GridError::InputNotFound(path.to_path_buf()).into());
    }
    Ok(())
}

fn resolve_encode_config(cli: &EncodeArgs, defaults: &EncodeConfig) -> Result<EncodeConfig> {
    let mut config = defaults.clone();
    if cli.no_format {
        config.include_format = false;
    }
    if let Some(tokens) = cli.compress_min_tokens {
        config.compress_min_tokens = tokens;
    }
    if let Some(tokens) = cli.max_tokens {
        config.max_tokens_per_chunk = tokens;
    }
    if let Some(tokens) = cli.overlap {
        config.overlap_tokens = tokens;
    }
    if cli.no_anchors {
        config.use_anchors = false;
    }
    if cli.no_inverted_index {
        config.use_inverted_index = false;
    }
    if cli.use_aggregation {
        config.use_aggregation = true;
    }
    if cli.no_aggregation {
        config.use_aggregation = false;
    }
    if let Some(mode) = cli.mode.as_deref() {
        config.output_mode = mode.parse::<OutputMode>()?;
    }
    if let Some(min_freq) = cli.dict_min_freq {
        config.dict_min_freq = min_freq;
    }
    if cli.dict_encode_all {
        config.dict_encode_all_strings = true;
    }
    if let Some(len) = cli.dict_skip_shorter_than {
        config.dict_skip_if_shorter_than = Some(len);
    }
    if cli.no_dict_skip {
        config.dict_skip_if_shorter_than = None;
    }
    if let Some(width) = cli.collapse_width {
        config.collapse_width = width;
    }
    Ok(config)
}

fn resolve_stream_config(cli: &StreamArgs, defaults: &StreamConfig) -> Result<StreamConfig> {
    let mut config = defaults.clone();
    if let Some(batch) = cli.batch_size {
        config.batch_size = batch.max(1);
    }
    if let Some(tokens) = cli.max_tokens {
        config.max_tokens_per_chunk = tokens;
    }
    if let Some(tokens) = cli.overlap {
        config.overlap_tokens = tokens;
    }
    if cli.no_dictionary {
        config.build_dictionary = false;
    }
    if cli.no_format {
        config.include_format = false;
    }
    if let Some(mode) = cli.mode.as_deref() {
        config.output_mode = mode.parse::<OutputMode>()?;
    }
    if let Some(min_freq) = cli.min_freq {
        config.min_freq = Some(min_freq);
    }
    if let Some(len) = cli.skip_shorter_than {
        config.skip_if_shorter_than = Some(len);
    }
    if cli.no_skip {
        config.skip_if_shorter_than = None;
    }
    Ok(config)
}

fn resolve_tokenizer(cli: Option<&str>, defaults: &DefaultSections) -> Result<TokenizerKind> {
    match cli.or(defaults.tokenizer.as_deref()) {
        Some(name) => Ok(name.parse::<TokenizerKind>()?),
        None => Ok(TokenizerKind::default()),
    }
}

fn default_store_path(input: &Path) -> PathBuf {
    let mut path: OsString = input.with_extension("").into_os_string();
    path.push(STORE_SUFFIX);
    PathBuf::from(path)
}

fn default_index_path(store: &Path) -> PathBuf {
    let mut path: OsString = store.as_os_str().to_owned();
    path.push(INDEX_SUFFIX);
    PathBuf::from(path)
}

fn run_stream(
    input: &Path,
    name: &str,
    usecols: Vec<String>,
    config: &StreamConfig,
    counter: &SharedCounter,
    store: &Path,
) -> Result<StreamSummary> {
    let mut source = CsvRowSource::open(input)?;
    if !usecols.is_empty() {
        source = source.with_usecols(usecols);
    }
    let mut writer = create_fragment_writer(store)?;
    let summary = stream_encode(&mut source, name, config, counter.as_ref(), &mut writer)?;
    writer.flush()?;
    Ok(summary)
}

fn save_index(path: &Path, fragments: &[Fragment]) -> Result<()> {
    let index = InvertedIndex::build(fragments);
    index.save(path)
}

fn open_index(path: &Path, fragments: &[Fragment]) -> Result<InvertedIndex> {
    if path.exists() {
        return InvertedIndex::load(path);
    }
    tracing::warn!(
        path = %path.display(),
        "index not found, building it in memory"
    );
    Ok(InvertedIndex::build(fragments))
}

fn write_json(path: &Path, result: &EncodeResult) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, result)?;
    writer.flush()?;
    Ok(())
}

fn write_concatenated(path: &Path, hits: &[ScoredFragment]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(concatenate_hits(hits).as_bytes())?;
    writer.flush()?;
    Ok(())
}

fn concatenate_hits(hits: &[ScoredFragment]) -> String {
    hits.iter()
        .map(|hit| format!("### CHUNK {}\n{}\n\n", hit.id, hit.content))
        .collect()
}

fn print_hits(question: &str, top_k: usize, hits: &[ScoredFragment]) {
    println!("# Retrieved top-{top_k} fragments for: {question:?}\n");
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "=== Hit {} | fragment {} | score={:.3} ===",
            rank + 1,
            hit.id,
            hit.score
        );
        println!("{}", hit.content);
        println!();
    }
}

fn print_encode_summary(input: &Path, store: &Path, result: &EncodeResult) {
    println!("[gridwise] Parsed:     {}", input.display());
    println!("[gridwise] Encoding:   {}", result.kind);
    println!("[gridwise] Vanilla:    {} tokens", result.tokens_vanilla);
    if let Some(tokens) = result.tokens_compressed {
        let report = CompressionReport::from_counts(result.tokens_vanilla, tokens);
        println!(
            "[gridwise] Compressed: {} tokens (ratio {:.3})",
            tokens, report.ratio
        );
    }
    println!(
        "[gridwise] Fragments:  {} -> {}",
        result.fragments.len(),
        store.display()
    );
}

fn print_stream_summary(input: &Path, store: &Path, summary: &StreamSummary) {
    println!("[gridwise] Streamed:   {}", input.display());
    println!(
        "[gridwise] Rows:       {} x {} columns",
        summary.rows, summary.columns
    );
    println!("[gridwise] Dictionary: {} codes", summary.dictionary_codes);
    println!(
        "[gridwise] Fragments:  {} -> {}",
        summary.fragments,
        store.display()
    );
}

#[derive(Debug, Default, Deserialize)]
struct AppConfig {
    #[serde(default)]
    defaults: DefaultSections,
}

#[derive(Debug, Default, Deserialize)]
struct DefaultSections {
    #[serde(default)]
    tokenizer: Option<String>,
    #[serde(default)]
    encode: EncodeConfig,
    #[serde(default)]
    stream: StreamConfig,
}
