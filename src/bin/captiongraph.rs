//! captiongraph CLI
//!
//! Builds and queries the caption knowledge graph.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use captiongraph::config::{LogFormat, LoggingConfig, StorageBackend};
use captiongraph::dataset::{read_image_index, write_image_index};
use captiongraph::{
    images_for_entity, open_graph, resolve_image_paths, BatchRunner, CaptionProcessor,
    CheckpointStore, CoreNlpExtractor, Dataset, FailurePolicy, FileCheckpointStore, GraphMerger,
    GraphStore, InMemoryGraphStore, PersistentGraphStore, PipelineConfig, TripleClassifier,
};

const DEFAULT_CONFIG_FILE: &str = "captiongraph.toml";

#[derive(Parser)]
#[command(name = "captiongraph")]
#[command(about = "Build a knowledge graph from image captions", long_about = None)]
struct Cli {
    /// Config file (default: ./captiongraph.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Graph data directory
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the dataset, resuming from the checkpoint
    Ingest(IngestArgs),

    /// List the images that mention an entity
    Search {
        /// Entity name (canonicalized like ingested text)
        entity: String,

        /// Image index written by `index-images` (default: read the dataset)
        #[arg(long)]
        index: Option<PathBuf>,

        /// Print image ids instead of file paths
        #[arg(long)]
        ids: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write the image id to filename index
    IndexImages {
        /// Dataset file
        #[arg(long)]
        dataset: Option<PathBuf>,

        /// Output file
        #[arg(short, long, default_value = "imgid_to_filepath.json")]
        output: PathBuf,
    },

    /// Rewrite the graph log as a compact snapshot
    Compact,

    /// Show graph and checkpoint statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct IngestArgs {
    /// Dataset file
    #[arg(long)]
    dataset: Option<PathBuf>,

    /// Checkpoint file
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// CoreNLP server URL
    #[arg(long)]
    endpoint: Option<String>,

    /// Keep the graph in memory only
    #[arg(long)]
    memory: bool,

    /// Skip failed images instead of stopping
    #[arg(long)]
    continue_on_error: bool,

    /// Compact the log after ingesting if it has grown past the limit
    #[arg(long)]
    compact: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref())?;

    if let Some(level) = &cli.log_level {
        config.logging.level.clone_from(level);
    }
    if cli.log_json {
        config.logging.format = LogFormat::Json;
    }
    if let Some(dir) = &cli.data_dir {
        config.storage.data_dir.clone_from(dir);
    }
    if let Commands::Ingest(args) = &cli.command {
        apply_ingest_overrides(&mut config, args);
    }
    config.validate().context("invalid configuration")?;

    init_tracing(&config.logging);

    match cli.command {
        Commands::Ingest(args) => ingest(&config, args.compact),
        Commands::Search {
            entity,
            index,
            ids,
            json,
        } => search(&config, &entity, index.as_deref(), ids, json),
        Commands::IndexImages { dataset, output } => {
            let path = dataset.unwrap_or_else(|| config.dataset.path.clone());
            index_images(&path, &output)
        }
        Commands::Compact => compact(&config),
        Commands::Stats { json } => stats(&config, json),
    }
}

fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = explicit {
        return PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()));
    }
    let default = Path::new(DEFAULT_CONFIG_FILE);
    if default.exists() {
        return PipelineConfig::from_file(default)
            .with_context(|| format!("failed to load config {}", default.display()));
    }
    PipelineConfig::from_env().context("failed to build config from environment")
}

fn apply_ingest_overrides(config: &mut PipelineConfig, args: &IngestArgs) {
    if let Some(path) = &args.dataset {
        config.dataset.path.clone_from(path);
    }
    if let Some(path) = &args.checkpoint {
        config.checkpoint.path.clone_from(path);
    }
    if let Some(endpoint) = &args.endpoint {
        config.extractor.endpoint.clone_from(endpoint);
    }
    if args.memory {
        config.storage.backend = StorageBackend::Memory;
    }
    if args.continue_on_error {
        config.batch.failure_policy = FailurePolicy::Continue;
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("captiongraph={}", logging.level.to_lowercase()).into());
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

fn open_persistent(config: &PipelineConfig) -> Result<PersistentGraphStore> {
    let dir = &config.storage.data_dir;
    open_graph(dir, Some(config.persistent_config()))
        .with_context(|| format!("failed to open graph at {}", dir.display()))
}

fn ingest(config: &PipelineConfig, compact_after: bool) -> Result<()> {
    let dataset = Dataset::load(&config.dataset.path).context("failed to load dataset")?;

    let persistent = match config.storage.backend {
        StorageBackend::Persistent => Some(Arc::new(open_persistent(config)?)),
        StorageBackend::Memory => None,
    };
    let store: Arc<dyn GraphStore> = match &persistent {
        Some(store) => Arc::clone(store) as Arc<dyn GraphStore>,
        None => {
            tracing::warn!("in-memory backend selected; the graph is discarded on exit");
            Arc::new(InMemoryGraphStore::new())
        }
    };

    let extractor = CoreNlpExtractor::new(config.corenlp_config())
        .context("failed to create extractor client")?;
    tracing::info!(endpoint = extractor.endpoint(), "using CoreNLP extractor");

    let processor = CaptionProcessor::with_tables(
        Arc::new(extractor),
        GraphMerger::new(store.clone()),
        config.canonicalizer(),
        TripleClassifier::default(),
    );
    let checkpoints = Arc::new(FileCheckpointStore::new(&config.checkpoint.path));
    let runner = BatchRunner::new(processor, checkpoints).with_policy(config.batch.failure_policy);

    let report = runner.run(&dataset).context("ingest stopped")?;

    println!(
        "processed {} images ({} captions), skipped {}, failed {}",
        report.processed,
        report.captions,
        report.skipped,
        report.failed.len()
    );
    println!(
        "merged {} relationships and {} attributes; checkpoint at {}",
        report.triples.relationships, report.triples.attributes, report.checkpoint
    );
    println!(
        "graph: {} entities, {} relationships",
        store.entity_count()?,
        store.relationship_count()?
    );

    if let Some(store) = &persistent {
        if compact_after && store.needs_compaction()? {
            let result = store.compact().context("compaction failed")?;
            println!(
                "compacted log: {} -> {} bytes",
                result.wal_size_before, result.wal_size_after
            );
        }
    }

    if !report.is_clean() {
        for (image_id, error) in &report.failed {
            eprintln!("image {image_id}: {error}");
        }
        bail!(
            "{} images failed; rerun to retry from image after {}",
            report.failed.len(),
            report.checkpoint
        );
    }
    Ok(())
}

fn search(
    config: &PipelineConfig,
    entity: &str,
    index: Option<&Path>,
    ids_only: bool,
    json: bool,
) -> Result<()> {
    if config.storage.backend == StorageBackend::Memory {
        bail!("search needs the persistent backend");
    }
    let store = open_persistent(config)?;
    let ids = images_for_entity(&store, &config.canonicalizer(), entity)
        .with_context(|| format!("failed to search for '{entity}'"))?;

    if ids_only {
        if json {
            println!("{}", serde_json::to_string_pretty(&ids)?);
        } else {
            for id in &ids {
                println!("{id}");
            }
        }
        return Ok(());
    }

    let index = match index {
        Some(path) => read_image_index(path)
            .with_context(|| format!("failed to read image index {}", path.display()))?,
        None => Dataset::load(&config.dataset.path)
            .context("failed to load dataset for image filenames")?
            .image_index(),
    };
    let paths = resolve_image_paths(&ids, &index, &config.dataset.image_root);

    if json {
        println!("{}", serde_json::to_string_pretty(&paths)?);
    } else if paths.is_empty() {
        println!("no images found for '{entity}'");
    } else {
        for path in &paths {
            println!("{}", path.display());
        }
    }
    Ok(())
}

fn index_images(dataset: &Path, output: &Path) -> Result<()> {
    let index = Dataset::load(dataset)
        .with_context(|| format!("failed to load dataset {}", dataset.display()))?
        .image_index();
    write_image_index(&index, output)
        .with_context(|| format!("failed to write index {}", output.display()))?;
    tracing::info!(images = index.len(), output = %output.display(), "image index written");
    println!("wrote {} entries to {}", index.len(), output.display());
    Ok(())
}

fn compact(config: &PipelineConfig) -> Result<()> {
    let store = open_persistent(config)?;
    let result = store.compact().context("compaction failed")?;
    println!(
        "compacted {}: {} entries, {} -> {} bytes",
        store.dir().display(),
        result.entries_written,
        result.wal_size_before,
        result.wal_size_after
    );
    Ok(())
}

fn stats(config: &PipelineConfig, json: bool) -> Result<()> {
    let store = open_persistent(config)?;
    let checkpoint = FileCheckpointStore::new(&config.checkpoint.path)
        .load()
        .context("failed to read checkpoint")?;

    let entities = store.entity_count()?;
    let relationships = store.relationship_count()?;
    let wal_bytes = store.wal_size()?;

    if json {
        let value = serde_json::json!({
            "data_dir": store.dir(),
            "entities": entities,
            "relationships": relationships,
            "wal_bytes": wal_bytes,
            "needs_compaction": store.needs_compaction()?,
            "last_processed": checkpoint.last_processed_image_id,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("Graph Statistics");
        println!("================");
        println!("Data dir:       {}", store.dir().display());
        println!("Entities:       {entities}");
        println!("Relationships:  {relationships}");
        println!("WAL size:       {wal_bytes} bytes");
        println!("Last processed: {}", checkpoint.last_processed_image_id);
    }
    Ok(())
}
