//! ocr-drift-monitor - Document drift detection and OCR result indexing
//!
//! Fits a reconstruction-error drift model on reference pages, scores new
//! pages against it, and bulk-indexes OCR results idempotently.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ocr_drift_monitor::config::{self, AppConfig};
use ocr_drift_monitor::drift::{score_batches, DriftModel};
use ocr_drift_monitor::imaging::{self, BatchLoad, FileImageSource};
use ocr_drift_monitor::index::{BulkIndexWriter, ElasticsearchBackend, IndexBackend, MemoryIndex};
use ocr_drift_monitor::ocr::DocumentResult;
use ocr_drift_monitor::records::RecordBuilder;
use ocr_drift_monitor::storage;

/// Document drift detection and OCR result indexing
#[derive(Parser, Debug)]
#[command(name = "ocr-drift-monitor")]
#[command(about = "Detect document drift and index OCR results")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit a drift model on a directory of reference pages
    Fit {
        /// Directory of reference page images
        #[arg(long)]
        reference: PathBuf,

        /// Where to write the model (defaults to the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Score a directory of pages against a fitted model
    Score {
        /// Model file (defaults to the data directory)
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Directory of page images to score
        #[arg(long)]
        input: PathBuf,

        /// Pages per batch (defaults to the configured batch size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Also print the score of every page
        #[arg(long)]
        per_image: bool,
    },

    /// Bulk-index a JSON file of OCR results
    Index {
        /// JSON array of document results
        #[arg(long)]
        results: PathBuf,

        /// Run identifier stored on every record (random if omitted)
        #[arg(long)]
        run_id: Option<String>,

        /// OCR model version, part of every record identifier
        #[arg(long, default_value = "0")]
        model_version: String,

        /// Write into an in-memory index instead of the configured endpoint
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration before logging so the configured filter applies
    let (config, source) = load_or_create_config(args.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match source {
        Ok(message) => info!("{}", message),
        Err(message) => warn!("{}", message),
    }

    match args.command {
        Command::Fit { reference, output } => run_fit(&config, &reference, output),
        Command::Score {
            model,
            input,
            batch_size,
            per_image,
        } => run_score(&config, model, &input, batch_size, per_image),
        Command::Index {
            results,
            run_id,
            model_version,
            dry_run,
        } => run_index(&config, &results, run_id, &model_version, dry_run),
    }
}

/// Log line describing where the configuration came from
type ConfigSource = std::result::Result<String, String>;

/// Load configuration from file or create default
///
/// An explicit path must load; the default location is optional. The second
/// value describes where the configuration came from, as a warning (`Err`)
/// when an existing default file had to be ignored.
fn load_or_create_config(path: Option<&Path>) -> Result<(AppConfig, ConfigSource)> {
    if let Some(path) = path {
        let config = config::load_config(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?;
        return Ok((config, Ok(format!("Loaded configuration from {:?}", path))));
    }

    if let Ok(config_path) = storage::default_config_path() {
        if config_path.exists() {
            return Ok(load_default_config(&config_path));
        }
    }
    Ok((AppConfig::default(), Ok("Using default configuration".to_string())))
}

/// Load an existing default config file, falling back to defaults with a warning
fn load_default_config(config_path: &Path) -> (AppConfig, ConfigSource) {
    match config::load_config(config_path) {
        Ok(config) => (config, Ok(format!("Loaded configuration from {:?}", config_path))),
        Err(e) => (
            AppConfig::default(),
            Err(format!(
                "Ignoring invalid configuration {:?} ({:#}), using defaults",
                config_path, e
            )),
        ),
    }
}

/// Load every image below `dir`, one document per file
fn load_directory(dir: &Path) -> Result<BatchLoad> {
    let files = imaging::find_images(dir)
        .with_context(|| format!("Failed to read image directory {:?}", dir))?;
    if files.is_empty() {
        anyhow::bail!("No images found in {:?}", dir);
    }

    let documents: Vec<String> = files.iter().map(|f| f.to_string_lossy().into_owned()).collect();
    let batch = imaging::load_batch(&FileImageSource, &documents);
    for failure in &batch.failures {
        warn!("Skipping {}: {}", failure.document, failure.reason);
    }
    Ok(batch)
}

fn resolve_model_path(path: Option<PathBuf>) -> Result<PathBuf> {
    match path {
        Some(path) => Ok(path),
        None => storage::default_model_path(),
    }
}

fn run_fit(config: &AppConfig, reference: &Path, output: Option<PathBuf>) -> Result<()> {
    let batch = load_directory(reference)?;
    let model = DriftModel::fit(batch.images(), &config.drift).context("Failed to fit drift model")?;

    let output = resolve_model_path(output)?;
    model
        .save(&output)
        .with_context(|| format!("Failed to save model to {:?}", output))?;

    println!(
        "Fitted on {} pages: {} components explain {:.4} of variance",
        model.reference_samples(),
        model.n_components(),
        model.retained_variance()
    );
    println!("Model written to {}", output.display());
    Ok(())
}

fn run_score(
    config: &AppConfig,
    model: Option<PathBuf>,
    input: &Path,
    batch_size: Option<usize>,
    per_image: bool,
) -> Result<()> {
    let model_path = resolve_model_path(model)?;
    let model = DriftModel::load(&model_path)
        .with_context(|| format!("Failed to load model from {:?}", model_path))?;

    let batch = load_directory(input)?;
    if batch.pages.is_empty() {
        anyhow::bail!("None of the images in {:?} could be loaded", input);
    }

    let batch_size = batch_size.unwrap_or(config.drift.batch_size).max(1);
    let images: Vec<_> = batch.images().cloned().collect();
    let scores = score_batches(&model, &images, batch_size)?;

    for (i, score) in scores.iter().enumerate() {
        println!("batch {:>4}: {:.6}", i, score);
    }
    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    println!("{} pages in {} batches, mean score {:.6}", images.len(), scores.len(), mean);

    if per_image {
        let items = model.score_items(&images)?;
        for (page, score) in batch.pages.iter().zip(items) {
            println!("{:.6}  {}", score, page.document);
        }
    }
    Ok(())
}

fn run_index(
    config: &AppConfig,
    results: &Path,
    run_id: Option<String>,
    model_version: &str,
    dry_run: bool,
) -> Result<()> {
    let content = std::fs::read_to_string(results)
        .with_context(|| format!("Failed to read OCR results from {:?}", results))?;
    let results: Vec<DocumentResult> =
        serde_json::from_str(&content).context("Failed to parse OCR results")?;

    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!("Indexing {} results as run {}", results.len(), run_id);
    let builder = RecordBuilder::new(run_id, model_version, config.index.name.as_str());

    if dry_run {
        index_with(MemoryIndex::new(), config, &builder, &results)
    } else {
        let backend = ElasticsearchBackend::new(&config.index)?;
        index_with(backend, config, &builder, &results)
    }
}

fn index_with<B: IndexBackend>(
    backend: B,
    config: &AppConfig,
    builder: &RecordBuilder,
    results: &[DocumentResult],
) -> Result<()> {
    let writer = BulkIndexWriter::new(backend, config.index.write_options());
    let summary = writer.write_summary(builder.records(results));

    println!(
        "Indexed {} of {} records into {} ({} chunks)",
        summary.succeeded, summary.attempted, config.index.name, summary.chunks
    );

    if !summary.is_complete() {
        for error in &summary.errors {
            eprintln!("  {}", error);
        }
        anyhow::bail!("{} records failed to index", summary.errors.len());
    }
    Ok(())
}
