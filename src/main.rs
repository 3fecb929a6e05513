//! MatStudio operator CLI
//!
//! Entry point for the construction-material classifier lifecycle: training
//! from the MongoDB image store, single-image prediction, registry sync, and
//! image ingest.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;

use matstudio::artifacts::{list_local_models, load_metadata, ArtifactWriter};
use matstudio::backend::{backend_name, default_device, RuntimeOptions, TrainingBackend};
use matstudio::inference::predictor::{MaterialPredictor, PredictionReport};
use matstudio::store::{ingest_directory, ImageStore, ModelRegistry, StoreConfig};
use matstudio::training::events::EventStream;
use matstudio::training::{TrainingConfig, TrainingPipeline};
use matstudio::utils::logging::{init_logging, LogConfig};

/// MatStudio construction material classification
#[derive(Parser, Debug)]
#[command(name = "matstudio")]
#[command(version = matstudio::VERSION)]
#[command(about = "Construction material classifier lifecycle tooling", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a model from the image store, reporting progress as JSON lines
    /// on standard output
    Train {
        /// MongoDB connection URI
        #[arg(long)]
        mongo_uri: String,

        /// Identifier the model artifacts are written under
        #[arg(long)]
        model_id: String,

        /// Base epochs for the first training phase
        #[arg(short, long, default_value = "25")]
        epochs: usize,

        /// Batch size
        #[arg(short, long, default_value = "16")]
        batch_size: usize,

        /// Base learning rate
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Fraction of each class held out for validation
        #[arg(long, default_value = "0.2")]
        validation_split: f64,

        /// Record segmentation support in metadata (classification only)
        #[arg(long, default_value = "false")]
        enable_segmentation: bool,

        /// Root directory for model artifacts
        #[arg(long, default_value = "data/models")]
        models_dir: PathBuf,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Classify a single image with a trained model
    Predict {
        /// Path to the image file
        #[arg(short, long)]
        image: PathBuf,

        /// Path to the model record (model.mpk)
        #[arg(short, long)]
        model: PathBuf,

        /// Path to the labels JSON file
        #[arg(short, long)]
        labels: PathBuf,
    },

    /// Publish trained models to the registry, or list them
    Sync {
        /// MongoDB connection URI (not needed for list-local)
        #[arg(long)]
        mongo_uri: Option<String>,

        /// What to do
        #[arg(long, value_enum, default_value = "list-local")]
        action: SyncAction,

        /// Model to sync (required for the sync action)
        #[arg(long)]
        model_id: Option<String>,

        /// Do not activate the synced model
        #[arg(long, default_value = "false")]
        no_activate: bool,

        /// Root directory for model artifacts
        #[arg(long, default_value = "data/models")]
        models_dir: PathBuf,
    },

    /// Add training images from a local directory to the store
    Ingest {
        /// MongoDB connection URI
        #[arg(long)]
        mongo_uri: String,

        /// Material label for every image in the directory
        #[arg(long)]
        material: String,

        /// Directory to scan for images
        #[arg(long)]
        directory: PathBuf,
    },

    /// Show image counts per material in the store
    Stats {
        /// MongoDB connection URI
        #[arg(long)]
        mongo_uri: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SyncAction {
    /// Publish a model to the registry
    Sync,
    /// List locally trained models
    ListLocal,
    /// List models in the registry
    ListRegistry,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Training owns stdout for the event stream; everything else logs
    // normally.
    let log_config = match (&cli.command, cli.verbose) {
        (Commands::Train { .. }, _) => LogConfig::worker(),
        (_, true) => LogConfig::verbose(),
        (_, false) => LogConfig::default(),
    };
    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            mongo_uri,
            model_id,
            epochs,
            batch_size,
            learning_rate,
            validation_split,
            enable_segmentation,
            models_dir,
            seed,
        } => {
            let mut config = TrainingConfig::new(model_id);
            config.epochs = epochs;
            config.batch_size = batch_size;
            config.learning_rate = learning_rate;
            config.validation_split = validation_split;
            config.enable_segmentation = enable_segmentation;
            config.models_dir = models_dir;
            config.seed = seed;

            if let Err(e) = cmd_train(&mongo_uri, config) {
                tracing::error!("{:#}", e);
                std::process::exit(1);
            }
        }

        Commands::Predict {
            image,
            model,
            labels,
        } => {
            cmd_predict(&image, &model, &labels)?;
        }

        Commands::Sync {
            mongo_uri,
            action,
            model_id,
            no_activate,
            models_dir,
        } => {
            cmd_sync(mongo_uri.as_deref(), action, model_id.as_deref(), !no_activate, &models_dir)?;
        }

        Commands::Ingest {
            mongo_uri,
            material,
            directory,
        } => {
            cmd_ingest(&mongo_uri, &material, &directory)?;
        }

        Commands::Stats { mongo_uri } => {
            cmd_stats(&mongo_uri)?;
        }
    }

    Ok(())
}

fn cmd_train(mongo_uri: &str, config: TrainingConfig) -> Result<()> {
    let stream = EventStream::stdout();
    info!(
        "training {} on {} backend",
        config.model_id,
        backend_name()
    );

    let records = match fetch_records(mongo_uri) {
        Ok(records) => records,
        Err(e) => {
            stream.error(format!("Training failed: {}", e));
            return Err(e);
        }
    };

    let runtime = RuntimeOptions { seed: config.seed };
    let pipeline = TrainingPipeline::<TrainingBackend>::new(config, default_device(), stream);
    let outcome = pipeline.run(records, &runtime)?;

    info!(
        "trained {} ({} phases, artifacts in {})",
        outcome.metadata.model_id,
        outcome.phase_results.len(),
        outcome.artifact_dir.display()
    );
    Ok(())
}

fn fetch_records(mongo_uri: &str) -> Result<Vec<matstudio::store::ImageRecord>> {
    let store = ImageStore::connect(&StoreConfig::new(mongo_uri))
        .context("cannot connect to image store")?;
    let records = store.fetch_all().context("cannot fetch image records")?;
    Ok(records)
}

fn cmd_predict(image: &PathBuf, model: &PathBuf, labels: &PathBuf) -> Result<()> {
    use matstudio::backend::DefaultBackend;

    let device = default_device();
    let report = match MaterialPredictor::<DefaultBackend>::load(model, labels, &device) {
        Ok(predictor) => match predictor.predict_file(image) {
            Ok(predictions) => PredictionReport::success(predictions, model),
            Err(e) => PredictionReport::failure(e.to_string()),
        },
        Err(e) => PredictionReport::failure(e.to_string()),
    };

    println!("{}", serde_json::to_string(&report)?);
    Ok(())
}

fn cmd_sync(
    mongo_uri: Option<&str>,
    action: SyncAction,
    model_id: Option<&str>,
    activate: bool,
    models_dir: &std::path::Path,
) -> Result<()> {
    match action {
        SyncAction::ListLocal => {
            let models = list_local_models(models_dir)?;
            if models.is_empty() {
                println!("{}", "No trained models found".yellow());
                return Ok(());
            }
            println!("{}", "Local models:".cyan().bold());
            for model in models {
                println!("  {}", model.model_id.bold());
                println!("    Accuracy: {:.4}", model.metadata.final_val_accuracy);
                println!("    Classes:  {}", model.metadata.num_classes);
                println!("    Samples:  {}", model.metadata.original_samples);
            }
        }

        SyncAction::ListRegistry => {
            let uri = mongo_uri.context("--mongo-uri is required for list-registry")?;
            let registry = ModelRegistry::connect(&StoreConfig::new(uri))?;
            let entries = registry.list()?;
            if entries.is_empty() {
                println!("{}", "No models in registry".yellow());
                return Ok(());
            }
            println!("{}", "Registry models:".cyan().bold());
            for entry in entries {
                let marker = if entry.is_active {
                    " [ACTIVE]".green().to_string()
                } else {
                    String::new()
                };
                println!("  {} {}{}", entry.name.bold(), entry.version, marker);
                println!("    Accuracy: {:.4}", entry.accuracy);
                println!("    Status:   {}", entry.status);
                if let Some(id) = entry.model_id {
                    println!("    Model id: {}", id);
                }
            }
        }

        SyncAction::Sync => {
            let uri = mongo_uri.context("--mongo-uri is required for sync")?;
            let model_id = model_id.context("--model-id is required for sync")?;

            let writer = ArtifactWriter::open(models_dir, model_id)?;
            let metadata = load_metadata(&writer.metadata_file())?;
            let registry = ModelRegistry::connect(&StoreConfig::new(uri))?;

            let version = registry.sync_model(
                &metadata,
                &writer.model_file(),
                &writer.labels_file(),
                activate,
            )?;

            println!("{}", "Model synced".green().bold());
            println!("  Model id: {}", model_id);
            println!("  Version:  {}", version);
            println!("  Accuracy: {:.4}", metadata.final_val_accuracy);
            if activate {
                println!("  {}", "Activated as the primary model".green());
            }
        }
    }
    Ok(())
}

fn cmd_ingest(mongo_uri: &str, material: &str, directory: &std::path::Path) -> Result<()> {
    let store = ImageStore::connect(&StoreConfig::new(mongo_uri))?;

    info!("ingesting {} for material {}", directory.display(), material);
    let report = ingest_directory(&store, directory, material)?;

    println!("{}", "Ingest complete".green().bold());
    println!("  Added:      {}", report.added);
    println!("  Duplicates: {}", report.duplicates);
    println!("  Failed:     {}", report.failed);
    Ok(())
}

fn cmd_stats(mongo_uri: &str) -> Result<()> {
    let store = ImageStore::connect(&StoreConfig::new(mongo_uri))?;
    let counts = store.class_counts()?;

    let total: u64 = counts.values().sum();
    println!("{}", "Image store statistics:".cyan().bold());
    println!("  Total images: {}", total);
    for (label, count) in &counts {
        let pct = if total > 0 {
            100.0 * *count as f64 / total as f64
        } else {
            0.0
        };
        println!("  {:24} {:>6} ({:>5.1}%)", label, count, pct);
    }
    Ok(())
}
