//! # matstudio
//!
//! Construction-material image classification lifecycle built on the Burn
//! framework. The library backs a set of operator commands:
//!
//! - **train**: multi-phase transfer-learning pipeline over images held in a
//!   MongoDB store, driven entirely through a JSONL event stream on stdout
//! - **predict**: single-image inference against a trained artifact directory
//! - **ingest**: add labeled images to the store with dedup and preprocessing
//! - **sync**: publish trained model metadata to the application registry
//!
//! ## Modules
//!
//! - `store`: MongoDB adapters for the image collection and model registry
//! - `dataset`: decoding, label encoding, stratified splitting, class
//!   balancing, and training-time augmentation
//! - `model`: CNN architecture built with Burn
//! - `training`: the phase scheduler, event stream, and training pipeline
//! - `inference`: single-image prediction
//! - `artifacts`: the on-disk model artifact layout
//! - `utils`: logging, metrics, and error types

pub mod artifacts;
pub mod backend;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod store;
pub mod training;
pub mod utils;

pub use backend::{default_device, DefaultBackend, RuntimeOptions, TrainingBackend};
pub use dataset::labels::LabelCodec;
pub use dataset::Sample;
pub use inference::predictor::MaterialPredictor;
pub use model::cnn::{MaterialClassifier, MaterialClassifierConfig};
pub use store::{ImageRecord, ImageStore, ModelRegistry, StoreConfig};
pub use training::events::{Event, EventStream, TrainingObserver};
pub use training::pipeline::{TrainingOutcome, TrainingPipeline};
pub use training::TrainingConfig;
pub use utils::error::{MatStudioError, Result};
pub use utils::metrics::{ConfusionMatrix, Metrics};

/// Default square input size fed to the classifier
pub const DEFAULT_IMAGE_SIZE: usize = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
