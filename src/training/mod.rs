//! Training: configuration, phase planning, events, and the pipeline.
//!
//! The pipeline consumes image records, prepares the dataset, and walks the
//! three fine-tuning phases while reporting progress exclusively through the
//! event stream. See [`pipeline::TrainingPipeline`] for the entry point.

pub mod events;
pub mod phases;
pub mod pipeline;
pub mod schedule;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use events::{Event, EventStream, LogSeverity, TrainingObserver};
pub use phases::{plan_phases, Phase, PhaseHistory, PhasePlan, PhaseResult};
pub use pipeline::{TrainingOutcome, TrainingPipeline};
pub use schedule::WarmupCosine;

/// Default number of base training epochs
pub const DEFAULT_EPOCHS: usize = 25;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 16;

/// Default base learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Configuration for a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Identifier the artifacts are written under
    pub model_id: String,
    /// Root directory for model artifacts
    pub models_dir: PathBuf,
    /// Base epochs for the feature-extraction phase; later phases derive
    /// their lengths from this
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of each class held out for validation
    pub validation_split: f64,
    /// Seed for all dataset randomness and framework seeding
    pub seed: u64,
    /// Square model input size
    pub image_size: usize,
    /// Minimum usable samples required before training starts
    pub min_samples: usize,
    /// Per-class balancing floor
    pub balance_floor: usize,
    /// Adam weight decay
    pub weight_decay: f64,
    /// Epochs without validation improvement before a phase stops early
    pub early_stopping_patience: usize,
    /// Fine-tuning validation accuracy that must be strictly exceeded for
    /// the deep fine-tuning phase to run
    pub deep_phase_accuracy_threshold: f64,
    /// Label smoothing applied to the cross-entropy loss
    pub label_smoothing: f32,
    /// Recorded in metadata for registry compatibility; segmentation
    /// training itself is not performed
    pub enable_segmentation: bool,
}

impl TrainingConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            models_dir: PathBuf::from("data/models"),
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            validation_split: 0.2,
            seed: 42,
            image_size: crate::DEFAULT_IMAGE_SIZE,
            min_samples: 10,
            balance_floor: 150,
            weight_decay: 1e-4,
            early_stopping_patience: 5,
            deep_phase_accuracy_threshold: phases::DEEP_PHASE_MIN_VAL_ACCURACY,
            label_smoothing: 0.1,
            enable_segmentation: false,
        }
    }
}
