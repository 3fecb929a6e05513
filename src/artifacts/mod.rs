//! The on-disk model artifact layout.
//!
//! A trained model lives in `<models_dir>/<model_id>/` as:
//! - `model.mpk`: the canonical weights (best checkpoint, re-saved at the end)
//! - `best_model.mpk`: the best-so-far checkpoint written during training
//! - `labels.json`: index -> material name map
//! - `metadata.json`: everything the registry and inference need to know
//!
//! Writes are idempotent per model id: retraining the same id overwrites the
//! directory contents in place.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dataset::labels::LabelCodec;
use crate::utils::error::{MatStudioError, Result};

/// Configuration snapshot embedded in metadata.json
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfigSnapshot {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub seed: u64,
    pub image_size: usize,
    /// Pixel normalization convention, e.g. "[-1,1]"
    pub pixel_normalization: String,
}

/// metadata.json contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_architecture: String,
    pub classes: Vec<String>,
    pub num_classes: usize,
    pub class_indices: BTreeMap<String, usize>,
    /// [channels, height, width]
    pub input_shape: [usize; 3],
    /// Usable samples fetched from the store, before balancing
    pub original_samples: usize,
    /// Training samples after balancing
    pub training_samples: usize,
    pub validation_samples: usize,
    pub final_accuracy: f64,
    pub final_val_accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub epochs_trained: usize,
    pub segmentation_enabled: bool,
    pub created_at: String,
    pub training_config: TrainingConfigSnapshot,
}

/// Writer for one model's artifact directory
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Create (or reuse) the artifact directory for a model id.
    pub fn create(models_dir: &Path, model_id: &str) -> Result<Self> {
        let dir = models_dir.join(model_id);
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Open an existing artifact directory without creating it.
    pub fn open(models_dir: &Path, model_id: &str) -> Result<Self> {
        let dir = models_dir.join(model_id);
        if !dir.is_dir() {
            return Err(MatStudioError::PathNotFound(dir));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base path for the canonical record; the recorder appends `.mpk`.
    pub fn model_record_base(&self) -> PathBuf {
        self.dir.join("model")
    }

    /// Base path for the best-checkpoint record.
    pub fn best_record_base(&self) -> PathBuf {
        self.dir.join("best_model")
    }

    pub fn model_file(&self) -> PathBuf {
        self.dir.join("model.mpk")
    }

    pub fn best_file(&self) -> PathBuf {
        self.dir.join("best_model.mpk")
    }

    pub fn labels_file(&self) -> PathBuf {
        self.dir.join("labels.json")
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.dir.join("metadata.json")
    }

    pub fn write_labels(&self, codec: &LabelCodec) -> Result<()> {
        codec.save(&self.labels_file())
    }

    pub fn write_metadata(&self, metadata: &ModelMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        std::fs::write(self.metadata_file(), json)?;
        Ok(())
    }

    pub fn read_metadata(&self) -> Result<ModelMetadata> {
        load_metadata(&self.metadata_file())
    }
}

/// Read a metadata.json file.
pub fn load_metadata(path: &Path) -> Result<ModelMetadata> {
    if !path.is_file() {
        return Err(MatStudioError::PathNotFound(path.to_path_buf()));
    }
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// A locally trained model found under the models directory
#[derive(Debug, Clone)]
pub struct LocalModel {
    pub model_id: String,
    pub metadata: ModelMetadata,
}

/// Scan the models directory for complete artifacts.
///
/// Directories without a readable metadata.json are skipped with a warning.
pub fn list_local_models(models_dir: &Path) -> Result<Vec<LocalModel>> {
    let mut models = Vec::new();
    if !models_dir.is_dir() {
        return Ok(models);
    }

    for entry in std::fs::read_dir(models_dir)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        let model_id = entry.file_name().to_string_lossy().to_string();
        match load_metadata(&entry.path().join("metadata.json")) {
            Ok(metadata) => models.push(LocalModel { model_id, metadata }),
            Err(e) => {
                tracing::warn!("skipping {}: {}", model_id, e);
            }
        }
    }

    models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata(model_id: &str, accuracy: f64) -> ModelMetadata {
        ModelMetadata {
            model_id: model_id.to_string(),
            model_architecture: "matstudio-cnn-8".to_string(),
            classes: vec!["bricks".into(), "wood".into()],
            num_classes: 2,
            class_indices: [("bricks".to_string(), 0), ("wood".to_string(), 1)]
                .into_iter()
                .collect(),
            input_shape: [3, 224, 224],
            original_samples: 100,
            training_samples: 160,
            validation_samples: 20,
            final_accuracy: accuracy,
            final_val_accuracy: accuracy - 0.05,
            precision: 0.9,
            recall: 0.88,
            f1_score: 0.89,
            epochs_trained: 12,
            segmentation_enabled: false,
            created_at: "2026-01-01T00:00:00Z".to_string(),
            training_config: TrainingConfigSnapshot {
                epochs: 25,
                batch_size: 16,
                learning_rate: 0.001,
                validation_split: 0.2,
                seed: 42,
                image_size: 224,
                pixel_normalization: "[-1,1]".to_string(),
            },
        }
    }

    #[test]
    fn test_metadata_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::create(dir.path(), "model-a").unwrap();

        writer.write_metadata(&sample_metadata("model-a", 0.9)).unwrap();
        let loaded = writer.read_metadata().unwrap();
        assert_eq!(loaded.model_id, "model-a");
        assert_eq!(loaded.num_classes, 2);
        assert_eq!(loaded.training_config.pixel_normalization, "[-1,1]");
    }

    #[test]
    fn test_rewrite_overwrites_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();

        let first = ArtifactWriter::create(dir.path(), "model-a").unwrap();
        first.write_metadata(&sample_metadata("model-a", 0.7)).unwrap();

        // Second run for the same id wins.
        let second = ArtifactWriter::create(dir.path(), "model-a").unwrap();
        second.write_metadata(&sample_metadata("model-a", 0.95)).unwrap();

        let loaded = second.read_metadata().unwrap();
        assert!((loaded.final_accuracy - 0.95).abs() < 1e-9);
        assert_eq!(list_local_models(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_list_skips_incomplete_directories() {
        let dir = tempfile::tempdir().unwrap();

        let writer = ArtifactWriter::create(dir.path(), "good").unwrap();
        writer.write_metadata(&sample_metadata("good", 0.8)).unwrap();
        std::fs::create_dir_all(dir.path().join("broken")).unwrap();

        let models = list_local_models(dir.path()).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].model_id, "good");
    }

    #[test]
    fn test_open_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArtifactWriter::open(dir.path(), "absent"),
            Err(MatStudioError::PathNotFound(_))
        ));
    }
}
