//! Loads a trained model directory and classifies single images.
//!
//! The prediction report is printed as one JSON object so callers can parse
//! it from the process output; failures are reported inside the JSON rather
//! than as a bare nonzero exit.

use std::path::Path;

use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use serde::{Deserialize, Serialize};

use crate::dataset::labels::LabelCodec;
use crate::dataset::preprocess;
use crate::model::cnn::{MaterialClassifier, MaterialClassifierConfig};
use crate::utils::error::{MatStudioError, Result};

/// One ranked class prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub class: String,
    pub confidence: f32,
}

/// The JSON document a prediction run prints.
///
/// Success carries the ranked predictions and the model file name; failure
/// carries the error and an empty prediction list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub predictions: Vec<Prediction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl PredictionReport {
    pub fn success(predictions: Vec<Prediction>, model_file: &Path) -> Self {
        Self {
            error: None,
            predictions,
            model: Some(
                model_file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| model_file.display().to_string()),
            ),
            success: Some(true),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            predictions: Vec::new(),
            model: None,
            success: None,
        }
    }
}

/// A loaded classifier plus its label map
pub struct MaterialPredictor<B: Backend> {
    model: MaterialClassifier<B>,
    codec: LabelCodec,
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> MaterialPredictor<B> {
    /// Load a model record and labels file.
    pub fn load(model_path: &Path, labels_path: &Path, device: &B::Device) -> Result<Self> {
        if !model_path.is_file() {
            return Err(MatStudioError::PathNotFound(model_path.to_path_buf()));
        }
        let codec = LabelCodec::load(labels_path)?;

        let config = MaterialClassifierConfig::new(codec.num_classes());
        let model = MaterialClassifier::<B>::new(&config, device)
            .load_file(model_path, &CompactRecorder::new(), device)
            .map_err(|e| {
                MatStudioError::Model(format!(
                    "cannot load model record {}: {:?}",
                    model_path.display(),
                    e
                ))
            })?;

        Ok(Self {
            model,
            codec,
            device: device.clone(),
            image_size: config.input_size,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.codec.num_classes()
    }

    /// Classify an image file. Returns all classes ranked by confidence.
    pub fn predict_file(&self, image_path: &Path) -> Result<Vec<Prediction>> {
        if !image_path.is_file() {
            return Err(MatStudioError::PathNotFound(image_path.to_path_buf()));
        }
        let bytes = std::fs::read(image_path)?;
        self.predict_bytes(&bytes)
    }

    /// Classify raw image bytes.
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Vec<Prediction>> {
        let image = preprocess::decode_and_resize(bytes, self.image_size as u32)?;
        let pixels = preprocess::to_chw_normalized(&image);

        let input = Tensor::<B, 4>::from_floats(
            TensorData::new(pixels, [1, 3, self.image_size, self.image_size]),
            &self.device,
        );
        let probabilities = self.model.forward_softmax(input);
        let values: Vec<f32> = probabilities
            .into_data()
            .to_vec()
            .map_err(|e| MatStudioError::Inference(format!("softmax readback failed: {:?}", e)))?;

        let mut predictions: Vec<Prediction> = values
            .into_iter()
            .enumerate()
            .map(|(idx, confidence)| Prediction {
                class: self.codec.decode(idx),
                confidence,
            })
            .collect();
        predictions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use image::RgbImage;

    fn write_jpeg(path: &Path, width: u32, height: u32) {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x * 2 % 256) as u8, (y * 3 % 256) as u8, 60])
        });
        img.save(path).unwrap();
    }

    fn trained_stub(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let device = Default::default();
        let config = MaterialClassifierConfig::new(3);
        let model = MaterialClassifier::<DefaultBackend>::new(&config, &device);

        let model_base = dir.join("model");
        model
            .save_file(model_base.clone(), &CompactRecorder::new())
            .unwrap();

        let labels_path = dir.join("labels.json");
        let codec =
            LabelCodec::from_classes(vec!["bricks".into(), "concrete".into(), "timber".into()]);
        codec.save(&labels_path).unwrap();

        (dir.join("model.mpk"), labels_path)
    }

    #[test]
    fn test_predict_ranks_all_classes() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, labels_path) = trained_stub(dir.path());

        let image_path = dir.path().join("wall.jpg");
        write_jpeg(&image_path, 300, 200);

        let device = Default::default();
        let predictor =
            MaterialPredictor::<DefaultBackend>::load(&model_path, &labels_path, &device).unwrap();
        let predictions = predictor.predict_file(&image_path).unwrap();

        assert_eq!(predictions.len(), 3);
        // Ranked by descending confidence, probabilities sum to one.
        assert!(predictions[0].confidence >= predictions[1].confidence);
        assert!(predictions[1].confidence >= predictions[2].confidence);
        let total: f32 = predictions.iter().map(|p| p.confidence).sum();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_missing_model_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let labels_path = dir.path().join("labels.json");
        LabelCodec::from_classes(vec!["a".into(), "b".into()])
            .save(&labels_path)
            .unwrap();

        let device = Default::default();
        let result = MaterialPredictor::<DefaultBackend>::load(
            &dir.path().join("missing.mpk"),
            &labels_path,
            &device,
        );
        assert!(matches!(result, Err(MatStudioError::PathNotFound(_))));
    }

    #[test]
    fn test_undersized_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (model_path, labels_path) = trained_stub(dir.path());

        let image_path = dir.path().join("tiny.jpg");
        write_jpeg(&image_path, 30, 30);

        let device = Default::default();
        let predictor =
            MaterialPredictor::<DefaultBackend>::load(&model_path, &labels_path, &device).unwrap();
        assert!(predictor.predict_file(&image_path).is_err());
    }

    #[test]
    fn test_report_shapes() {
        let ok = PredictionReport::success(
            vec![Prediction {
                class: "bricks".into(),
                confidence: 0.9,
            }],
            Path::new("data/models/m1/model.mpk"),
        );
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["model"], "model.mpk");
        assert_eq!(json["success"], true);
        assert!(json.get("error").is_none());

        let failed = PredictionReport::failure("Model not found");
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["error"], "Model not found");
        assert_eq!(json["predictions"].as_array().unwrap().len(), 0);
        assert!(json.get("success").is_none());
    }
}
