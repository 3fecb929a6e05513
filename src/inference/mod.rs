//! Single-image inference against a trained model directory.

pub mod predictor;

pub use predictor::{MaterialPredictor, Prediction, PredictionReport};
