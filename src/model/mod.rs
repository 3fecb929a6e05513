//! CNN model built with the Burn framework.

pub mod cnn;

pub use cnn::{MaterialClassifier, MaterialClassifierConfig, ARCHITECTURE, NUM_BLOCKS};
