//! Dataset handling for material images.
//!
//! The flow during a training run:
//! 1. `preprocess`: decode store records into fixed-size RGB samples
//! 2. `labels`: fit the material-name -> index codec
//! 3. `split`: stratified train/validation split (before balancing)
//! 4. `balance`: bring training classes to a common target count
//! 5. `augment` + `batch`: per-epoch augmentation and tensor batches

pub mod augment;
pub mod balance;
pub mod batch;
pub mod labels;
pub mod preprocess;
pub mod split;

use image::RgbImage;

pub use augment::{AugmentConfig, Augmenter};
pub use balance::{balance_classes, class_weights, BalanceConfig};
pub use batch::{MaterialBatch, MaterialBatcher};
pub use labels::LabelCodec;
pub use split::{stratified_split, DatasetSplit};

/// A decoded, resized image with its encoded class label.
///
/// Samples live in memory for the duration of a run and are never persisted;
/// conversion to normalized tensors happens at batch time.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Square RGB pixels at the configured model input size
    pub image: RgbImage,
    /// Dense class index assigned by the [`LabelCodec`]
    pub label: usize,
}

/// Per-class counts over a set of samples.
pub fn class_distribution(samples: &[Sample], num_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; num_classes];
    for sample in samples {
        if sample.label < num_classes {
            counts[sample.label] += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_class_distribution() {
        let samples: Vec<Sample> = [0, 0, 1, 2, 2, 2]
            .iter()
            .map(|&label| Sample {
                image: RgbImage::from_pixel(2, 2, Rgb([0, 0, 0])),
                label,
            })
            .collect();

        assert_eq!(class_distribution(&samples, 3), vec![2, 1, 3]);
    }
}
