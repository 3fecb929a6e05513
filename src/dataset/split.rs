//! Stratified train/validation splitting.
//!
//! The split happens BEFORE class balancing so synthetic copies of a training
//! image can never leak into validation. Deterministic for a given seed.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::Sample;
use crate::utils::error::{MatStudioError, Result};

/// Train/validation halves of the dataset
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Vec<Sample>,
    pub validation: Vec<Sample>,
}

impl DatasetSplit {
    /// Per-class sample counts of the training half.
    pub fn train_distribution(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for sample in &self.train {
            if sample.label < num_classes {
                counts[sample.label] += 1;
            }
        }
        counts
    }
}

/// Split samples into train/validation, preserving per-class proportions.
///
/// Each class is shuffled independently with a seeded RNG; a class keeps at
/// least one training sample, and classes with two or more samples get at
/// least one validation sample.
pub fn stratified_split(
    samples: Vec<Sample>,
    validation_fraction: f64,
    seed: u64,
) -> Result<DatasetSplit> {
    // Zero would still hold out one sample per class below, so demand a
    // genuine fraction.
    if !(validation_fraction > 0.0 && validation_fraction < 1.0) {
        return Err(MatStudioError::Config(format!(
            "validation fraction must be in (0, 1), got {}",
            validation_fraction
        )));
    }
    if samples.is_empty() {
        return Err(MatStudioError::Dataset(
            "no samples provided for splitting".to_string(),
        ));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    // Group sample indices by class. BTreeMap keeps class iteration order
    // deterministic.
    let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, sample) in samples.iter().enumerate() {
        by_class.entry(sample.label).or_default().push(idx);
    }

    let mut train_indices = Vec::new();
    let mut val_indices = Vec::new();

    for (_, mut class_indices) in by_class {
        class_indices.shuffle(&mut rng);

        let n = class_indices.len();
        let n_val = if n < 2 {
            0
        } else {
            ((n as f64 * validation_fraction).round() as usize).clamp(1, n - 1)
        };

        val_indices.extend(class_indices.drain(..n_val));
        train_indices.extend(class_indices);
    }

    // Pull samples out by index without cloning pixel data.
    let mut slots: Vec<Option<Sample>> = samples.into_iter().map(Some).collect();
    let take = |indices: &[usize], slots: &mut Vec<Option<Sample>>| {
        indices
            .iter()
            .map(|&i| slots[i].take().expect("index taken twice"))
            .collect::<Vec<_>>()
    };

    let mut split = DatasetSplit {
        validation: take(&val_indices, &mut slots),
        train: take(&train_indices, &mut slots),
    };

    // Interleave classes in the training set.
    split.train.shuffle(&mut rng);

    Ok(split)
}
