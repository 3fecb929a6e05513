//! Class rebalancing for the training set.
//!
//! Every class is brought to the same target count:
//! `target = min(2 * max_count, max(floor, max_count))`. Majority classes are
//! subsampled without replacement; minority classes keep all originals and
//! synthesize the deficit with randomized augmentation. Applied to the
//! training half only, after the split.

use std::collections::BTreeMap;

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use crate::dataset::augment::{AugmentConfig, Augmenter};
use crate::dataset::Sample;

/// Knobs for the balancing pass
#[derive(Debug, Clone)]
pub struct BalanceConfig {
    /// Minimum per-class target, even when the largest class is smaller
    pub floor: usize,
    /// Seed for subsampling, synthesis source choice, and the final shuffle
    pub seed: u64,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self { floor: 150, seed: 42 }
    }
}

/// The per-class target count for a dataset whose largest class has
/// `max_count` samples.
pub fn balance_target(max_count: usize, floor: usize) -> usize {
    (2 * max_count).min(floor.max(max_count))
}

/// Bring every class present in `train` to the common target count.
pub fn balance_classes(train: Vec<Sample>, config: &BalanceConfig) -> Vec<Sample> {
    let mut by_class: BTreeMap<usize, Vec<Sample>> = BTreeMap::new();
    for sample in train {
        by_class.entry(sample.label).or_default().push(sample);
    }
    if by_class.is_empty() {
        return Vec::new();
    }

    let max_count = by_class.values().map(|v| v.len()).max().unwrap_or(0);
    let target = balance_target(max_count, config.floor);

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let augmenter = Augmenter::new(AugmentConfig::synthesis());
    let mut balanced = Vec::new();

    for (label, class_samples) in by_class {
        balanced.extend(resize_class(class_samples, label, target, &augmenter, &mut rng));
    }

    balanced.shuffle(&mut rng);
    balanced
}

/// Bring one class to exactly `target` samples: clip oversized classes by
/// subsampling without replacement, grow undersized ones with synthesized
/// copies of replacement-sampled originals.
fn resize_class(
    mut class_samples: Vec<Sample>,
    label: usize,
    target: usize,
    augmenter: &Augmenter,
    rng: &mut ChaCha8Rng,
) -> Vec<Sample> {
    let count = class_samples.len();
    if count > target {
        class_samples.shuffle(rng);
        class_samples.truncate(target);
        tracing::debug!("class {}: subsampled {} -> {}", label, count, target);
    } else if count < target {
        let deficit = target - count;
        tracing::debug!("class {}: synthesizing {} copies", label, deficit);
        for _ in 0..deficit {
            let source = &class_samples[rng.gen_range(0..count)];
            let image = augmenter.synthesize(&source.image, rng);
            class_samples.push(Sample { image, label });
        }
    }
    class_samples
}

/// Inverse-frequency class weights from a per-class distribution:
/// `total / (num_classes * count)`. Computed over the balanced training
/// distribution, so after balancing the weights are uniform.
pub fn class_weights(distribution: &[usize]) -> Vec<f32> {
    let total: usize = distribution.iter().sum();
    let num_classes = distribution.len();
    distribution
        .iter()
        .map(|&count| {
            if count > 0 {
                total as f32 / (num_classes as f32 * count as f32)
            } else {
                0.0
            }
        })
        .collect()
}
