//! Tensor batch construction.
//!
//! Samples hold decoded RGB pixels until this point; the batcher converts
//! them to normalized CHW float tensors on the target device. Training-time
//! augmentation happens on the pixel samples just before batching, so
//! validation batches go through the exact same tensor path unaugmented.

use burn::prelude::*;

use crate::dataset::preprocess::to_chw_normalized;
use crate::dataset::Sample;

/// A batch of material images ready for the model
#[derive(Clone, Debug)]
pub struct MaterialBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width], normalized to [-1, 1]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Builds [`MaterialBatch`]es from pixel samples
#[derive(Clone, Debug)]
pub struct MaterialBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> MaterialBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }

    /// Convert a slice of samples into one tensor batch.
    pub fn batch(&self, samples: &[Sample]) -> MaterialBatch<B> {
        let batch_size = samples.len();
        let (height, width) = (self.image_size, self.image_size);

        let images_data: Vec<f32> = samples
            .iter()
            .flat_map(|sample| to_chw_normalized(&sample.image))
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height, width]),
            &self.device,
        );

        let targets_data: Vec<i64> = samples.iter().map(|s| s.label as i64).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(targets_data, [batch_size]),
            &self.device,
        );

        MaterialBatch { images, targets }
    }

    /// Split samples into consecutive batches of at most `batch_size`.
    pub fn batches(&self, samples: &[Sample], batch_size: usize) -> Vec<MaterialBatch<B>> {
        samples
            .chunks(batch_size.max(1))
            .map(|chunk| self.batch(chunk))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DefaultBackend;
    use image::{Rgb, RgbImage};

    fn sample(label: usize, value: u8) -> Sample {
        Sample {
            image: RgbImage::from_pixel(8, 8, Rgb([value, value, value])),
            label,
        }
    }

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = MaterialBatcher::<DefaultBackend>::new(device, 8);

        let batch = batcher.batch(&[sample(0, 10), sample(1, 200), sample(2, 128)]);
        assert_eq!(batch.images.dims(), [3, 3, 8, 8]);
        assert_eq!(batch.targets.dims(), [3]);
    }

    #[test]
    fn test_batch_values_normalized() {
        let device = Default::default();
        let batcher = MaterialBatcher::<DefaultBackend>::new(device, 8);

        let batch = batcher.batch(&[sample(0, 0)]);
        let data = batch.images.into_data();
        let values: Vec<f32> = data.to_vec().unwrap();
        assert!(values.iter().all(|&v| v == -1.0));
    }

    #[test]
    fn test_chunked_batches() {
        let device = Default::default();
        let batcher = MaterialBatcher::<DefaultBackend>::new(device, 8);

        let samples: Vec<Sample> = (0..7).map(|i| sample(i % 2, i as u8)).collect();
        let batches = batcher.batches(&samples, 3);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].targets.dims(), [3]);
        assert_eq!(batches[2].targets.dims(), [1]);
    }
}
