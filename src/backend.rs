//! Backend selection and process-wide runtime options.
//!
//! The training worker runs on CPU boxes next to the document store, so the
//! ndarray backend is the default. All framework-global state (seeding) goes
//! through [`RuntimeOptions`] so callers decide when it happens.

use std::sync::OnceLock;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::tensor::backend::Backend;

/// The default inference backend
pub type DefaultBackend = NdArray<f32>;

/// The default autodiff backend for training
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Get the default device
pub fn default_device() -> NdArrayDevice {
    NdArrayDevice::default()
}

/// Get a human-readable name for the current backend
pub fn backend_name() -> &'static str {
    "ndarray (CPU)"
}

static SEEDED: OnceLock<u64> = OnceLock::new();

/// Explicit runtime options for a training or inference run.
///
/// Passed into the pipeline instead of mutating framework globals at call
/// sites; `initialize` is idempotent, the first caller wins.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Seed for the framework RNG and all derived dataset RNGs
    pub seed: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self { seed: 42 }
    }
}

impl RuntimeOptions {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Seed the framework RNG once per process.
    pub fn initialize<B: Backend>(&self) {
        let seed = *SEEDED.get_or_init(|| self.seed);
        if seed != self.seed {
            tracing::debug!(
                "Runtime already initialized with seed {}, ignoring seed {}",
                seed,
                self.seed
            );
        }
        B::seed(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initialize_is_idempotent() {
        let opts = RuntimeOptions::new(7);
        opts.initialize::<DefaultBackend>();
        // A second call with a different seed must not panic or reseed.
        RuntimeOptions::new(9).initialize::<DefaultBackend>();
    }

    #[test]
    fn test_backend_name() {
        assert!(backend_name().contains("ndarray"));
    }
}
