//! Logging, metrics, and error types shared across the crate.

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{MatStudioError, Result};
pub use logging::{init_logging, LogConfig, LogLevel};
pub use metrics::{ClassMetrics, ConfusionMatrix, Metrics};
