//! The JSONL event stream and the observer seam.
//!
//! During a training run stdout carries exactly one JSON object per line and
//! nothing else; a supervising process parses these to track progress. The
//! pipeline itself only talks to [`TrainingObserver`]s; [`EventStream`] is
//! the observer that serializes to JSONL, and tests plug in buffers instead.

use std::io::Write;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// How often batch progress is reported (every Nth batch)
pub const BATCH_EVENT_INTERVAL: usize = 5;

/// Severity attached to `log` events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Warning,
    Error,
}

/// One event on the stream, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        message: String,
        level: LogSeverity,
    },
    PhaseUpdate {
        phase_name: String,
        phase_number: usize,
        total_phases: usize,
        phase_epoch: usize,
    },
    EpochEnd {
        /// Global 1-based epoch counter across all phases
        epoch: usize,
        /// Planned total across all phases
        total_epochs: usize,
        loss: f64,
        accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
    },
    BatchEnd {
        batch: usize,
        steps_per_epoch: Option<usize>,
        epoch: usize,
        total_epochs: usize,
        /// Percentage through the current epoch, 0-100
        batch_progress: u8,
        loss: f64,
        accuracy: f64,
    },
    ConfusionMatrix {
        matrix: Vec<Vec<usize>>,
        classes: Vec<String>,
    },
}

/// Phase context handed to observers at phase start
#[derive(Debug, Clone)]
pub struct PhaseInfo {
    pub phase_name: String,
    pub phase_number: usize,
    pub total_phases: usize,
    pub phase_epoch: usize,
}

/// Per-epoch statistics handed to observers
#[derive(Debug, Clone)]
pub struct EpochStats {
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Per-batch statistics handed to observers
#[derive(Debug, Clone)]
pub struct BatchStats {
    /// 0-based batch index within the epoch
    pub batch: usize,
    pub steps_per_epoch: usize,
    pub epoch: usize,
    pub total_epochs: usize,
    pub loss: f64,
    pub accuracy: f64,
}

/// Hook points the pipeline invokes synchronously during training.
///
/// Implementations decide what to do with each notification; the pipeline
/// calls every observer for every batch and epoch.
pub trait TrainingObserver: Send {
    fn on_phase_begin(&mut self, info: &PhaseInfo);
    fn on_epoch_end(&mut self, stats: &EpochStats);
    fn on_batch_end(&mut self, stats: &BatchStats);
}

/// Line-buffered JSONL writer for [`Event`]s.
///
/// Cloneable; clones share the underlying writer, so the pipeline can emit
/// log events while the same stream is registered as an observer.
#[derive(Clone)]
pub struct EventStream {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl EventStream {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    /// Stream writing to stdout, the production configuration.
    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Stream writing into a shared buffer, for tests.
    pub fn buffer() -> (Self, Arc<Mutex<Vec<u8>>>) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            writer: Arc::new(Mutex::new(Box::new(SharedBuffer(buf.clone())))),
        };
        (stream, buf)
    }

    /// Serialize one event as a single line and flush.
    pub fn emit(&self, event: &Event) -> Result<()> {
        let line = serde_json::to_string(event)?;
        let mut writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    pub fn log(&self, level: LogSeverity, message: impl Into<String>) {
        let event = Event::Log {
            message: message.into(),
            level,
        };
        if let Err(e) = self.emit(&event) {
            tracing::warn!("failed to emit log event: {}", e);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogSeverity::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.log(LogSeverity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogSeverity::Error, message);
    }
}

struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl TrainingObserver for EventStream {
    fn on_phase_begin(&mut self, info: &PhaseInfo) {
        let event = Event::PhaseUpdate {
            phase_name: info.phase_name.clone(),
            phase_number: info.phase_number,
            total_phases: info.total_phases,
            phase_epoch: info.phase_epoch,
        };
        if let Err(e) = self.emit(&event) {
            tracing::warn!("failed to emit phase event: {}", e);
        }
    }

    fn on_epoch_end(&mut self, stats: &EpochStats) {
        let event = Event::EpochEnd {
            epoch: stats.epoch,
            total_epochs: stats.total_epochs,
            loss: stats.loss,
            accuracy: stats.accuracy,
            val_loss: stats.val_loss,
            val_accuracy: stats.val_accuracy,
        };
        if let Err(e) = self.emit(&event) {
            tracing::warn!("failed to emit epoch event: {}", e);
        }
    }

    fn on_batch_end(&mut self, stats: &BatchStats) {
        // Only every Nth batch reaches the stream.
        if stats.batch % BATCH_EVENT_INTERVAL != 0 {
            return;
        }
        let progress = if stats.steps_per_epoch > 0 {
            (100 * (stats.batch + 1) / stats.steps_per_epoch).min(100) as u8
        } else {
            0
        };
        let event = Event::BatchEnd {
            batch: stats.batch,
            steps_per_epoch: Some(stats.steps_per_epoch),
            epoch: stats.epoch,
            total_epochs: stats.total_epochs,
            batch_progress: progress,
            loss: stats.loss,
            accuracy: stats.accuracy,
        };
        if let Err(e) = self.emit(&event) {
            tracing::warn!("failed to emit batch event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(buf: &Arc<Mutex<Vec<u8>>>) -> Vec<serde_json::Value> {
        let data = buf.lock().unwrap().clone();
        String::from_utf8(data)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_log_event_shape() {
        let (stream, buf) = EventStream::buffer();
        stream.info("starting");
        stream.error("boom");

        let events = lines(&buf);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["type"], "log");
        assert_eq!(events[0]["level"], "info");
        assert_eq!(events[0]["message"], "starting");
        assert_eq!(events[1]["level"], "error");
    }

    #[test]
    fn test_epoch_event_serialization() {
        let (stream, buf) = EventStream::buffer();
        stream
            .emit(&Event::EpochEnd {
                epoch: 3,
                total_epochs: 10,
                loss: 0.42,
                accuracy: 0.8,
                val_loss: 0.5,
                val_accuracy: 0.75,
            })
            .unwrap();

        let events = lines(&buf);
        assert_eq!(events[0]["type"], "epoch_end");
        assert_eq!(events[0]["epoch"], 3);
        assert!((events[0]["val_accuracy"].as_f64().unwrap() - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_batch_events_sampled_every_fifth() {
        let (mut stream, buf) = {
            let (s, b) = EventStream::buffer();
            (s, b)
        };

        for batch in 0..12 {
            stream.on_batch_end(&BatchStats {
                batch,
                steps_per_epoch: 12,
                epoch: 1,
                total_epochs: 2,
                loss: 1.0,
                accuracy: 0.5,
            });
        }

        // Batches 0, 5, 10.
        let events = lines(&buf);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1]["batch"], 5);
        assert_eq!(events[1]["batch_progress"], 50);
    }

    #[test]
    fn test_one_object_per_line() {
        let (stream, buf) = EventStream::buffer();
        stream.info("a");
        stream.info("b");

        let raw = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn test_confusion_matrix_event() {
        let (stream, buf) = EventStream::buffer();
        stream
            .emit(&Event::ConfusionMatrix {
                matrix: vec![vec![3, 1], vec![0, 4]],
                classes: vec!["bricks".into(), "wood".into()],
            })
            .unwrap();

        let events = lines(&buf);
        assert_eq!(events[0]["type"], "confusion_matrix");
        assert_eq!(events[0]["matrix"][0][0], 3);
        assert_eq!(events[0]["classes"][1], "wood");
    }
}
