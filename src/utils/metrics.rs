//! Evaluation metrics for the material classifier.
//!
//! Accuracy, per-class precision/recall/F1 with macro averages, and a
//! confusion matrix suitable for the end-of-run event stream.

use serde::{Deserialize, Serialize};

/// Aggregate metrics computed over a validation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Macro-averaged precision over classes with support
    pub macro_precision: f64,

    /// Macro-averaged recall
    pub macro_recall: f64,

    /// Macro-averaged F1-score
    pub macro_f1: f64,

    /// Per-class metrics
    pub per_class: Vec<ClassMetrics>,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Compute metrics from predicted and ground-truth class indices.
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        assert_eq!(
            predictions.len(),
            ground_truth.len(),
            "Predictions and ground truth must have same length"
        );

        let total_samples = predictions.len();
        if total_samples == 0 {
            return Self::empty();
        }

        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let correct_predictions = predictions
            .iter()
            .zip(ground_truth.iter())
            .filter(|(p, g)| p == g)
            .count();
        let accuracy = correct_predictions as f64 / total_samples as f64;

        let per_class: Vec<ClassMetrics> = (0..num_classes)
            .map(|class_idx| ClassMetrics::from_confusion_matrix(&confusion_matrix, class_idx))
            .collect();

        // Macro averages over classes that actually appeared.
        let with_support: Vec<&ClassMetrics> =
            per_class.iter().filter(|m| m.support > 0).collect();
        let n = with_support.len() as f64;

        let (macro_precision, macro_recall, macro_f1) = if n > 0.0 {
            (
                with_support.iter().map(|m| m.precision).sum::<f64>() / n,
                with_support.iter().map(|m| m.recall).sum::<f64>() / n,
                with_support.iter().map(|m| m.f1).sum::<f64>() / n,
            )
        } else {
            (0.0, 0.0, 0.0)
        };

        Self {
            total_samples,
            correct_predictions,
            accuracy,
            macro_precision,
            macro_recall,
            macro_f1,
            per_class,
            confusion_matrix,
        }
    }

    fn empty() -> Self {
        Self {
            total_samples: 0,
            correct_predictions: 0,
            accuracy: 0.0,
            macro_precision: 0.0,
            macro_recall: 0.0,
            macro_f1: 0.0,
            per_class: Vec::new(),
            confusion_matrix: ConfusionMatrix::new(0),
        }
    }
}

/// Per-class metrics derived from the confusion matrix
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_idx: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    /// Precision = TP / (TP + FP)
    pub precision: f64,
    /// Recall = TP / (TP + FN)
    pub recall: f64,
    /// F1 = 2 * (precision * recall) / (precision + recall)
    pub f1: f64,
    /// Number of actual samples of this class
    pub support: usize,
}

impl ClassMetrics {
    pub fn from_confusion_matrix(cm: &ConfusionMatrix, class_idx: usize) -> Self {
        let true_positives = cm.get(class_idx, class_idx);

        let false_positives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(i, class_idx))
            .sum();

        let false_negatives: usize = (0..cm.num_classes)
            .filter(|&i| i != class_idx)
            .map(|i| cm.get(class_idx, i))
            .sum();

        let support = true_positives + false_negatives;

        let precision = if true_positives + false_positives > 0 {
            true_positives as f64 / (true_positives + false_positives) as f64
        } else {
            0.0
        };

        let recall = if support > 0 {
            true_positives as f64 / support as f64
        } else {
            0.0
        };

        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        Self {
            class_idx,
            true_positives,
            false_positives,
            false_negatives,
            precision,
            recall,
            f1,
            support,
        }
    }
}

/// Confusion matrix for multi-class classification.
///
/// Stored as a flat vector in row-major order, row = actual, column =
/// predicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub num_classes: usize,
    pub matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);
        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }
        cm
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted] += 1;
        }
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total > 0 {
            self.correct() as f64 / total as f64
        } else {
            0.0
        }
    }

    /// Matrix as nested rows, the shape the event stream emits.
    pub fn rows(&self) -> Vec<Vec<usize>> {
        (0..self.num_classes)
            .map(|row| {
                (0..self.num_classes)
                    .map(|col| self.get(row, col))
                    .collect()
            })
            .collect()
    }
}
