//! The three-phase fine-tuning plan.
//!
//! Training walks FeatureExtraction -> FineTuning -> DeepFineTuning in order.
//! Model weights carry over between phases; the optimizer is rebuilt fresh
//! for each phase. The deep phase is skipped when fine-tuning never found a
//! signal worth pushing further.

use serde::{Deserialize, Serialize};

use crate::model::cnn::NUM_BLOCKS;

/// Validation-accuracy threshold below which DeepFineTuning is skipped
pub const DEEP_PHASE_MIN_VAL_ACCURACY: f64 = 0.5;

/// The training phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    /// Backbone frozen, head only, full learning rate
    FeatureExtraction,
    /// Top quarter of the backbone unfrozen, learning rate x0.1
    FineTuning,
    /// Top half unfrozen, learning rate x0.01
    DeepFineTuning,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::FeatureExtraction => "FeatureExtraction",
            Phase::FineTuning => "FineTuning",
            Phase::DeepFineTuning => "DeepFineTuning",
        }
    }

    /// 1-based position in the phase sequence
    pub fn number(&self) -> usize {
        match self {
            Phase::FeatureExtraction => 1,
            Phase::FineTuning => 2,
            Phase::DeepFineTuning => 3,
        }
    }
}

/// Planned parameters for one phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasePlan {
    pub phase: Phase,
    pub epochs: usize,
    /// Multiplier applied to the base learning rate
    pub lr_scale: f64,
    /// Backbone blocks unfrozen from the top; the head is always trainable
    pub unfrozen_blocks: usize,
}

/// Build the full phase plan for a run with `total_epochs` base epochs.
///
/// Fine-tuning runs half the base epochs (at least 5, never more than the
/// base); deep fine-tuning halves again under the same bounds.
pub fn plan_phases(total_epochs: usize) -> Vec<PhasePlan> {
    let p1 = total_epochs.max(1);
    let p2 = (p1 / 2).max(5).min(p1);
    let p3 = (p2 / 2).max(5).min(p2);

    vec![
        PhasePlan {
            phase: Phase::FeatureExtraction,
            epochs: p1,
            lr_scale: 1.0,
            unfrozen_blocks: 0,
        },
        PhasePlan {
            phase: Phase::FineTuning,
            epochs: p2,
            lr_scale: 0.1,
            unfrozen_blocks: NUM_BLOCKS / 4,
        },
        PhasePlan {
            phase: Phase::DeepFineTuning,
            epochs: p3,
            lr_scale: 0.01,
            unfrozen_blocks: NUM_BLOCKS / 2,
        },
    ]
}

/// Whether DeepFineTuning should be skipped given fine-tuning's best
/// validation accuracy. The phase runs only when the accuracy strictly
/// exceeds the threshold.
pub fn skip_deep_phase(fine_tuning_best_val_accuracy: f64, threshold: f64) -> bool {
    fine_tuning_best_val_accuracy <= threshold
}

/// What actually happened in one phase.
///
/// A skipped phase is represented explicitly rather than as an executed
/// phase with empty history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PhaseResult {
    Executed(PhaseHistory),
    Skipped { phase: Phase, reason: String },
}

impl PhaseResult {
    pub fn phase(&self) -> Phase {
        match self {
            PhaseResult::Executed(history) => history.phase,
            PhaseResult::Skipped { phase, .. } => *phase,
        }
    }

    pub fn epochs_run(&self) -> usize {
        match self {
            PhaseResult::Executed(history) => history.epochs_run,
            PhaseResult::Skipped { .. } => 0,
        }
    }
}

/// Metrics from an executed phase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistory {
    pub phase: Phase,
    pub epochs_planned: usize,
    pub epochs_run: usize,
    pub best_val_accuracy: f64,
    pub final_train_loss: f64,
    pub final_train_accuracy: f64,
    pub stopped_early: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_default_epochs() {
        let plan = plan_phases(25);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].epochs, 25);
        assert_eq!(plan[1].epochs, 12);
        assert_eq!(plan[2].epochs, 6);
    }

    #[test]
    fn test_plan_tiny_run_never_exceeds_base() {
        // Later phases are clamped to at most the preceding phase's length.
        let plan = plan_phases(2);
        assert_eq!(plan[0].epochs, 2);
        assert_eq!(plan[1].epochs, 2);
        assert_eq!(plan[2].epochs, 2);

        let plan = plan_phases(1);
        assert!(plan.iter().all(|p| p.epochs == 1));
    }

    #[test]
    fn test_plan_unfreezing_progression() {
        let plan = plan_phases(25);
        assert_eq!(plan[0].unfrozen_blocks, 0);
        assert_eq!(plan[1].unfrozen_blocks, 2);
        assert_eq!(plan[2].unfrozen_blocks, 4);
        assert!(plan[0].lr_scale > plan[1].lr_scale);
        assert!(plan[1].lr_scale > plan[2].lr_scale);
    }

    #[test]
    fn test_skip_rule_boundary() {
        let t = DEEP_PHASE_MIN_VAL_ACCURACY;
        assert!(skip_deep_phase(0.5, t));
        assert!(skip_deep_phase(0.3, t));
        assert!(!skip_deep_phase(0.500001, t));
        assert!(!skip_deep_phase(0.9, t));
    }

    #[test]
    fn test_skipped_result_reports_zero_epochs() {
        let result = PhaseResult::Skipped {
            phase: Phase::DeepFineTuning,
            reason: "validation accuracy at or below 0.5".to_string(),
        };
        assert_eq!(result.epochs_run(), 0);
        assert_eq!(result.phase(), Phase::DeepFineTuning);
    }
}
