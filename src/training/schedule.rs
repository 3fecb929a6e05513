//! Learning rate schedule.
//!
//! Each training phase runs its own warmup-cosine schedule: a short linear
//! ramp from near zero to the phase's peak rate, then cosine decay toward a
//! floor of 1% of the peak.

use serde::{Deserialize, Serialize};

/// Warmup followed by cosine annealing, epoch-indexed from 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupCosine {
    pub peak_lr: f64,
    pub min_lr: f64,
    pub warmup_epochs: usize,
    pub total_epochs: usize,
}

impl WarmupCosine {
    /// Schedule for one phase: warmup over a fifth of the phase (at least one
    /// epoch), floor at 1% of the peak.
    pub fn for_phase(peak_lr: f64, total_epochs: usize) -> Self {
        Self {
            peak_lr,
            min_lr: peak_lr * 0.01,
            warmup_epochs: (total_epochs / 5).max(1),
            total_epochs: total_epochs.max(1),
        }
    }

    /// Learning rate for the given epoch within the phase.
    pub fn get_lr(&self, epoch: usize) -> f64 {
        if epoch < self.warmup_epochs {
            // Linear warmup
            let progress = (epoch as f64 + 1.0) / self.warmup_epochs as f64;
            self.peak_lr * progress
        } else {
            // Cosine annealing
            let remaining = (self.total_epochs - self.warmup_epochs).max(1);
            let progress = (epoch - self.warmup_epochs) as f64 / remaining as f64;
            let cosine_factor = (1.0 + (std::f64::consts::PI * progress.min(1.0)).cos()) / 2.0;
            self.min_lr + (self.peak_lr - self.min_lr) * cosine_factor
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warmup_rises_to_peak() {
        let schedule = WarmupCosine::for_phase(0.1, 25);
        assert_eq!(schedule.warmup_epochs, 5);

        let mut prev = 0.0;
        for epoch in 0..schedule.warmup_epochs {
            let lr = schedule.get_lr(epoch);
            assert!(lr > prev);
            prev = lr;
        }
        assert!((schedule.get_lr(schedule.warmup_epochs - 1) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_decays_to_floor() {
        let schedule = WarmupCosine::for_phase(0.1, 20);

        let after_warmup = schedule.get_lr(schedule.warmup_epochs);
        let near_end = schedule.get_lr(19);
        assert!(after_warmup > near_end);
        assert!(near_end >= schedule.min_lr);
        // Floor is 1% of peak.
        assert!((schedule.min_lr - 0.001).abs() < 1e-12);
        // Past the end the schedule stays at the floor.
        assert!((schedule.get_lr(200) - schedule.min_lr).abs() < 1e-12);
    }

    #[test]
    fn test_single_epoch_phase() {
        let schedule = WarmupCosine::for_phase(0.01, 1);
        let lr = schedule.get_lr(0);
        assert!(lr > 0.0 && lr <= 0.01);
    }

    #[test]
    fn test_midpoint_is_halfway() {
        let schedule = WarmupCosine {
            peak_lr: 0.1,
            min_lr: 0.001,
            warmup_epochs: 0,
            total_epochs: 100,
        };
        let mid = schedule.get_lr(50);
        let expected = (0.1 + 0.001) / 2.0;
        assert!((mid - expected).abs() < 1e-3);
    }
}
