//! Reward shaping from consecutive telemetry snapshots.
//!
//! The training reward is a weighted sum of four progress terms. A separate
//! stagnation penalty is computed for monitoring only and is never folded
//! into the training reward.

use fuzzpilot_telemetry::TelemetrySnapshot;
use serde::{Deserialize, Serialize};

use crate::encoder::SPEED_SCALE;

/// Divisor applied to the path delta.
pub const PATH_DELTA_SCALE: f64 = 100.0;

/// Advisory penalty when neither coverage nor paths moved.
pub const STAGNATION_PENALTY: f64 = -0.1;

/// Weights of the four reward terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RewardWeights {
    pub coverage_increase: f64,
    pub unique_crash: f64,
    pub execution_speed: f64,
    pub path_diversity: f64,
}

impl Default for RewardWeights {
    fn default() -> Self {
        Self {
            coverage_increase: 1.0,
            unique_crash: 10.0,
            execution_speed: 0.1,
            path_diversity: 0.5,
        }
    }
}

impl RewardWeights {
    pub fn is_finite(&self) -> bool {
        self.coverage_increase.is_finite()
            && self.unique_crash.is_finite()
            && self.execution_speed.is_finite()
            && self.path_diversity.is_finite()
    }
}

/// Weighted reward terms, kept apart for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RewardBreakdown {
    pub coverage: f64,
    pub crashes: f64,
    pub speed: f64,
    pub paths: f64,
}

impl RewardBreakdown {
    pub fn total(&self) -> f64 {
        self.coverage + self.crashes + self.speed + self.paths
    }
}

pub fn reward_terms(
    weights: &RewardWeights,
    prev: &TelemetrySnapshot,
    curr: &TelemetrySnapshot,
) -> RewardBreakdown {
    let coverage_delta = curr.coverage_rate - prev.coverage_rate;
    let crash_delta = curr.crash_count as f64 - prev.crash_count as f64;
    let speed_term = curr.exec_speed / SPEED_SCALE;
    let path_delta = (curr.unique_paths as f64 - prev.unique_paths as f64) / PATH_DELTA_SCALE;

    RewardBreakdown {
        coverage: weights.coverage_increase * coverage_delta,
        crashes: weights.unique_crash * crash_delta,
        speed: weights.execution_speed * speed_term,
        paths: weights.path_diversity * path_delta,
    }
}

/// Training reward for the transition `prev -> curr`.
pub fn reward(weights: &RewardWeights, prev: &TelemetrySnapshot, curr: &TelemetrySnapshot) -> f64 {
    reward_terms(weights, prev, curr).total()
}

/// [`STAGNATION_PENALTY`] if coverage and paths are exactly unchanged, else 0.
pub fn stagnation_penalty(prev: &TelemetrySnapshot, curr: &TelemetrySnapshot) -> f64 {
    if curr.coverage_rate == prev.coverage_rate && curr.unique_paths == prev.unique_paths {
        STAGNATION_PENALTY
    } else {
        0.0
    }
}

/// Result of observing one snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feedback {
    /// Weighted training reward; 0.0 on the first observation.
    pub reward: f64,
    /// Monitoring-only stagnation signal.
    pub advisory_penalty: f64,
    pub first_observation: bool,
    /// Coverage, crashes or paths grew since the previous observation.
    pub interesting: bool,
}

/// Owns the previous snapshot and scores each new one against it.
#[derive(Debug, Clone)]
pub struct FeedbackTracker {
    weights: RewardWeights,
    previous: Option<TelemetrySnapshot>,
}

impl FeedbackTracker {
    pub fn new(weights: RewardWeights) -> Self {
        Self {
            weights,
            previous: None,
        }
    }

    pub fn observe(&mut self, curr: &TelemetrySnapshot) -> Feedback {
        let feedback = match &self.previous {
            None => Feedback {
                reward: 0.0,
                advisory_penalty: 0.0,
                first_observation: true,
                interesting: false,
            },
            Some(prev) => Feedback {
                reward: reward(&self.weights, prev, curr),
                advisory_penalty: stagnation_penalty(prev, curr),
                first_observation: false,
                interesting: curr.progressed_since(prev),
            },
        };
        self.previous = Some(curr.clone());
        feedback
    }

    pub fn previous(&self) -> Option<&TelemetrySnapshot> {
        self.previous.as_ref()
    }

    pub fn weights(&self) -> &RewardWeights {
        &self.weights
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(coverage: f64, crashes: u64, speed: f64, paths: u64) -> TelemetrySnapshot {
        TelemetrySnapshot {
            coverage_rate: coverage,
            crash_count: crashes,
            exec_speed: speed,
            unique_paths: paths,
            ..Default::default()
        }
    }

    #[test]
    fn test_weighted_sum() {
        let weights = RewardWeights::default();
        let prev = snap(10.0, 1, 500.0, 100);
        let curr = snap(12.0, 2, 1000.0, 300);
        // 1.0*2 + 10*1 + 0.1*1.0 + 0.5*2.0
        let r = reward(&weights, &prev, &curr);
        assert!((r - 13.1).abs() < 1e-9, "got {r}");
    }

    #[test]
    fn test_coverage_increase_scales_with_weight() {
        let weights = RewardWeights {
            coverage_increase: 1.0,
            ..Default::default()
        };
        let prev = snap(10.0, 0, 0.0, 50);
        let flat = snap(10.0, 0, 0.0, 50);
        let up = snap(15.0, 0, 0.0, 50);
        let diff = reward(&weights, &prev, &up) - reward(&weights, &prev, &flat);
        assert_eq!(diff, 5.0 * weights.coverage_increase);
    }

    #[test]
    fn test_crash_count_regression_gives_negative_term() {
        let weights = RewardWeights::default();
        let terms = reward_terms(&weights, &snap(0.0, 4, 0.0, 0), &snap(0.0, 3, 0.0, 0));
        assert_eq!(terms.crashes, -10.0);
    }

    #[test]
    fn test_stagnation_penalty_is_separate() {
        let weights = RewardWeights::default();
        let prev = snap(10.0, 0, 1000.0, 100);
        let curr = snap(10.0, 0, 1000.0, 100);
        assert_eq!(stagnation_penalty(&prev, &curr), STAGNATION_PENALTY);
        // Training reward only sees the speed term.
        assert!((reward(&weights, &prev, &curr) - 0.1).abs() < 1e-12);

        let moved = snap(10.5, 0, 1000.0, 100);
        assert_eq!(stagnation_penalty(&prev, &moved), 0.0);
    }

    #[test]
    fn test_tracker_first_observation_is_zero() {
        let mut tracker = FeedbackTracker::new(RewardWeights::default());
        let fb = tracker.observe(&snap(50.0, 9, 3000.0, 900));
        assert!(fb.first_observation);
        assert_eq!(fb.reward, 0.0);
        assert_eq!(fb.advisory_penalty, 0.0);
        assert!(!fb.interesting);

        let fb = tracker.observe(&snap(51.0, 9, 3000.0, 900));
        assert!(!fb.first_observation);
        assert!(fb.reward > 0.0);
        assert!(fb.interesting);
    }

    #[test]
    fn test_tracker_reset_forgets_previous() {
        let mut tracker = FeedbackTracker::new(RewardWeights::default());
        tracker.observe(&snap(1.0, 0, 0.0, 0));
        tracker.reset();
        assert!(tracker.previous().is_none());
        assert!(tracker.observe(&snap(2.0, 0, 0.0, 0)).first_observation);
    }

    #[test]
    fn test_weights_reject_unknown_fields() {
        let json = r#"{"coverage_increase":1,"unique_crash":1,"execution_speed":1,"path_diversity":1,"bogus":2}"#;
        assert!(serde_json::from_str::<RewardWeights>(json).is_err());
    }
}
