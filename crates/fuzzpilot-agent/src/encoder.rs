//! Telemetry -> fixed-size state vector.
//!
//! The same scales are used when selecting actions and when re-evaluating
//! buffered states during an update, so they live here as constants rather
//! than in configuration.

use fuzzpilot_telemetry::TelemetrySnapshot;
use serde::{Deserialize, Serialize};

/// Number of features in a state vector.
pub const STATE_DIM: usize = 5;

pub const CRASH_SCALE: f64 = 100.0;
pub const SPEED_SCALE: f64 = 1000.0;
pub const QUEUE_SCALE: f64 = 1000.0;
pub const PATH_SCALE: f64 = 10_000.0;

/// `[coverage_rate, crashes/100, execs/1000, queue/1000, paths/10000]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StateVector(pub [f64; STATE_DIM]);

impl StateVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|x| x.is_finite())
    }
}

/// Encode a snapshot. Total: negative or non-finite inputs become 0.
pub fn encode(snapshot: &TelemetrySnapshot) -> StateVector {
    StateVector([
        non_negative(snapshot.coverage_rate),
        snapshot.crash_count as f64 / CRASH_SCALE,
        non_negative(snapshot.exec_speed) / SPEED_SCALE,
        snapshot.queue_size as f64 / QUEUE_SCALE,
        snapshot.unique_paths as f64 / PATH_SCALE,
    ])
}

fn non_negative(x: f64) -> f64 {
    if x.is_finite() && x > 0.0 {
        x
    } else {
        0.0
    }
}
