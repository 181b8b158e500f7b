use serde::{Deserialize, Serialize};

/// Point-in-time summary of fuzzer progress.
///
/// Captured once per sampling tick and never mutated afterwards. Missing
/// fields deserialize to zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySnapshot {
    /// Bitmap coverage percentage (0-100).
    pub coverage_rate: f64,
    /// Unique crashes saved so far.
    pub crash_count: u64,
    /// Executions per second.
    pub exec_speed: f64,
    /// Test cases in the queue.
    pub queue_size: u64,
    /// Paths discovered by the fuzzer itself (not imported).
    pub unique_paths: u64,
    /// Queue entries not yet fuzzed.
    pub pending_paths: u64,
    /// Seconds since the fuzzer process started.
    pub runtime: u64,
}

impl TelemetrySnapshot {
    /// True if coverage, crashes or paths grew relative to `prev`.
    pub fn progressed_since(&self, prev: &TelemetrySnapshot) -> bool {
        self.coverage_rate > prev.coverage_rate
            || self.crash_count > prev.crash_count
            || self.unique_paths > prev.unique_paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_zero() {
        let snap: TelemetrySnapshot =
            serde_json::from_str(r#"{ "coverage_rate": 12.5 }"#).unwrap();
        assert_eq!(snap.coverage_rate, 12.5);
        assert_eq!(snap.crash_count, 0);
        assert_eq!(snap.exec_speed, 0.0);
        assert_eq!(snap.runtime, 0);
    }

    #[test]
    fn test_progress_detection() {
        let prev = TelemetrySnapshot {
            coverage_rate: 10.0,
            crash_count: 1,
            unique_paths: 40,
            ..Default::default()
        };
        let same = prev.clone();
        assert!(!same.progressed_since(&prev));

        let more_paths = TelemetrySnapshot {
            unique_paths: 41,
            ..prev.clone()
        };
        assert!(more_paths.progressed_since(&prev));

        let new_crash = TelemetrySnapshot {
            crash_count: 2,
            ..prev.clone()
        };
        assert!(new_crash.progressed_since(&prev));
    }
}
