//! Run analytics and baseline-vs-PPO comparison.
//!
//! Summaries are computed from the per-tick records of one run; the
//! comparison expresses PPO results as percentage change over baseline.

use serde::{Deserialize, Serialize};

use crate::metrics::TickRecord;

/// Denominator floors, so an empty baseline does not divide by zero.
const COVERAGE_FLOOR: f64 = 0.01;
const COUNT_FLOOR: f64 = 1.0;

/// End-of-run figures for one campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Coverage percentage at the last tick.
    pub final_coverage: f64,
    pub total_crashes: u64,
    pub avg_exec_speed: f64,
    pub max_exec_speed: f64,
    pub total_paths: u64,
    pub runtime_hours: f64,
    /// Mean reward over ticks after the first.
    pub mean_reward: f64,
    /// Ticks on which a policy update ran.
    pub updates: usize,
    pub ticks: usize,
}

impl RunSummary {
    /// `None` for a run that recorded nothing.
    pub fn from_records(records: &[TickRecord]) -> Option<Self> {
        let last = records.last()?;
        let n = records.len() as f64;

        let avg_exec_speed = records.iter().map(|r| r.telemetry.exec_speed).sum::<f64>() / n;
        let max_exec_speed = records
            .iter()
            .map(|r| r.telemetry.exec_speed)
            .fold(0.0, f64::max);
        let scored = &records[1..];
        let mean_reward = if scored.is_empty() {
            0.0
        } else {
            scored.iter().map(|r| r.reward).sum::<f64>() / scored.len() as f64
        };

        Some(Self {
            final_coverage: last.telemetry.coverage_rate,
            total_crashes: last.telemetry.crash_count,
            avg_exec_speed,
            max_exec_speed,
            total_paths: last.telemetry.unique_paths,
            runtime_hours: last.time_hours,
            mean_reward,
            updates: records.iter().filter(|r| r.loss.is_some()).count(),
            ticks: records.len(),
        })
    }
}

/// Percentage change of PPO over baseline per headline metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub coverage_increase_pct: f64,
    pub crash_increase_pct: f64,
    pub speed_increase_pct: f64,
    pub path_increase_pct: f64,
}

impl Comparison {
    pub fn between(baseline: &RunSummary, ppo: &RunSummary) -> Self {
        Self {
            coverage_increase_pct: pct_change(
                baseline.final_coverage,
                ppo.final_coverage,
                COVERAGE_FLOOR,
            ),
            crash_increase_pct: pct_change(
                baseline.total_crashes as f64,
                ppo.total_crashes as f64,
                COUNT_FLOOR,
            ),
            speed_increase_pct: pct_change(baseline.avg_exec_speed, ppo.avg_exec_speed, COUNT_FLOOR),
            path_increase_pct: pct_change(
                baseline.total_paths as f64,
                ppo.total_paths as f64,
                COUNT_FLOOR,
            ),
        }
    }
}

fn pct_change(baseline: f64, candidate: f64, floor: f64) -> f64 {
    (candidate - baseline) / baseline.max(floor) * 100.0
}

/// Everything a comparison run produces, as written to `comparison.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub baseline: Option<RunSummary>,
    pub ppo: Option<RunSummary>,
    pub improvement: Option<Comparison>,
}

impl ComparisonReport {
    pub fn new(baseline: &[TickRecord], ppo: &[TickRecord]) -> Self {
        let baseline = RunSummary::from_records(baseline);
        let ppo = RunSummary::from_records(ppo);
        let improvement = match (&baseline, &ppo) {
            (Some(b), Some(p)) => Some(Comparison::between(b, p)),
            _ => None,
        };
        Self {
            baseline,
            ppo,
            improvement,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pct_change_floors_denominator() {
        assert_eq!(pct_change(0.0, 0.5, COVERAGE_FLOOR), 5000.0);
        assert_eq!(pct_change(0.0, 3.0, COUNT_FLOOR), 300.0);
        assert_eq!(pct_change(10.0, 15.0, COUNT_FLOOR), 50.0);
        assert_eq!(pct_change(10.0, 5.0, COUNT_FLOOR), -50.0);
    }

    #[test]
    fn test_empty_run_has_no_summary() {
        assert!(RunSummary::from_records(&[]).is_none());
        let report = ComparisonReport::new(&[], &[]);
        assert!(report.improvement.is_none());
    }
}
