use fuzzpilot_core::analytics::{Comparison, ComparisonReport, RunSummary};
use fuzzpilot_core::TickRecord;
use fuzzpilot_telemetry::{MutationStrategy, TelemetrySnapshot};

fn record(tick: u64, coverage: f64, crashes: u64, speed: f64, paths: u64, reward: f64) -> TickRecord {
    let elapsed_secs = 60.0 * tick as f64;
    TickRecord {
        tick,
        elapsed_secs,
        time_hours: elapsed_secs / 3600.0,
        telemetry: TelemetrySnapshot {
            coverage_rate: coverage,
            crash_count: crashes,
            exec_speed: speed,
            queue_size: paths,
            unique_paths: paths,
            pending_paths: 0,
            runtime: elapsed_secs as u64,
        },
        reward,
        advisory_penalty: 0.0,
        interesting: true,
        action: (tick > 1).then_some(MutationStrategy::Havoc),
        loss: (tick % 2 == 0).then_some(0.5),
    }
}

fn run(final_coverage: f64, crashes: u64, speed: f64, paths: u64) -> Vec<TickRecord> {
    vec![
        record(1, 1.0, 0, speed / 2.0, 10, 0.0),
        record(2, final_coverage / 2.0, crashes / 2, speed, paths / 2, 2.0),
        record(3, final_coverage, crashes, speed * 1.5, paths, 4.0),
    ]
}

#[test]
fn test_summary_from_records() {
    let summary = RunSummary::from_records(&run(8.0, 4, 1000.0, 300)).unwrap();
    assert_eq!(summary.final_coverage, 8.0);
    assert_eq!(summary.total_crashes, 4);
    assert_eq!(summary.total_paths, 300);
    assert_eq!(summary.avg_exec_speed, 1000.0);
    assert_eq!(summary.max_exec_speed, 1500.0);
    assert_eq!(summary.runtime_hours, 0.05);
    // The first tick carries no reward and is excluded.
    assert_eq!(summary.mean_reward, 3.0);
    assert_eq!(summary.updates, 1);
    assert_eq!(summary.ticks, 3);
}

#[test]
fn test_comparison_percentages() {
    let baseline = RunSummary::from_records(&run(8.0, 4, 1000.0, 300)).unwrap();
    let ppo = RunSummary::from_records(&run(10.0, 6, 900.0, 450)).unwrap();
    let c = Comparison::between(&baseline, &ppo);
    assert!((c.coverage_increase_pct - 25.0).abs() < 1e-9);
    assert!((c.crash_increase_pct - 50.0).abs() < 1e-9);
    assert!((c.speed_increase_pct + 10.0).abs() < 1e-9);
    assert!((c.path_increase_pct - 50.0).abs() < 1e-9);
}

#[test]
fn test_zero_baseline_uses_floors() {
    let baseline = RunSummary::from_records(&run(0.0, 0, 1000.0, 0)).unwrap();
    let ppo = RunSummary::from_records(&run(0.5, 2, 1000.0, 10)).unwrap();
    let c = Comparison::between(&baseline, &ppo);
    assert!((c.coverage_increase_pct - 5000.0).abs() < 1e-6);
    assert!((c.crash_increase_pct - 200.0).abs() < 1e-9);
    assert!((c.path_increase_pct - 1000.0).abs() < 1e-9);
}

#[test]
fn test_report_requires_both_runs() {
    let report = ComparisonReport::new(&run(8.0, 4, 1000.0, 300), &[]);
    assert!(report.baseline.is_some());
    assert!(report.ppo.is_none());
    assert!(report.improvement.is_none());

    let report = ComparisonReport::new(&run(8.0, 4, 1000.0, 300), &run(9.0, 4, 1000.0, 300));
    assert!(report.improvement.is_some());
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["improvement"]["coverage_increase_pct"].is_number());
}
