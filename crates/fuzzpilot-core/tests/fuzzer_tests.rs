use std::fs;
use std::path::Path;

use fuzzpilot_core::config::FuzzerConfig;
use fuzzpilot_core::fuzzer::{read_stats, RESULTS_FILE, STRATEGY_FILE};
use fuzzpilot_core::{AflFuzzer, Fuzzer, TelemetryError};
use fuzzpilot_telemetry::MutationStrategy;

const STATS: &str = "\
start_time        : 1700000000
execs_per_sec     : 1234.50
corpus_count      : 210
corpus_found      : 180
pending_total     : 33
saved_crashes     : 4
bitmap_cvg        : 7.25%
";

fn fuzzer_in(output_dir: &Path) -> AflFuzzer {
    AflFuzzer::new(FuzzerConfig {
        output_dir: output_dir.to_path_buf(),
        ..Default::default()
    })
}

#[test]
fn test_stats_read_from_instance_dir_first() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("default")).unwrap();
    fs::write(dir.path().join("default/fuzzer_stats"), STATS).unwrap();
    fs::write(dir.path().join("fuzzer_stats"), "bitmap_cvg : 1.00%\n").unwrap();

    let snapshot = read_stats(dir.path(), 42).unwrap();
    assert_eq!(snapshot.coverage_rate, 7.25);
    assert_eq!(snapshot.crash_count, 4);
    assert_eq!(snapshot.queue_size, 210);
    assert_eq!(snapshot.unique_paths, 180);
    assert_eq!(snapshot.runtime, 42);
}

#[test]
fn test_stats_fall_back_to_run_dir() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("fuzzer_stats"), STATS).unwrap();
    assert_eq!(read_stats(dir.path(), 0).unwrap().pending_paths, 33);
}

#[test]
fn test_missing_stats_is_transient_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        read_stats(dir.path(), 0),
        Err(TelemetryError::StatsMissing { .. })
    ));
    fs::write(dir.path().join("fuzzer_stats"), "execs_per_sec : fast\n").unwrap();
    assert!(matches!(read_stats(dir.path(), 0), Err(TelemetryError::Stats(_))));
}

#[test]
fn test_setup_creates_mode_directory() {
    let out = tempfile::tempdir().unwrap();
    let mut fuzzer = fuzzer_in(out.path());
    let run_dir = fuzzer.setup("ppo").unwrap();

    assert!(run_dir.is_dir());
    assert!(run_dir.starts_with(out.path()));
    let name = run_dir.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("ppo_"), "{name}");
    assert!(name["ppo_".len()..].parse::<u64>().is_ok(), "{name}");
    assert_eq!(fuzzer.run_dir(), Some(run_dir.as_path()));
}

#[test]
fn test_apply_action_writes_strategy_file() {
    let out = tempfile::tempdir().unwrap();
    let mut fuzzer = fuzzer_in(out.path());
    let run_dir = fuzzer.setup("ppo").unwrap();

    fuzzer.apply_action(MutationStrategy::Splice);
    assert_eq!(fs::read_to_string(run_dir.join(STRATEGY_FILE)).unwrap(), "splice");
    fuzzer.apply_action(MutationStrategy::BitFlip);
    assert_eq!(fs::read_to_string(run_dir.join(STRATEGY_FILE)).unwrap(), "bitflip");
}

#[test]
fn test_export_results_counts_saved_inputs() {
    let out = tempfile::tempdir().unwrap();
    let mut fuzzer = fuzzer_in(out.path());
    let run_dir = fuzzer.setup("baseline").unwrap();
    let instance = run_dir.join("default");
    fs::create_dir_all(instance.join("crashes")).unwrap();
    fs::create_dir_all(instance.join("queue")).unwrap();
    fs::write(instance.join("fuzzer_stats"), STATS).unwrap();
    fs::write(instance.join("crashes/README.txt"), "").unwrap();
    fs::write(instance.join("crashes/id:000000,sig:11"), "").unwrap();
    for i in 0..3 {
        fs::write(instance.join(format!("queue/id:00000{i},orig:seed")), "").unwrap();
    }

    let summary = fuzzer.export_results().unwrap();
    assert_eq!(summary.total_crashes, 1);
    assert_eq!(summary.total_test_cases, 3);
    assert_eq!(summary.metrics.crash_count, 4);
    assert_eq!(summary.output_directory, run_dir);

    let written: serde_json::Value =
        serde_json::from_slice(&fs::read(run_dir.join(RESULTS_FILE)).unwrap()).unwrap();
    assert_eq!(written["total_test_cases"], 3);
}

#[tokio::test]
async fn test_spawn_failure_is_reported() {
    let out = tempfile::tempdir().unwrap();
    let mut fuzzer = AflFuzzer::new(FuzzerConfig {
        binary_path: out.path().join("no-such-afl-fuzz"),
        output_dir: out.path().to_path_buf(),
        ..Default::default()
    });
    fuzzer.setup("ppo").unwrap();
    assert!(fuzzer.start(Path::new("/bin/true")).is_err());
    assert!(!fuzzer.is_alive());
    fuzzer.stop().await;
}
