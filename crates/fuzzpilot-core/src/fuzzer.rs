//! The fuzzer collaborator: the trait the control loop drives, and the
//! AFL++ child-process implementation of it.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

use fuzzpilot_telemetry::stats::{parse_fuzzer_stats, StatsError};
use fuzzpilot_telemetry::{MutationStrategy, TelemetrySnapshot};
use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::FuzzerConfig;

/// File a custom mutator polls for the requested strategy.
pub const STRATEGY_FILE: &str = "mutation_strategy";
pub const RESULTS_FILE: &str = "results_summary.json";

/// Telemetry could not be read this tick. Always transient.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("fuzzer is not running")]
    NotRunning,

    #[error("stats file not written yet under {dir}")]
    StatsMissing { dir: PathBuf },

    #[error("cannot read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Stats(#[from] StatsError),
}

#[derive(Debug, thiserror::Error)]
pub enum FuzzerError {
    #[error("fuzzer output directory not set up")]
    NotSetUp,

    #[error("fuzzer already running")]
    AlreadyRunning,

    #[error("failed to spawn {binary}: {source}")]
    Spawn { binary: PathBuf, source: io::Error },

    #[error("fuzzer I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("results JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the control loop needs from a running fuzzer.
pub trait Fuzzer {
    fn is_alive(&mut self) -> bool;

    /// Latest published statistics; may be stale.
    fn read_statistics(&mut self) -> Result<TelemetrySnapshot, TelemetryError>;

    /// Best effort; no acknowledgment.
    fn apply_action(&mut self, strategy: MutationStrategy);
}

/// End-of-run summary written next to the fuzzer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsSummary {
    pub metrics: TelemetrySnapshot,
    pub total_crashes: usize,
    pub total_test_cases: usize,
    pub runtime: u64,
    pub output_directory: PathBuf,
}

/// AFL++ running as a child process.
pub struct AflFuzzer {
    config: FuzzerConfig,
    run_dir: Option<PathBuf>,
    child: Option<Child>,
    started: Option<Instant>,
}

impl AflFuzzer {
    pub fn new(config: FuzzerConfig) -> Self {
        Self {
            config,
            run_dir: None,
            child: None,
            started: None,
        }
    }

    /// Create `<output_dir>/<mode>_<unix-seconds>` and make it the run directory.
    pub fn setup(&mut self, mode: &str) -> Result<PathBuf, FuzzerError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let dir = self.config.output_dir.join(format!("{mode}_{timestamp}"));
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), mode, "fuzzer output directory ready");
        self.run_dir = Some(dir.clone());
        Ok(dir)
    }

    pub fn run_dir(&self) -> Option<&Path> {
        self.run_dir.as_deref()
    }

    /// Full `afl-fuzz` argument list for `target`.
    pub fn command_args(&self, target: &Path, run_dir: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-i".into(),
            self.config.input_dir.clone().into(),
            "-o".into(),
            run_dir.into(),
            "-t".into(),
            self.config.timeout_ms.to_string().into(),
            "-m".into(),
            self.config.memory_limit.clone().into(),
        ];
        if self.config.qemu_mode {
            args.push("-Q".into());
        }
        args.push("--".into());
        args.push(target.into());
        args.extend(self.config.target_args.iter().map(OsString::from));
        args
    }

    pub fn start(&mut self, target: &Path) -> Result<(), FuzzerError> {
        if self.child.is_some() {
            return Err(FuzzerError::AlreadyRunning);
        }
        let run_dir = self.run_dir.clone().ok_or(FuzzerError::NotSetUp)?;
        let binary = self.config.binary_path.clone();

        let mut cmd = Command::new(&binary);
        cmd.args(self.command_args(target, &run_dir))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|source| FuzzerError::Spawn { binary, source })?;
        info!(pid = child.id(), binary = %target.display(), "fuzzer started");
        self.child = Some(child);
        self.started = Some(Instant::now());
        Ok(())
    }

    /// Kill and reap the child. No-op when nothing is running.
    pub async fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill fuzzer");
        } else {
            info!("fuzzer stopped");
        }
    }

    pub fn runtime_secs(&self) -> u64 {
        self.started.map(|s| s.elapsed().as_secs()).unwrap_or(0)
    }

    /// Newer AFL++ writes per-instance output under `default/`.
    fn instance_dir(run_dir: &Path) -> PathBuf {
        let nested = run_dir.join("default");
        if nested.is_dir() {
            nested
        } else {
            run_dir.to_path_buf()
        }
    }

    /// Write `results_summary.json` into the run directory.
    pub fn export_results(&mut self) -> Result<ResultsSummary, FuzzerError> {
        let run_dir = self.run_dir.clone().ok_or(FuzzerError::NotSetUp)?;
        let metrics = match read_stats(&run_dir, self.runtime_secs()) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "no final statistics, exporting zeros");
                TelemetrySnapshot::default()
            }
        };
        let instance = Self::instance_dir(&run_dir);
        let summary = ResultsSummary {
            metrics,
            total_crashes: count_entries(&instance.join("crashes"))?,
            total_test_cases: count_entries(&instance.join("queue"))?,
            runtime: self.runtime_secs(),
            output_directory: run_dir.clone(),
        };
        let path = run_dir.join(RESULTS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&summary)?)?;
        info!(path = %path.display(), "results exported");
        Ok(summary)
    }
}

impl Fuzzer for AflFuzzer {
    fn is_alive(&mut self) -> bool {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(None)) => true,
            Some(Ok(Some(status))) => {
                debug!(%status, "fuzzer exited");
                false
            }
            Some(Err(e)) => {
                warn!(error = %e, "cannot poll fuzzer");
                false
            }
            None => false,
        }
    }

    fn read_statistics(&mut self) -> Result<TelemetrySnapshot, TelemetryError> {
        let run_dir = self.run_dir.as_deref().ok_or(TelemetryError::NotRunning)?;
        read_stats(run_dir, self.runtime_secs())
    }

    fn apply_action(&mut self, strategy: MutationStrategy) {
        let Some(run_dir) = self.run_dir.as_deref() else {
            return;
        };
        let path = run_dir.join(STRATEGY_FILE);
        match fs::write(&path, strategy.name()) {
            Ok(()) => debug!(strategy = strategy.name(), "mutation strategy applied"),
            Err(e) => warn!(error = %e, path = %path.display(), "cannot apply mutation strategy"),
        }
    }
}

/// Read `fuzzer_stats` from `default/` or the run directory itself.
pub fn read_stats(run_dir: &Path, runtime_secs: u64) -> Result<TelemetrySnapshot, TelemetryError> {
    let candidates = [
        run_dir.join("default").join("fuzzer_stats"),
        run_dir.join("fuzzer_stats"),
    ];
    for path in &candidates {
        match fs::read_to_string(path) {
            Ok(text) => return Ok(parse_fuzzer_stats(&text, runtime_secs)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(TelemetryError::Io {
                    path: path.clone(),
                    source,
                })
            }
        }
    }
    Err(TelemetryError::StatsMissing {
        dir: run_dir.to_path_buf(),
    })
}

/// AFL++ names saved inputs `id:...`; anything else (README.txt) is skipped.
fn count_entries(dir: &Path) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let mut count = 0;
    for entry in entries {
        if entry?.file_name().to_string_lossy().starts_with("id:") {
            count += 1;
        }
    }
    Ok(count)
}
