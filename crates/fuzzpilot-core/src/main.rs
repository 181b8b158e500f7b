// src/main.rs
//
// Command-line front end: loads the config, launches AFL++ and runs the
// baseline and/or PPO campaigns. All of the real logic lives in the lib.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fuzzpilot_agent::PpoAgent;
use fuzzpilot_core::analytics::ComparisonReport;
use fuzzpilot_core::campaign::LoopSettings;
use fuzzpilot_core::metrics::TeeSink;
use fuzzpilot_core::{
    AflFuzzer, Campaign, CampaignOutcome, JsonlSink, MemorySink, MetricsSink, NoopSink,
    PilotConfig, StopReason, TickRecord,
};

/// Pause between the baseline and PPO runs of a comparison.
const COMPARISON_PAUSE: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// AFL++ alone.
    Baseline,
    /// AFL++ steered by the PPO agent.
    Ppo,
    /// Baseline, then PPO, then a comparison report.
    Comparison,
}

/// Run AFL++ campaigns with and without a learned mutation-strategy policy.
#[derive(Parser, Debug)]
#[command(name = "fuzzpilot")]
struct Cli {
    /// Target binary to fuzz.
    target: PathBuf,

    /// Campaign duration in seconds (overrides the config).
    #[arg(long)]
    duration: Option<u64>,

    #[arg(long, value_enum, default_value_t = Mode::Comparison)]
    mode: Mode,

    /// JSON configuration file.
    #[arg(long, default_value = "fuzzpilot.json")]
    config: PathBuf,

    /// Resume the agent from this checkpoint.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, stopping campaign"),
        Err(e) => {
            warn!(error = %e, "cannot listen for interrupts");
            std::future::pending::<()>().await
        }
    }
}

/// JSONL metrics file, or nothing if it cannot be created.
fn build_file_sink(path: &Path) -> Box<dyn MetricsSink> {
    match JsonlSink::create(path) {
        Ok(sink) => Box::new(sink),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "metrics file unavailable, not persisting metrics");
            Box::new(NoopSink)
        }
    }
}

/// One campaign in its own AFL++ output directory.
async fn run_campaign(
    config: &PilotConfig,
    target: &Path,
    mode: &str,
    agent: Option<&mut PpoAgent>,
) -> Result<(Vec<TickRecord>, CampaignOutcome)> {
    let mut fuzzer = AflFuzzer::new(config.fuzzer.clone());
    let run_dir = fuzzer.setup(mode).context("setting up fuzzer output")?;
    fuzzer.start(target).context("starting fuzzer")?;

    let metrics_path = if config.campaign.metrics_path.is_absolute() {
        config.campaign.metrics_path.clone()
    } else {
        run_dir.join(&config.campaign.metrics_path)
    };
    let sink = TeeSink::new(MemorySink::new(), build_file_sink(&metrics_path));
    let checkpoint_path = agent
        .is_some()
        .then(|| config.resolve_output_path(&config.campaign.checkpoint_path));
    let settings = LoopSettings {
        duration: config.campaign.duration(),
        sample_interval: config.campaign.sample_interval(),
        update_interval: config.ppo.update_interval,
        checkpoint_path,
    };

    let mut campaign = Campaign::new(settings, &mut fuzzer, agent, config.reward_weights(), sink);
    let result = campaign.run(shutdown_signal()).await;
    let (memory, _) = campaign.into_sink().into_parts();

    fuzzer.stop().await;
    if let Err(e) = fuzzer.export_results() {
        warn!(error = %e, "failed to export results");
    }

    let outcome = result.with_context(|| format!("{mode} campaign failed"))?;
    Ok((memory.into_records(), outcome))
}

async fn run(cli: Cli) -> Result<u8> {
    let mut config = PilotConfig::load(&cli.config)
        .with_context(|| format!("loading config {}", cli.config.display()))?;
    if let Some(duration) = cli.duration {
        config.campaign.duration_secs = duration;
        config.validate()?;
    }
    fs::create_dir_all(&config.fuzzer.output_dir).with_context(|| {
        format!("creating output directory {}", config.fuzzer.output_dir.display())
    })?;

    let mut exit_code = 0u8;
    let mut baseline_records = Vec::new();

    if matches!(cli.mode, Mode::Baseline | Mode::Comparison) {
        let (records, outcome) = run_campaign(&config, &cli.target, "baseline", None).await?;
        exit_code = exit_code.max(outcome.exit_code() as u8);
        baseline_records = records;
        if outcome.reason == StopReason::Interrupted {
            return Ok(exit_code);
        }
    }
    if cli.mode == Mode::Comparison {
        tokio::time::sleep(COMPARISON_PAUSE).await;
    }
    if matches!(cli.mode, Mode::Ppo | Mode::Comparison) {
        let ppo_config = config.ppo_config();
        let mut agent = match &cli.resume {
            Some(path) => PpoAgent::load(ppo_config, path)
                .with_context(|| format!("resuming from {}", path.display()))?,
            None => PpoAgent::new(ppo_config),
        };
        let (records, outcome) = run_campaign(&config, &cli.target, "ppo", Some(&mut agent)).await?;
        exit_code = exit_code.max(outcome.exit_code() as u8);

        if cli.mode == Mode::Comparison {
            let report = ComparisonReport::new(&baseline_records, &records);
            let path = config.fuzzer.output_dir.join("comparison.json");
            fs::write(&path, serde_json::to_vec_pretty(&report)?)
                .with_context(|| format!("writing {}", path.display()))?;
            if let Some(improvement) = &report.improvement {
                info!(
                    coverage_pct = improvement.coverage_increase_pct,
                    crashes_pct = improvement.crash_increase_pct,
                    speed_pct = improvement.speed_increase_pct,
                    paths_pct = improvement.path_increase_pct,
                    "ppo vs baseline"
                );
            }
            info!(path = %path.display(), "comparison written");
        }
    }
    Ok(exit_code)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if !cli.target.exists() {
        error!(path = %cli.target.display(), "target binary not found");
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}
