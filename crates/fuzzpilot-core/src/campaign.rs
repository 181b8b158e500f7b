//! The campaign control loop.
//!
//! A single task samples fuzzer telemetry on a fixed wall-clock interval.
//! With an agent attached, every tick after the first encodes the snapshot,
//! picks a mutation strategy, hands it to the fuzzer and buffers a
//! transition; every `update_interval` transitions an update is attempted.
//! Without an agent (baseline) the loop only records telemetry.
//!
//! Lifecycle: Idle -> Running -> (Updating -> Running)* -> Stopped. On
//! stop, pending transitions are flushed into one last update and the agent
//! is checkpointed. A training failure stops the campaign immediately and
//! leaves any earlier checkpoint untouched.
//!
//! Each tick's record reaches the sink when the next tick is read, or at
//! stop. The final update's loss is attached to the last record.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fuzzpilot_agent::checkpoint::CheckpointError;
use fuzzpilot_agent::{
    encode, Feedback, FeedbackTracker, PolicyError, PpoAgent, RewardWeights, TrainingError, Transition,
};
use fuzzpilot_telemetry::{MutationStrategy, TelemetrySnapshot};
use serde::{Deserialize, Serialize};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::fuzzer::Fuzzer;
use crate::metrics::{MetricsSink, TickRecord};

#[derive(Debug, thiserror::Error)]
pub enum CampaignError {
    #[error("fuzzer is not running at campaign start")]
    FuzzerNotAlive,

    #[error("policy failed at tick {tick}: {source}")]
    Policy { tick: u64, source: PolicyError },

    #[error("policy chose action {action} at tick {tick}, which maps to no strategy")]
    UnknownAction { tick: u64, action: usize },

    #[error("training failed at tick {tick}: {source}")]
    Training { tick: u64, source: TrainingError },

    #[error("checkpoint write to {path} failed at tick {tick}: {source}")]
    Checkpoint {
        tick: u64,
        path: PathBuf,
        source: CheckpointError,
    },
}

/// Campaign lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CampaignPhase {
    Idle,
    Running,
    Updating,
    Stopped,
}

/// Why the loop left Running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    DurationElapsed,
    Interrupted,
    /// The fuzzer process went away before the duration elapsed.
    FuzzerExited,
}

/// Timing and persistence for one campaign.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub duration: Duration,
    pub sample_interval: Duration,
    /// Transitions between update attempts.
    pub update_interval: u32,
    /// Where the agent is saved on a clean stop. `None` skips persistence.
    pub checkpoint_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignOutcome {
    pub reason: StopReason,
    /// Sampling ticks, including skipped ones.
    pub ticks: u64,
    /// Ticks whose telemetry could not be read.
    pub skipped: u64,
    pub transitions: u64,
    pub updates: u64,
    pub last_loss: Option<f64>,
    pub checkpoint: Option<PathBuf>,
}

impl CampaignOutcome {
    /// Non-zero when the fuzzer exited on its own.
    pub fn exit_code(&self) -> i32 {
        match self.reason {
            StopReason::FuzzerExited => 1,
            StopReason::DurationElapsed | StopReason::Interrupted => 0,
        }
    }
}

/// One campaign over a fuzzer, optionally steered by an agent.
pub struct Campaign<'a, F: Fuzzer + ?Sized, S: MetricsSink> {
    settings: LoopSettings,
    fuzzer: &'a mut F,
    agent: Option<&'a mut PpoAgent>,
    tracker: FeedbackTracker,
    sink: S,
    phase: CampaignPhase,
    tick: u64,
    skipped: u64,
    transitions: u64,
    updates: u64,
    update_counter: u32,
    last_loss: Option<f64>,
    /// Most recent record, not yet handed to the sink.
    held: Option<TickRecord>,
}

impl<'a, F: Fuzzer + ?Sized, S: MetricsSink> Campaign<'a, F, S> {
    pub fn new(
        settings: LoopSettings,
        fuzzer: &'a mut F,
        agent: Option<&'a mut PpoAgent>,
        weights: RewardWeights,
        sink: S,
    ) -> Self {
        Self {
            settings,
            fuzzer,
            agent,
            tracker: FeedbackTracker::new(weights),
            sink,
            phase: CampaignPhase::Idle,
            tick: 0,
            skipped: 0,
            transitions: 0,
            updates: 0,
            update_counter: 0,
            last_loss: None,
            held: None,
        }
    }

    /// Baseline campaign: telemetry only, no actions.
    pub fn baseline(
        settings: LoopSettings,
        fuzzer: &'a mut F,
        weights: RewardWeights,
        sink: S,
    ) -> Self {
        Self::new(settings, fuzzer, None, weights, sink)
    }

    pub fn phase(&self) -> CampaignPhase {
        self.phase
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Drive the loop until the duration elapses, `shutdown` resolves or
    /// the fuzzer exits.
    pub async fn run(
        &mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<CampaignOutcome, CampaignError> {
        if !self.fuzzer.is_alive() {
            return Err(CampaignError::FuzzerNotAlive);
        }
        self.phase = CampaignPhase::Running;
        let mode = if self.agent.is_some() { "ppo" } else { "baseline" };
        info!(
            mode,
            duration_secs = self.settings.duration.as_secs(),
            sample_interval_secs = self.settings.sample_interval.as_secs(),
            "campaign started"
        );

        let start = Instant::now();
        let mut ticker = interval_at(
            start + self.settings.sample_interval,
            self.settings.sample_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        let reason = loop {
            if start.elapsed() >= self.settings.duration {
                break StopReason::DurationElapsed;
            }
            tokio::select! {
                biased;
                _ = &mut shutdown => break StopReason::Interrupted,
                _ = ticker.tick() => {}
            }
            if !self.fuzzer.is_alive() {
                warn!(tick = self.tick, "fuzzer exited unexpectedly");
                break StopReason::FuzzerExited;
            }
            if let Err(e) = self.step(start.elapsed()) {
                self.phase = CampaignPhase::Stopped;
                self.flush_sink();
                return Err(e);
            }
        };

        self.phase = CampaignPhase::Stopped;
        let flushed = self.final_update();
        self.flush_sink();
        flushed?;
        let checkpoint = self.save_agent()?;
        info!(
            ?reason,
            ticks = self.tick,
            skipped = self.skipped,
            transitions = self.transitions,
            updates = self.updates,
            "campaign stopped"
        );
        Ok(CampaignOutcome {
            reason,
            ticks: self.tick,
            skipped: self.skipped,
            transitions: self.transitions,
            updates: self.updates,
            last_loss: self.last_loss,
            checkpoint,
        })
    }

    /// One sampling tick at `elapsed` since start.
    fn step(&mut self, elapsed: Duration) -> Result<(), CampaignError> {
        self.tick += 1;
        let tick = self.tick;

        let snapshot = match self.fuzzer.read_statistics() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.skipped += 1;
                warn!(tick, error = %e, "telemetry unavailable, tick skipped");
                return Ok(());
            }
        };
        let feedback = self.tracker.observe(&snapshot);
        let done = elapsed >= self.settings.duration;

        let mut action = None;
        let mut loss = None;
        if !feedback.first_observation {
            if let Some(agent) = self.agent.as_deref_mut() {
                let state = encode(&snapshot);
                let sample = agent
                    .select_action(&state)
                    .map_err(|source| CampaignError::Policy { tick, source })?;
                let strategy = MutationStrategy::from_action(sample.action).ok_or(
                    CampaignError::UnknownAction {
                        tick,
                        action: sample.action,
                    },
                )?;
                self.fuzzer.apply_action(strategy);
                agent.store_transition(Transition {
                    state,
                    action: sample.action,
                    reward: feedback.reward,
                    log_prob: sample.log_prob,
                    value: sample.value,
                    done,
                });
                self.transitions += 1;
                action = Some(strategy);

                self.update_counter += 1;
                if self.update_counter >= self.settings.update_interval {
                    self.update_counter = 0;
                    self.phase = CampaignPhase::Updating;
                    let before = agent.updates();
                    let result = agent.update();
                    self.phase = CampaignPhase::Running;
                    let value = result.map_err(|source| CampaignError::Training { tick, source })?;
                    if agent.updates() > before {
                        self.updates += 1;
                        self.last_loss = Some(value);
                        loss = Some(value);
                    }
                }
            }
        }

        if feedback.advisory_penalty != 0.0 {
            debug!(tick, penalty = feedback.advisory_penalty, "coverage and paths stagnant");
        }
        info!(
            tick,
            coverage = snapshot.coverage_rate,
            crashes = snapshot.crash_count,
            exec_speed = snapshot.exec_speed,
            reward = feedback.reward,
            action = action.map(MutationStrategy::name),
            "tick"
        );
        self.record(tick, elapsed, snapshot, &feedback, action, loss);
        Ok(())
    }

    fn record(
        &mut self,
        tick: u64,
        elapsed: Duration,
        telemetry: TelemetrySnapshot,
        feedback: &Feedback,
        action: Option<MutationStrategy>,
        loss: Option<f64>,
    ) {
        let elapsed_secs = elapsed.as_secs_f64();
        let record = TickRecord {
            tick,
            elapsed_secs,
            time_hours: elapsed_secs / 3600.0,
            telemetry,
            reward: feedback.reward,
            advisory_penalty: feedback.advisory_penalty,
            interesting: feedback.interesting,
            action,
            loss,
        };
        if let Some(previous) = self.held.replace(record) {
            self.emit(&previous);
        }
    }

    fn emit(&mut self, record: &TickRecord) {
        if let Err(e) = self.sink.record(record) {
            warn!(tick = record.tick, error = %e, "failed to record metrics");
        }
    }

    /// Hand over the held record, then flush the sink.
    fn flush_sink(&mut self) {
        if let Some(record) = self.held.take() {
            self.emit(&record);
        }
        if let Err(e) = self.sink.flush() {
            warn!(error = %e, "failed to flush metrics");
        }
    }

    /// Train on whatever is still buffered, ignoring `batch_size`.
    fn final_update(&mut self) -> Result<(), CampaignError> {
        let tick = self.tick;
        let Some(agent) = self.agent.as_deref_mut() else {
            return Ok(());
        };
        if agent.buffer().is_empty() {
            return Ok(());
        }
        let pending = agent.buffer().len();
        let loss = agent
            .flush()
            .map_err(|source| CampaignError::Training { tick, source })?;
        info!(pending, loss, "final update");
        self.updates += 1;
        self.last_loss = Some(loss);
        if let Some(record) = self.held.as_mut() {
            record.loss = Some(loss);
        }
        Ok(())
    }

    /// Returns the checkpoint path if one was written.
    fn save_agent(&self) -> Result<Option<PathBuf>, CampaignError> {
        let (Some(agent), Some(path)) =
            (self.agent.as_deref(), self.settings.checkpoint_path.as_ref())
        else {
            return Ok(None);
        };
        save_checkpoint(agent, path, self.tick)?;
        Ok(Some(path.clone()))
    }
}

fn save_checkpoint(agent: &PpoAgent, path: &Path, tick: u64) -> Result<(), CampaignError> {
    agent
        .save_checkpoint(path)
        .map_err(|source| CampaignError::Checkpoint {
            tick,
            path: path.to_path_buf(),
            source,
        })?;
    info!(path = %path.display(), updates = agent.updates(), "checkpoint saved");
    Ok(())
}
