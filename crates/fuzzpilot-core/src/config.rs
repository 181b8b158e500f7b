//! Run configuration, loaded once at startup and validated before anything
//! touches the fuzzer.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fuzzpilot_agent::{PpoConfig, RewardWeights};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PilotConfig {
    pub ppo: PpoSection,
    #[serde(default)]
    pub fuzzer: FuzzerConfig,
    #[serde(default)]
    pub campaign: CampaignConfig,
}

/// Learner hyperparameters and reward weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PpoSection {
    pub learning_rate: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_epsilon_clip")]
    pub epsilon_clip: f64,
    pub epochs: u32,
    pub entropy_coefficient: f64,
    pub batch_size: usize,
    /// Transitions between regular update attempts.
    pub update_interval: u32,
    pub hidden_layers: Vec<usize>,
    #[serde(default = "default_max_grad_norm")]
    pub max_grad_norm: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    pub reward_weights: RewardWeights,
}

fn default_gamma() -> f64 {
    0.99
}

fn default_epsilon_clip() -> f64 {
    0.2
}

fn default_max_grad_norm() -> f64 {
    0.5
}

fn default_seed() -> u64 {
    42
}

/// How to launch AFL++.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuzzerConfig {
    pub binary_path: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Per-execution timeout passed as `-t`.
    pub timeout_ms: u64,
    /// Passed verbatim as `-m`.
    pub memory_limit: String,
    pub qemu_mode: bool,
    /// Arguments after the target; `@@` is replaced by AFL++ with the input path.
    pub target_args: Vec<String>,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("afl-fuzz"),
            input_dir: PathBuf::from("./seeds"),
            output_dir: PathBuf::from("./out"),
            timeout_ms: 1000,
            memory_limit: "none".to_string(),
            qemu_mode: false,
            target_args: vec!["@@".to_string()],
        }
    }
}

/// Campaign timing and artifact locations. Relative paths are resolved
/// against the fuzzer output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CampaignConfig {
    pub duration_secs: u64,
    pub sample_interval_secs: u64,
    pub checkpoint_path: PathBuf,
    pub metrics_path: PathBuf,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            duration_secs: 3600,
            sample_interval_secs: 60,
            checkpoint_path: PathBuf::from("ppo_model.json"),
            metrics_path: PathBuf::from("metrics.jsonl"),
        }
    }
}

impl CampaignConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs(self.sample_interval_secs)
    }
}

impl PilotConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: PilotConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ppo = &self.ppo;
        check(
            ppo.learning_rate.is_finite() && ppo.learning_rate > 0.0,
            "ppo.learning_rate",
            || format!("must be finite and positive, got {}", ppo.learning_rate),
        )?;
        check((0.0..=1.0).contains(&ppo.gamma), "ppo.gamma", || {
            format!("must be within [0, 1], got {}", ppo.gamma)
        })?;
        check(
            ppo.epsilon_clip > 0.0 && ppo.epsilon_clip < 1.0,
            "ppo.epsilon_clip",
            || format!("must be within (0, 1), got {}", ppo.epsilon_clip),
        )?;
        check(ppo.epochs >= 1, "ppo.epochs", || "must be at least 1".into())?;
        check(ppo.batch_size >= 1, "ppo.batch_size", || {
            "must be at least 1".into()
        })?;
        check(ppo.update_interval >= 1, "ppo.update_interval", || {
            "must be at least 1".into()
        })?;
        check(
            !ppo.hidden_layers.is_empty() && ppo.hidden_layers.iter().all(|w| *w >= 1),
            "ppo.hidden_layers",
            || format!("needs at least one layer of width >= 1, got {:?}", ppo.hidden_layers),
        )?;
        check(
            ppo.entropy_coefficient.is_finite() && ppo.entropy_coefficient >= 0.0,
            "ppo.entropy_coefficient",
            || format!("must be finite and non-negative, got {}", ppo.entropy_coefficient),
        )?;
        check(
            ppo.max_grad_norm.is_finite() && ppo.max_grad_norm > 0.0,
            "ppo.max_grad_norm",
            || format!("must be finite and positive, got {}", ppo.max_grad_norm),
        )?;
        let w = &ppo.reward_weights;
        check(
            w.is_finite()
                && [w.coverage_increase, w.unique_crash, w.execution_speed, w.path_diversity]
                    .iter()
                    .all(|v| *v >= 0.0),
            "ppo.reward_weights",
            || format!("must be finite and non-negative, got {w:?}"),
        )?;
        check(
            self.campaign.sample_interval_secs >= 1,
            "campaign.sample_interval_secs",
            || "must be at least 1".into(),
        )?;
        check(self.campaign.duration_secs >= 1, "campaign.duration_secs", || {
            "must be at least 1".into()
        })?;
        Ok(())
    }

    pub fn ppo_config(&self) -> PpoConfig {
        let ppo = &self.ppo;
        PpoConfig {
            learning_rate: ppo.learning_rate,
            gamma: ppo.gamma,
            epsilon_clip: ppo.epsilon_clip,
            epochs: ppo.epochs,
            entropy_coefficient: ppo.entropy_coefficient,
            batch_size: ppo.batch_size,
            max_grad_norm: ppo.max_grad_norm,
            hidden_layers: ppo.hidden_layers.clone(),
            seed: ppo.seed,
        }
    }

    pub fn reward_weights(&self) -> RewardWeights {
        self.ppo.reward_weights
    }

    /// `path` as-is if absolute, otherwise under the fuzzer output directory.
    pub fn resolve_output_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.fuzzer.output_dir.join(path)
        }
    }
}

fn check(
    ok: bool,
    field: &'static str,
    reason: impl FnOnce() -> String,
) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            field,
            reason: reason(),
        })
    }
}
