//! Agent checkpoints: network parameters, optimizer moments and the
//! sampling RNG, enough to resume with identical action choices.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use fuzzpilot_telemetry::MutationStrategy;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::buffer::TrajectoryBuffer;
use crate::encoder::STATE_DIM;
use crate::optim::Adam;
use crate::policy::PolicyModel;
use crate::ppo::{PpoAgent, PpoConfig};

pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported checkpoint version {found}")]
    UnsupportedVersion { found: u32 },

    #[error("checkpoint network shape {found:?} does not match configured {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("checkpoint is corrupt: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub model: PolicyModel,
    pub optimizer: Adam,
    pub rng: ChaCha8Rng,
    pub updates: u64,
}

impl Checkpoint {
    /// Write via a sibling temp file and rename, so an interrupted write
    /// leaves any previous checkpoint intact. The temp file is removed if
    /// any step fails.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec(self)?;
        let tmp = temp_path(path);
        let written = write_synced(&tmp, &json).and_then(|()| fs::rename(&tmp, path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = fs::read(path)?;
        let checkpoint: Checkpoint = serde_json::from_slice(&bytes)?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: checkpoint.version,
            });
        }
        Ok(checkpoint)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn expected_actor_shape(config: &PpoConfig) -> Vec<usize> {
    let mut shape = vec![STATE_DIM];
    shape.extend(&config.hidden_layers);
    shape.push(MutationStrategy::COUNT);
    shape
}

impl PpoAgent {
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            version: CHECKPOINT_VERSION,
            model: self.model.clone(),
            optimizer: self.optimizer.clone(),
            rng: self.rng.clone(),
            updates: self.updates,
        }
    }

    pub fn save_checkpoint(&self, path: &Path) -> Result<(), CheckpointError> {
        self.checkpoint().save(path)
    }

    /// Rebuild an agent from a checkpoint taken with the same network
    /// shape. The configured learning rate replaces the stored one; the
    /// buffer starts empty.
    pub fn from_checkpoint(config: PpoConfig, checkpoint: Checkpoint) -> Result<Self, CheckpointError> {
        if !checkpoint.model.is_well_formed() {
            return Err(CheckpointError::Corrupt(
                "network layers are inconsistent".to_string(),
            ));
        }
        let expected = expected_actor_shape(&config);
        let found = checkpoint.model.actor().shape();
        if found != expected {
            return Err(CheckpointError::ShapeMismatch { expected, found });
        }
        let mut critic_expected = expected.clone();
        if let Some(last) = critic_expected.last_mut() {
            *last = 1;
        }
        let critic_found = checkpoint.model.critic().shape();
        if critic_found != critic_expected {
            return Err(CheckpointError::ShapeMismatch {
                expected: critic_expected,
                found: critic_found,
            });
        }
        if !checkpoint.optimizer.is_well_formed()
            || checkpoint.optimizer.param_count() != checkpoint.model.param_count()
        {
            return Err(CheckpointError::Corrupt(
                "optimizer state does not match the network".to_string(),
            ));
        }

        let mut optimizer = checkpoint.optimizer;
        optimizer.learning_rate = config.learning_rate;
        Ok(Self {
            config,
            model: checkpoint.model,
            optimizer,
            buffer: TrajectoryBuffer::new(),
            rng: checkpoint.rng,
            updates: checkpoint.updates,
        })
    }

    pub fn load(config: PpoConfig, path: &Path) -> Result<Self, CheckpointError> {
        Self::from_checkpoint(config, Checkpoint::load(path)?)
    }
}
