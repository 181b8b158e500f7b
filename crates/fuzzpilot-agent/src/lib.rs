pub mod buffer;
pub mod checkpoint;
pub mod encoder;
pub mod optim;
pub mod policy;
pub mod ppo;
pub mod reward;
pub mod rng;

pub use buffer::{TrajectoryBuffer, Transition};
pub use checkpoint::{Checkpoint, CheckpointError, CHECKPOINT_VERSION};
pub use encoder::{encode, StateVector, STATE_DIM};
pub use policy::{ActionSample, PolicyError, PolicyModel, PolicyOutput};
pub use ppo::{PpoAgent, PpoConfig, TrainingError};
pub use reward::{Feedback, FeedbackTracker, RewardWeights};
