//! Clipped-surrogate policy optimization over the trajectory buffer.
//!
//! Each update drains the buffer, computes discounted returns and
//! standardized advantages, then runs `epochs` full-batch gradient steps on
//! `actor_loss + 0.5 * critic_loss - entropy_coefficient * entropy`.

use fuzzpilot_telemetry::MutationStrategy;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::buffer::{TrajectoryBuffer, Transition};
use crate::encoder::StateVector;
use crate::optim::{clip_grad_norm, Adam};
use crate::policy::{entropy, log_softmax, ActionSample, PolicyError, PolicyModel};
use crate::rng::{stream_rng, INIT_STREAM, SAMPLE_STREAM};

/// Added to the advantage standard deviation.
const ADVANTAGE_EPS: f64 = 1e-8;

#[derive(Debug, thiserror::Error)]
pub enum TrainingError {
    #[error("loss is not finite in epoch {epoch}: {loss}")]
    NonFiniteLoss { epoch: u32, loss: f64 },

    #[error("gradient norm is not finite in epoch {epoch}")]
    NonFiniteGradient { epoch: u32 },

    #[error("transition {index} has action {action}, but the policy has {action_count} actions")]
    InvalidAction {
        index: usize,
        action: usize,
        action_count: usize,
    },
}

/// Learner hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpoConfig {
    pub learning_rate: f64,
    /// Discount factor.
    pub gamma: f64,
    /// Ratio clip range: `[1 - epsilon_clip, 1 + epsilon_clip]`.
    pub epsilon_clip: f64,
    pub epochs: u32,
    pub entropy_coefficient: f64,
    /// Minimum buffered transitions before a regular update runs.
    pub batch_size: usize,
    pub max_grad_norm: f64,
    pub hidden_layers: Vec<usize>,
    pub seed: u64,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            epsilon_clip: 0.2,
            epochs: 4,
            entropy_coefficient: 0.01,
            batch_size: 32,
            max_grad_norm: 0.5,
            hidden_layers: vec![64, 64],
            seed: 42,
        }
    }
}

/// Discounted returns, computed back to front and reset at `done`.
pub fn discounted_returns(transitions: &[Transition], gamma: f64) -> Vec<f64> {
    let mut returns = vec![0.0; transitions.len()];
    let mut running = 0.0;
    for (idx, t) in transitions.iter().enumerate().rev() {
        if t.done {
            running = 0.0;
        }
        running = t.reward + gamma * running;
        returns[idx] = running;
    }
    returns
}

/// Shift to zero mean and scale by the sample standard deviation.
///
/// Fewer than two values have no spread and standardize to zeros.
pub fn standardize(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std = variance.sqrt();
    values.iter().map(|v| (v - mean) / (std + ADVANTAGE_EPS)).collect()
}

/// The learning agent: model, optimizer, buffer and sampling RNG.
pub struct PpoAgent {
    pub(crate) config: PpoConfig,
    pub(crate) model: PolicyModel,
    pub(crate) optimizer: Adam,
    pub(crate) buffer: TrajectoryBuffer,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) updates: u64,
}

impl PpoAgent {
    pub fn new(config: PpoConfig) -> Self {
        let mut init_rng = stream_rng(config.seed, INIT_STREAM);
        let model = PolicyModel::new(
            MutationStrategy::COUNT,
            &config.hidden_layers,
            &mut init_rng,
        );
        let optimizer = Adam::new(config.learning_rate, model.param_count());
        let rng = stream_rng(config.seed, SAMPLE_STREAM);
        Self {
            config,
            model,
            optimizer,
            buffer: TrajectoryBuffer::new(),
            rng,
            updates: 0,
        }
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    pub fn model(&self) -> &PolicyModel {
        &self.model
    }

    pub fn buffer(&self) -> &TrajectoryBuffer {
        &self.buffer
    }

    /// Number of completed updates.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn select_action(&mut self, state: &StateVector) -> Result<ActionSample, PolicyError> {
        self.model.select_action(state, &mut self.rng)
    }

    pub fn store_transition(&mut self, transition: Transition) {
        self.buffer.append(transition);
    }

    /// Run an update if at least `batch_size` transitions are buffered.
    ///
    /// Returns the mean loss over the epochs, or 0.0 without touching the
    /// buffer or the model when the batch is too small.
    pub fn update(&mut self) -> Result<f64, TrainingError> {
        if self.buffer.len() < self.config.batch_size {
            debug!(
                buffered = self.buffer.len(),
                batch_size = self.config.batch_size,
                "update skipped: batch not full"
            );
            return Ok(0.0);
        }
        self.run_update()
    }

    /// Update on whatever is buffered, ignoring `batch_size`. Used when a
    /// campaign ends so pending experience is not discarded.
    pub fn flush(&mut self) -> Result<f64, TrainingError> {
        if self.buffer.is_empty() {
            return Ok(0.0);
        }
        self.run_update()
    }

    /// On failure the model, optimizer and buffer are left exactly as they
    /// were before the call.
    fn run_update(&mut self) -> Result<f64, TrainingError> {
        let transitions = self.buffer.drain();
        let model_before = self.model.clone();
        let optimizer_before = self.optimizer.clone();

        match optimize(&mut self.model, &mut self.optimizer, &self.config, &transitions) {
            Ok(loss) => {
                self.updates += 1;
                info!(
                    update = self.updates,
                    transitions = transitions.len(),
                    loss,
                    "policy updated"
                );
                Ok(loss)
            }
            Err(e) => {
                self.model = model_before;
                self.optimizer = optimizer_before;
                self.buffer.restore(transitions);
                Err(e)
            }
        }
    }
}

/// Loss components of one full-batch evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct LossParts {
    total: f64,
    actor: f64,
    critic: f64,
    entropy: f64,
    /// Transitions whose clipped branch was active.
    clipped: usize,
}

/// Evaluate the PPO loss under the current model and write its gradient
/// (actor parameters first, then critic) into `grads`.
fn surrogate_loss(
    model: &PolicyModel,
    config: &PpoConfig,
    transitions: &[Transition],
    returns: &[f64],
    advantages: &[f64],
    grads: &mut [f64],
) -> LossParts {
    let n = transitions.len() as f64;
    let low = 1.0 - config.epsilon_clip;
    let high = 1.0 + config.epsilon_clip;
    let c_ent = config.entropy_coefficient;

    grads.iter_mut().for_each(|g| *g = 0.0);
    let (actor_grads, critic_grads) = grads.split_at_mut(model.actor().param_count());
    let mut parts = LossParts::default();

    for ((t, &advantage), &ret) in transitions.iter().zip(advantages).zip(returns) {
        let state = t.state.as_slice();

        let actor_trace = model.actor().forward_traced(state);
        let log_probs = log_softmax(actor_trace.output());
        let h = entropy(&log_probs);
        let ratio = (log_probs[t.action] - t.log_prob).exp();
        let surr1 = ratio * advantage;
        let surr2 = ratio.clamp(low, high) * advantage;
        if surr2 < surr1 {
            parts.clipped += 1;
        }
        parts.actor -= surr1.min(surr2) / n;
        parts.entropy += h / n;

        // Only the unclipped branch carries gradient through the ratio.
        let d_objective = if surr1 <= surr2 { advantage } else { 0.0 };
        let d_log_prob = -d_objective * ratio / n;
        let d_logits: Vec<f64> = log_probs
            .iter()
            .enumerate()
            .map(|(j, &lp)| {
                let p = lp.exp();
                let indicator = if j == t.action { 1.0 } else { 0.0 };
                d_log_prob * (indicator - p) + c_ent / n * p * (lp + h)
            })
            .collect();
        model.actor().backward(&actor_trace, &d_logits, actor_grads);

        let critic_trace = model.critic().forward_traced(state);
        let error = critic_trace.output()[0] - ret;
        parts.critic += error * error / n;
        model.critic().backward(&critic_trace, &[error / n], critic_grads);
    }

    parts.total = parts.actor + 0.5 * parts.critic - c_ent * parts.entropy;
    parts
}

fn optimize(
    model: &mut PolicyModel,
    optimizer: &mut Adam,
    config: &PpoConfig,
    transitions: &[Transition],
) -> Result<f64, TrainingError> {
    let action_count = model.action_count();
    if let Some((index, t)) = transitions
        .iter()
        .enumerate()
        .find(|(_, t)| t.action >= action_count)
    {
        return Err(TrainingError::InvalidAction {
            index,
            action: t.action,
            action_count,
        });
    }

    let returns = discounted_returns(transitions, config.gamma);
    let raw_advantages: Vec<f64> = returns
        .iter()
        .zip(transitions)
        .map(|(r, t)| r - t.value)
        .collect();
    let advantages = standardize(&raw_advantages);

    let mut grads = vec![0.0; model.param_count()];
    let mut total_loss = 0.0;

    for epoch in 0..config.epochs {
        let parts = surrogate_loss(model, config, transitions, &returns, &advantages, &mut grads);
        if !parts.total.is_finite() {
            return Err(TrainingError::NonFiniteLoss {
                epoch,
                loss: parts.total,
            });
        }
        let norm = clip_grad_norm(&mut grads, config.max_grad_norm);
        if !norm.is_finite() {
            return Err(TrainingError::NonFiniteGradient { epoch });
        }
        optimizer.step(model.params_mut(), &grads);

        debug!(
            epoch,
            loss = parts.total,
            actor_loss = parts.actor,
            critic_loss = parts.critic,
            entropy = parts.entropy,
            grad_norm = norm,
            clipped = parts.clipped,
            "ppo epoch"
        );
        total_loss += parts.total;
    }

    Ok(total_loss / config.epochs.max(1) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::STATE_DIM;

    fn t(reward: f64, done: bool) -> Transition {
        Transition {
            state: StateVector([0.0; STATE_DIM]),
            action: 0,
            reward,
            log_prob: 0.0,
            value: 0.0,
            done,
        }
    }

    #[test]
    fn test_returns_reset_at_terminal() {
        let transitions = vec![t(1.0, false), t(1.0, false), t(1.0, true)];
        assert_eq!(discounted_returns(&transitions, 0.5), vec![1.75, 1.5, 1.0]);
    }

    #[test]
    fn test_returns_do_not_leak_across_episodes() {
        // Terminal in the middle: the first episode ends at index 1.
        let transitions = vec![t(1.0, false), t(2.0, true), t(4.0, false)];
        let returns = discounted_returns(&transitions, 0.5);
        assert_eq!(returns, vec![2.0, 2.0, 4.0]);
    }

    #[test]
    fn test_returns_match_recursive_definition() {
        let rewards = [0.3, -1.0, 2.5, 0.0, 1.2, 0.7];
        let dones = [false, true, false, false, true, false];
        let transitions: Vec<Transition> = rewards
            .iter()
            .zip(dones)
            .map(|(&r, d)| t(r, d))
            .collect();
        let gamma = 0.9;
        let returns = discounted_returns(&transitions, gamma);

        for i in 0..transitions.len() {
            // A done flag at i cuts i off from everything after it.
            let future = if transitions[i].done || i + 1 == transitions.len() {
                0.0
            } else {
                returns[i + 1]
            };
            let expected = rewards[i] + gamma * future;
            assert!((returns[i] - expected).abs() < 1e-12, "index {i}");
        }
    }

    #[test]
    fn test_standardize_mean_zero_std_one() {
        let values = [3.0, -1.0, 4.0, 1.5, 9.0, -2.6];
        let z = standardize(&values);
        let mean = z.iter().sum::<f64>() / z.len() as f64;
        let var = z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (z.len() - 1) as f64;
        assert!(mean.abs() < 1e-12);
        assert!((var.sqrt() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_standardize_degenerate_inputs() {
        assert_eq!(standardize(&[]), Vec::<f64>::new());
        assert_eq!(standardize(&[5.0]), vec![0.0]);
        assert!(standardize(&[2.0, 2.0, 2.0]).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_default_config_values() {
        let config = PpoConfig::default();
        assert_eq!(config.gamma, 0.99);
        assert_eq!(config.epsilon_clip, 0.2);
        assert_eq!(config.max_grad_norm, 0.5);
    }

    /// Analytic gradient of the full loss against central differences, with
    /// ratios placed well inside and well outside the clip range.
    #[test]
    fn test_loss_gradient_matches_finite_differences() {
        let config = PpoConfig {
            hidden_layers: vec![6],
            entropy_coefficient: 0.05,
            ..Default::default()
        };
        let mut model = PolicyModel::new(5, &config.hidden_layers, &mut stream_rng(9, INIT_STREAM));

        let states = [
            [0.5, 0.1, 1.2, 0.3, 0.02],
            [2.0, 0.0, 0.4, 0.9, 0.10],
            [0.1, 0.3, 2.2, 0.1, 0.05],
            [1.1, 0.2, 0.9, 0.5, 0.07],
        ];
        // Offsets from the current log-prob: +0.05 keeps the ratio inside
        // the clip range, -0.5 pushes it outside.
        let offsets = [0.05, -0.5, 0.05, -0.5];
        let transitions: Vec<Transition> = states
            .iter()
            .zip(offsets)
            .enumerate()
            .map(|(i, (s, offset))| {
                let state = StateVector(*s);
                let action = i % 5;
                let out = model.forward(&state);
                Transition {
                    state,
                    action,
                    reward: i as f64 - 1.0,
                    log_prob: out.probabilities[action].ln() + offset,
                    value: 0.1 * i as f64,
                    done: i == 3,
                }
            })
            .collect();
        let returns = discounted_returns(&transitions, config.gamma);
        let raw: Vec<f64> = returns.iter().zip(&transitions).map(|(r, t)| r - t.value).collect();
        let advantages = standardize(&raw);

        let mut grads = vec![0.0; model.param_count()];
        surrogate_loss(&model, &config, &transitions, &returns, &advantages, &mut grads);

        let mut scratch = vec![0.0; model.param_count()];
        let h = 1e-6;
        for idx in 0..model.param_count() {
            let original = *model.params().nth(idx).unwrap();
            *model.params_mut().nth(idx).unwrap() = original + h;
            let up = surrogate_loss(&model, &config, &transitions, &returns, &advantages, &mut scratch).total;
            *model.params_mut().nth(idx).unwrap() = original - h;
            let down = surrogate_loss(&model, &config, &transitions, &returns, &advantages, &mut scratch).total;
            *model.params_mut().nth(idx).unwrap() = original;

            let numeric = (up - down) / (2.0 * h);
            assert!(
                (numeric - grads[idx]).abs() < 1e-5,
                "param {idx}: analytic {} vs numeric {numeric}",
                grads[idx]
            );
        }
    }
}
