//! Actor-critic model: two independent MLPs over the same state vector.

pub mod mlp;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::encoder::{StateVector, STATE_DIM};
use mlp::Mlp;

#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("action distribution is not finite: {probabilities:?}")]
    NonFiniteDistribution { probabilities: Vec<f64> },

    #[error("value estimate is not finite: {value}")]
    NonFiniteValue { value: f64 },
}

/// Output of a forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyOutput {
    /// One probability per action; non-negative, sums to 1.
    pub probabilities: Vec<f64>,
    pub value: f64,
}

/// A sampled action with the quantities PPO needs later.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionSample {
    pub action: usize,
    pub log_prob: f64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyModel {
    actor: Mlp,
    critic: Mlp,
}

impl PolicyModel {
    pub fn new<R: Rng>(action_count: usize, hidden_layers: &[usize], rng: &mut R) -> Self {
        Self {
            actor: Mlp::new(STATE_DIM, hidden_layers, action_count, rng),
            critic: Mlp::new(STATE_DIM, hidden_layers, 1, rng),
        }
    }

    pub fn forward(&self, state: &StateVector) -> PolicyOutput {
        let logits = self.actor.forward(state.as_slice());
        let value = self.critic.forward(state.as_slice())[0];
        PolicyOutput {
            probabilities: softmax(&logits),
            value,
        }
    }

    /// Sample an action from the categorical distribution. Touches nothing
    /// but `rng`.
    pub fn select_action<R: Rng>(
        &self,
        state: &StateVector,
        rng: &mut R,
    ) -> Result<ActionSample, PolicyError> {
        let logits = self.actor.forward(state.as_slice());
        let log_probs = log_softmax(&logits);
        let probabilities: Vec<f64> = log_probs.iter().map(|lp| lp.exp()).collect();
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(PolicyError::NonFiniteDistribution { probabilities });
        }
        let value = self.critic.forward(state.as_slice())[0];
        if !value.is_finite() {
            return Err(PolicyError::NonFiniteValue { value });
        }

        // Weighted roll; the last action absorbs rounding slack.
        let mut roll: f64 = rng.gen::<f64>();
        let mut action = probabilities.len() - 1;
        for (idx, p) in probabilities.iter().enumerate() {
            roll -= p;
            if roll < 0.0 {
                action = idx;
                break;
            }
        }

        Ok(ActionSample {
            action,
            log_prob: log_probs[action],
            value,
        })
    }

    pub fn action_count(&self) -> usize {
        self.actor.shape().last().copied().unwrap_or(0)
    }

    pub fn actor(&self) -> &Mlp {
        &self.actor
    }

    pub fn critic(&self) -> &Mlp {
        &self.critic
    }

    /// Actor parameters followed by critic parameters.
    pub fn param_count(&self) -> usize {
        self.actor.param_count() + self.critic.param_count()
    }

    pub fn params(&self) -> impl Iterator<Item = &f64> + '_ {
        self.actor.params().chain(self.critic.params())
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.actor.params_mut().chain(self.critic.params_mut())
    }

    pub fn is_well_formed(&self) -> bool {
        self.actor.is_well_formed()
            && self.critic.is_well_formed()
            && self.actor.shape().first() == Some(&STATE_DIM)
            && self.critic.shape().first() == Some(&STATE_DIM)
            && self.critic.shape().last() == Some(&1)
    }
}

pub fn log_softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let log_sum = logits.iter().map(|z| (z - max).exp()).sum::<f64>().ln() + max;
    logits.iter().map(|z| z - log_sum).collect()
}

pub fn softmax(logits: &[f64]) -> Vec<f64> {
    log_softmax(logits).into_iter().map(f64::exp).collect()
}

/// Shannon entropy (nats) of a distribution given its log-probabilities.
pub fn entropy(log_probs: &[f64]) -> f64 {
    -log_probs.iter().map(|lp| lp.exp() * lp).sum::<f64>()
}
