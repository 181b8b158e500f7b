//! Adam optimizer and global gradient-norm clipping over flat parameter
//! vectors.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    /// Number of steps taken so far (bias correction).
    step: u64,
    first_moment: Vec<f64>,
    second_moment: Vec<f64>,
}

impl Adam {
    pub fn new(learning_rate: f64, param_count: usize) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            first_moment: vec![0.0; param_count],
            second_moment: vec![0.0; param_count],
        }
    }

    /// Apply one update. `params` must yield exactly `grads.len()` values in
    /// the same order as the gradients.
    pub fn step<'p>(&mut self, params: impl Iterator<Item = &'p mut f64>, grads: &[f64]) {
        debug_assert_eq!(grads.len(), self.first_moment.len());
        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step as i32);

        for (((param, grad), m), v) in params
            .zip(grads)
            .zip(self.first_moment.iter_mut())
            .zip(self.second_moment.iter_mut())
        {
            *m = self.beta1 * *m + (1.0 - self.beta1) * grad;
            *v = self.beta2 * *v + (1.0 - self.beta2) * grad * grad;
            let m_hat = *m / bias1;
            let v_hat = *v / bias2;
            *param -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
        }
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    pub fn param_count(&self) -> usize {
        self.first_moment.len()
    }

    pub fn is_well_formed(&self) -> bool {
        self.first_moment.len() == self.second_moment.len()
    }
}

pub fn grad_norm(grads: &[f64]) -> f64 {
    grads.iter().map(|g| g * g).sum::<f64>().sqrt()
}

/// Scale `grads` in place so their L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_grad_norm(grads: &mut [f64], max_norm: f64) -> f64 {
    let norm = grad_norm(grads);
    let coef = max_norm / (norm + 1e-6);
    if coef < 1.0 {
        for g in grads.iter_mut() {
            *g *= coef;
        }
    }
    norm
}
