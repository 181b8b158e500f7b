//! Fully-connected network with a manual backward pass.
//!
//! Hidden layers use ReLU; the last layer is linear. Parameters are laid out
//! flat as `[W0, b0, W1, b1, ...]` with each `W` row-major
//! `[fan_out][fan_in]`, and gradients use the same layout.

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Linear {
    pub fan_in: usize,
    pub fan_out: usize,
    pub weights: Vec<f64>,
    pub biases: Vec<f64>,
}

impl Linear {
    /// Uniform init in `±1/sqrt(fan_in)` for weights and biases.
    pub fn new<R: Rng>(fan_in: usize, fan_out: usize, rng: &mut R) -> Self {
        let bound = 1.0 / (fan_in.max(1) as f64).sqrt();
        let weights = (0..fan_in * fan_out)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let biases = (0..fan_out).map(|_| rng.gen_range(-bound..bound)).collect();
        Self {
            fan_in,
            fan_out,
            weights,
            biases,
        }
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        (0..self.fan_out)
            .map(|o| {
                let row = &self.weights[o * self.fan_in..(o + 1) * self.fan_in];
                self.biases[o] + row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>()
            })
            .collect()
    }

    pub fn param_count(&self) -> usize {
        self.weights.len() + self.biases.len()
    }

    fn is_well_formed(&self) -> bool {
        self.fan_in > 0
            && self.fan_out > 0
            && self.weights.len() == self.fan_in * self.fan_out
            && self.biases.len() == self.fan_out
    }
}

/// Intermediate values kept by [`Mlp::forward_traced`].
#[derive(Debug, Clone)]
pub struct MlpTrace {
    /// Input fed to each layer.
    inputs: Vec<Vec<f64>>,
    /// Pre-activation output of each layer.
    pre_activations: Vec<Vec<f64>>,
}

impl MlpTrace {
    /// Raw output of the last layer.
    pub fn output(&self) -> &[f64] {
        self.pre_activations.last().map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mlp {
    layers: Vec<Linear>,
}

impl Mlp {
    pub fn new<R: Rng>(input_dim: usize, hidden: &[usize], output_dim: usize, rng: &mut R) -> Self {
        let mut layers = Vec::with_capacity(hidden.len() + 1);
        let mut prev = input_dim;
        for &width in hidden {
            layers.push(Linear::new(prev, width, rng));
            prev = width;
        }
        layers.push(Linear::new(prev, output_dim, rng));
        Self { layers }
    }

    pub fn forward(&self, input: &[f64]) -> Vec<f64> {
        let last = self.layers.len() - 1;
        let mut x = input.to_vec();
        for (idx, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x);
            if idx < last {
                relu_in_place(&mut x);
            }
        }
        x
    }

    pub fn forward_traced(&self, input: &[f64]) -> MlpTrace {
        let last = self.layers.len() - 1;
        let mut inputs = Vec::with_capacity(self.layers.len());
        let mut pre_activations = Vec::with_capacity(self.layers.len());
        let mut x = input.to_vec();
        for (idx, layer) in self.layers.iter().enumerate() {
            let z = layer.forward(&x);
            inputs.push(x);
            x = z.clone();
            if idx < last {
                relu_in_place(&mut x);
            }
            pre_activations.push(z);
        }
        MlpTrace {
            inputs,
            pre_activations,
        }
    }

    /// Accumulate `d(loss)/d(params)` into `grads` given `d(loss)/d(output)`.
    pub fn backward(&self, trace: &MlpTrace, d_output: &[f64], grads: &mut [f64]) {
        debug_assert_eq!(grads.len(), self.param_count());

        let mut offsets = Vec::with_capacity(self.layers.len());
        let mut offset = 0;
        for layer in &self.layers {
            offsets.push(offset);
            offset += layer.param_count();
        }

        let mut delta = d_output.to_vec();
        for idx in (0..self.layers.len()).rev() {
            let layer = &self.layers[idx];
            let input = &trace.inputs[idx];
            let base = offsets[idx];
            let (w_grad, rest) = grads[base..].split_at_mut(layer.weights.len());
            let b_grad = &mut rest[..layer.fan_out];

            for o in 0..layer.fan_out {
                let d = delta[o];
                b_grad[o] += d;
                let row = &mut w_grad[o * layer.fan_in..(o + 1) * layer.fan_in];
                for (g, x) in row.iter_mut().zip(input) {
                    *g += d * x;
                }
            }

            if idx == 0 {
                break;
            }

            let prev_pre = &trace.pre_activations[idx - 1];
            let mut prev_delta = vec![0.0; layer.fan_in];
            for o in 0..layer.fan_out {
                let d = delta[o];
                let row = &layer.weights[o * layer.fan_in..(o + 1) * layer.fan_in];
                for (pd, w) in prev_delta.iter_mut().zip(row) {
                    *pd += w * d;
                }
            }
            for (pd, z) in prev_delta.iter_mut().zip(prev_pre) {
                if *z <= 0.0 {
                    *pd = 0.0;
                }
            }
            delta = prev_delta;
        }
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Linear::param_count).sum()
    }

    pub fn params(&self) -> impl Iterator<Item = &f64> + '_ {
        self.layers
            .iter()
            .flat_map(|l| l.weights.iter().chain(l.biases.iter()))
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.layers
            .iter_mut()
            .flat_map(|l| l.weights.iter_mut().chain(l.biases.iter_mut()))
    }

    /// `[input_dim, hidden..., output_dim]`.
    pub fn shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.layers.len() + 1);
        if let Some(first) = self.layers.first() {
            shape.push(first.fan_in);
        }
        shape.extend(self.layers.iter().map(|l| l.fan_out));
        shape
    }

    /// Layers chain and every parameter vector has the right length.
    pub fn is_well_formed(&self) -> bool {
        !self.layers.is_empty()
            && self.layers.iter().all(Linear::is_well_formed)
            && self.layers.windows(2).all(|w| w[0].fan_out == w[1].fan_in)
    }
}

fn relu_in_place(x: &mut [f64]) {
    for v in x.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
}
