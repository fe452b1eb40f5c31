//! Multi-layer perceptron base estimator.
//!
//! `fc0 → act → fc1 → act → … → fcN`. The last layer has no activation, so
//! the output is raw logits (classification) or raw predictions (regression).

use candle_core::{Result, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

use snapens_common::{Activation, MlpConfig};

use crate::architecture::Architecture;

/// Feed-forward network built from an [`MlpConfig`].
pub struct Mlp {
    layers: Vec<Linear>,
    activation: Activation,
}

impl Mlp {
    pub fn new(config: &MlpConfig, vb: VarBuilder) -> Result<Self> {
        let layers = config
            .layer_dims()
            .into_iter()
            .enumerate()
            .map(|(i, (d_in, d_out))| linear(d_in, d_out, vb.pp(format!("fc{i}"))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            layers,
            activation: config.activation,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }
}

fn activate(activation: Activation, xs: &Tensor) -> Result<Tensor> {
    match activation {
        Activation::Relu => xs.relu(),
        Activation::Tanh => xs.tanh(),
        Activation::Gelu => xs.gelu(),
        Activation::Silu => xs.silu(),
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let last = self.layers.len().saturating_sub(1);
        let mut x = xs.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x)?;
            if i < last {
                x = activate(self.activation, &x)?;
            }
        }
        Ok(x)
    }
}

impl Architecture for MlpConfig {
    type Model = Mlp;

    fn name(&self) -> String {
        "Mlp".to_string()
    }

    fn build(&self, vb: VarBuilder) -> Result<Mlp> {
        Mlp::new(self, vb)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
