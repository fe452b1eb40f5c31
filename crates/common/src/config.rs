//! Base estimator configuration.
//!
//! Serialised as JSON next to every saved ensemble. Every optional field has
//! a default so a minimal `{"input_size": 4, "output_size": 3}` is enough.

use serde::{Deserialize, Serialize};

/// Multi-layer perceptron used as the snapshot ensemble's base estimator.
///
/// Layers are named `fc0 .. fcN` so parameter names are stable across
/// snapshots and safetensors files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Number of input features per row.
    pub input_size: usize,
    /// Number of outputs: classes for classification, target width for regression.
    pub output_size: usize,
    /// Widths of the hidden layers, input side first. Empty = linear model.
    #[serde(default = "default_hidden_sizes")]
    pub hidden_sizes: Vec<usize>,
    /// Non-linearity applied after every hidden layer.
    #[serde(default)]
    pub activation: Activation,
}

fn default_hidden_sizes() -> Vec<usize> {
    vec![64]
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            input_size: 4,
            output_size: 2,
            hidden_sizes: default_hidden_sizes(),
            activation: Activation::default(),
        }
    }
}

impl MlpConfig {
    /// `(in, out)` dimensions of every linear layer, input side first.
    pub fn layer_dims(&self) -> Vec<(usize, usize)> {
        let mut dims = Vec::with_capacity(self.hidden_sizes.len() + 1);
        let mut prev = self.input_size;
        for &h in &self.hidden_sizes {
            dims.push((prev, h));
            prev = h;
        }
        dims.push((prev, self.output_size));
        dims
    }

    /// Total number of trainable scalars (weights + biases).
    pub fn num_params(&self) -> usize {
        self.layer_dims().iter().map(|(i, o)| i * o + o).sum()
    }

    /// Save config to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load config from a JSON file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }
}

/// Hidden-layer activation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Gelu,
    Silu,
}

impl Activation {
    pub fn from_str(s: &str) -> Self {
        match s {
            "tanh" => Self::Tanh,
            "gelu" => Self::Gelu,
            "silu" => Self::Silu,
            _ => Self::Relu,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
