//! Optimiser selection.
//!
//! Candle's `Optimizer` trait is not object safe (it has an associated
//! config type and a `new` constructor), so the supported strategies are an
//! enum over the concrete optimisers.

use std::str::FromStr;

use candle_core::backprop::GradStore;
use candle_core::Var;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};

use snapens_core::{EnsembleError, Result};

/// Named optimisation strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Plain stochastic gradient descent.
    Sgd,
    /// Adam (AdamW with decoupled weight decay disabled).
    #[default]
    Adam,
    AdamW,
}

impl FromStr for OptimizerKind {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::Sgd),
            "adam" => Ok(Self::Adam),
            "adamw" => Ok(Self::AdamW),
            other => Err(EnsembleError::config(format!(
                "unknown optimizer {other:?}; expected one of sgd, adam, adamw"
            ))),
        }
    }
}

/// Keyword configuration shared by all strategies. Fields a strategy does
/// not use are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerOptions {
    #[serde(default = "default_lr")]
    pub lr: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
}

fn default_lr() -> f64 {
    1e-3
}
fn default_beta1() -> f64 {
    0.9
}
fn default_beta2() -> f64 {
    0.999
}
fn default_eps() -> f64 {
    1e-8
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            lr: default_lr(),
            weight_decay: 0.0,
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
        }
    }
}

/// A constructed optimiser over one model's variables.
pub enum EnsembleOptimizer {
    Sgd(SGD),
    Adam(AdamW),
}

impl EnsembleOptimizer {
    pub fn new(kind: OptimizerKind, vars: Vec<Var>, options: &OptimizerOptions) -> Result<Self> {
        if !(options.lr > 0.0) {
            return Err(EnsembleError::config(format!(
                "learning rate must be positive, got {}",
                options.lr
            )));
        }
        let weight_decay = match kind {
            OptimizerKind::Sgd => return Ok(Self::Sgd(SGD::new(vars, options.lr)?)),
            OptimizerKind::Adam => {
                if options.weight_decay > 0.0 {
                    tracing::warn!(
                        weight_decay = options.weight_decay,
                        "Adam ignores weight_decay; use adamw for decoupled decay"
                    );
                }
                0.0
            }
            OptimizerKind::AdamW => options.weight_decay,
        };
        let params = ParamsAdamW {
            lr: options.lr,
            beta1: options.beta1,
            beta2: options.beta2,
            eps: options.eps,
            weight_decay,
        };
        Ok(Self::Adam(AdamW::new(vars, params)?))
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Sgd(o) => o.learning_rate(),
            Self::Adam(o) => o.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Sgd(o) => o.set_learning_rate(lr),
            Self::Adam(o) => o.set_learning_rate(lr),
        }
    }

    /// Apply one update from already computed gradients.
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        match self {
            Self::Sgd(o) => o.step(grads)?,
            Self::Adam(o) => o.step(grads)?,
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
