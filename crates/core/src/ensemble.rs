//! The ensemble aggregator.
//!
//! Owns the snapshots in creation order and turns their raw outputs into one
//! prediction:
//!
//! | Mode | Combination |
//! |------|-------------|
//! | regression | elementwise mean of raw outputs |
//! | soft vote | mean of per-member softmax distributions |
//! | hard vote | per-row share of arg-max votes |

use std::str::FromStr;

use candle_core::{Tensor, D};
use candle_nn::ops::softmax;
use serde::{Deserialize, Serialize};

use crate::architecture::Architecture;
use crate::error::{EnsembleError, Result};
use crate::ops;
use crate::snapshot::Snapshot;

/// Classifier voting strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Voting {
    #[default]
    Soft,
    Hard,
}

impl FromStr for Voting {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "soft" => Ok(Self::Soft),
            "hard" => Ok(Self::Hard),
            other => Err(EnsembleError::config(format!(
                "voting strategy must be \"soft\" or \"hard\", got {other:?}"
            ))),
        }
    }
}

/// What the members predict and how their outputs are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", content = "voting", rename_all = "lowercase")]
pub enum OutputMode {
    Regression,
    Classification(Voting),
}

impl OutputMode {
    pub fn is_classification(&self) -> bool {
        matches!(self, Self::Classification(_))
    }
}

/// Ordered collection of snapshots sharing one architecture.
pub struct Ensemble<A: Architecture> {
    arch: A,
    mode: OutputMode,
    n_outputs: Option<usize>,
    members: Vec<Snapshot<A>>,
}

impl<A: Architecture> Ensemble<A> {
    pub fn new(arch: A, mode: OutputMode) -> Self {
        Self {
            arch,
            mode,
            n_outputs: None,
            members: Vec::new(),
        }
    }

    /// Add a member. Members are never removed.
    pub fn append(&mut self, snapshot: Snapshot<A>) {
        self.members.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[Snapshot<A>] {
        &self.members
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Number of outputs decided from the training data (classes or target width).
    pub fn n_outputs(&self) -> Option<usize> {
        self.n_outputs
    }

    pub fn set_n_outputs(&mut self, n_outputs: usize) {
        self.n_outputs = Some(n_outputs);
    }

    /// Raw output of every member, in creation order.
    pub fn forward_members(&self, xs: &Tensor) -> Result<Vec<Tensor>> {
        if self.members.is_empty() {
            return Err(EnsembleError::state(
                "the ensemble has no snapshots yet; call fit first",
            ));
        }
        self.members.iter().map(|m| m.forward(xs)).collect()
    }

    /// Combined prediction: regression values or per-class probabilities.
    pub fn predict(&self, xs: &Tensor) -> Result<Tensor> {
        let outputs = self.forward_members(xs)?;
        match self.mode {
            OutputMode::Regression => ops::average(&outputs),
            OutputMode::Classification(voting) => {
                let probas = outputs
                    .iter()
                    .map(|o| softmax(o, D::Minus1))
                    .collect::<candle_core::Result<Vec<_>>>()?;
                match voting {
                    Voting::Soft => ops::average(&probas),
                    Voting::Hard => ops::majority_vote(&probas),
                }
            }
        }
    }

    /// Arg-max class per row of [`predict`](Self::predict).
    pub fn predict_classes(&self, xs: &Tensor) -> Result<Vec<u32>> {
        if !self.mode.is_classification() {
            return Err(EnsembleError::state(
                "class predictions need a classification ensemble",
            ));
        }
        ops::argmax_rows(&self.predict(xs)?)
    }
}

impl<A: Architecture> std::fmt::Debug for Ensemble<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ensemble")
            .field("arch", &self.arch)
            .field("mode", &self.mode)
            .field("n_outputs", &self.n_outputs)
            .field("members", &self.members.len())
            .finish()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
