//! Model factory seam.
//!
//! The ensemble never looks inside a base estimator. It only needs to build
//! a forward module from a [`VarBuilder`]: backed by a `VarMap` for the live
//! trainable model, or by a frozen tensor map for a snapshot.

use std::fmt::Debug;

use candle_core::{DType, Device};
use candle_nn::{Module, VarBuilder, VarMap};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::params::ParamSet;

/// A serialisable description of a model architecture.
///
/// `build` must create the same parameter names and shapes every time it is
/// called, so that a [`ParamSet`] captured from one instance loads into any
/// other.
pub trait Architecture: Clone + Debug + Serialize + DeserializeOwned {
    type Model: Module;

    /// Short name used in checkpoint directory names.
    fn name(&self) -> String;

    fn build(&self, vb: VarBuilder) -> candle_core::Result<Self::Model>;
}

/// Where the base estimator comes from.
#[derive(Debug, Clone)]
pub enum BaseEstimator<A: Architecture> {
    /// Fresh randomly initialised instance per fit.
    Architecture(A),
    /// Start every fit from these parameters.
    Prebuilt { arch: A, params: ParamSet },
}

impl<A: Architecture> BaseEstimator<A> {
    pub fn arch(&self) -> &A {
        match self {
            Self::Architecture(arch) => arch,
            Self::Prebuilt { arch, .. } => arch,
        }
    }

    /// Build a trainable instance. The returned `VarMap` owns every parameter
    /// of the model and is what the optimiser updates.
    pub fn instantiate(&self, device: &Device) -> Result<(VarMap, A::Model)> {
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let model = self.arch().build(vb)?;
        if let Self::Prebuilt { params, .. } = self {
            params.load_into(&mut varmap)?;
        }
        Ok((varmap, model))
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
