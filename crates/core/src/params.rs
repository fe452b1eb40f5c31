//! Detached copies of model parameters.
//!
//! A [`ParamSet`] is what a snapshot *is*: every tensor of the live model,
//! copied into fresh storage and cut from the autograd graph. Writing to the
//! live `VarMap` afterwards never shows through.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::error::{EnsembleError, Result};

/// Parameter name → tensor, ordered by name.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    tensors: BTreeMap<String, Tensor>,
}

impl ParamSet {
    /// Deep-copy every variable of `varmap`.
    pub fn from_varmap(varmap: &VarMap) -> Result<Self> {
        let data = varmap
            .data()
            .lock()
            .map_err(|_| EnsembleError::state("parameter store lock poisoned"))?;
        let mut tensors = BTreeMap::new();
        for (name, var) in data.iter() {
            tensors.insert(name.clone(), var.as_tensor().copy()?.detach());
        }
        Ok(Self { tensors })
    }

    /// Deep-copy an arbitrary tensor map.
    pub fn from_tensors<I>(tensors: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, Tensor)>,
    {
        let tensors = tensors
            .into_iter()
            .map(|(name, t)| -> Result<(String, Tensor)> { Ok((name, t.copy()?.detach())) })
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { tensors })
    }

    /// Overwrite the matching variables of `varmap` with these values.
    /// Every name must already exist in the map with the same shape.
    pub fn load_into(&self, varmap: &mut VarMap) -> Result<()> {
        for (name, tensor) in &self.tensors {
            varmap.set_one(name, tensor)?;
        }
        Ok(())
    }

    /// A read-only builder over these tensors, for materialising a frozen model.
    pub fn var_builder(&self, device: &Device) -> VarBuilder<'static> {
        let map: HashMap<String, Tensor> = self
            .tensors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        VarBuilder::from_tensors(map, DType::F32, device)
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalars across all tensors.
    pub fn num_elements(&self) -> usize {
        self.tensors.values().map(Tensor::elem_count).sum()
    }

    /// Write as a single safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let map: HashMap<String, Tensor> = self
            .tensors
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        candle_core::safetensors::save(&map, path)?;
        Ok(())
    }

    /// Read a safetensors file written by [`save`](Self::save).
    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        let map = candle_core::safetensors::load(path, device)?;
        Ok(Self {
            tensors: map.into_iter().collect(),
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
