//! A frozen ensemble member.

use candle_core::{Device, Tensor};
use candle_nn::Module;

use crate::architecture::Architecture;
use crate::error::Result;
use crate::params::ParamSet;

/// Parameters captured at one point of the cyclic schedule, plus the forward
/// module materialised from them. Immutable once created.
pub struct Snapshot<A: Architecture> {
    params: ParamSet,
    model: A::Model,
}

impl<A: Architecture> Snapshot<A> {
    /// Build the forward module for `params` on `device`.
    pub fn materialize(arch: &A, params: ParamSet, device: &Device) -> Result<Self> {
        let model = arch.build(params.var_builder(device))?;
        Ok(Self { params, model })
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.model.forward(xs)?)
    }
}

impl<A: Architecture> std::fmt::Debug for Snapshot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("tensors", &self.params.len())
            .field("elements", &self.params.num_elements())
            .finish()
    }
}
