//! # snapens-common — Shared Primitives
//!
//! Types and utilities shared across every crate in the workspace:
//!
//! * **[`MlpConfig`]** — base estimator hyper-parameters (serialised as JSON).
//! * **[`Activation`]** — hidden-layer non-linearity.
//! * **[`TabularDataset`]** / **[`BatchDataset`]** — row loading & batching.
//! * **[`batch_to_tensors`]** — raw batch → Candle tensors.

pub mod config;
pub mod data;

pub use config::{Activation, MlpConfig};
pub use data::{
    batch_to_tensors, load_features, BatchDataset, RawBatch, RawTargets, TabularDataset,
    TargetKind,
};
