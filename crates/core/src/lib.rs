//! # snapens-core — Ensemble Engine
//!
//! Everything needed to hold and run a snapshot ensemble, independent of how
//! the snapshots were trained:
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`architecture`] | `Architecture` trait (model factory), `BaseEstimator` |
//! | [`mlp`] | `Mlp`, the stock base estimator built from `MlpConfig` |
//! | [`params`] | `ParamSet`: detached deep copies of model parameters |
//! | [`snapshot`] | `Snapshot`: frozen parameters + materialised forward pass |
//! | [`ensemble`] | `Ensemble`, `OutputMode`, `Voting` |
//! | [`ops`] | averaging, vote counting, host-side arg-max |
//! | [`error`] | `EnsembleError` and the crate `Result` alias |
//!
//! ## Invariants
//!
//! 1. **No aliasing.** A snapshot never shares tensor storage with the live
//!    training `VarMap`; the live parameters keep changing after the copy.
//! 2. **Append-only.** Ensembles grow in creation order and are never pruned.
//! 3. **Deterministic aggregation.** Ties in arg-max resolve to the lowest
//!    class index.

pub mod architecture;
pub mod ensemble;
pub mod error;
pub mod mlp;
pub mod ops;
pub mod params;
pub mod snapshot;

// ── Public re-exports ───────────────────────────────────────────────────────

pub use architecture::{Architecture, BaseEstimator};
pub use ensemble::{Ensemble, OutputMode, Voting};
pub use error::{EnsembleError, Result};
pub use mlp::Mlp;
pub use params::ParamSet;
pub use snapshot::Snapshot;
