//! # snapens-train — Snapshot Ensemble Trainer
//!
//! Trains one base estimator under a cyclic cosine learning rate and keeps a
//! frozen copy of it at the end of every cycle:
//!
//! * **[`SnapshotEnsemble`]** — the driver. One call to
//!   [`SnapshotEnsemble::fit`] validates its arguments, runs the epoch loop,
//!   collects `n_estimators` snapshots and optionally tracks the best
//!   validation score, persisting on improvement.
//! * **[`SnapshotEnsembleClassifier`]** / **[`SnapshotEnsembleRegressor`]** —
//!   task front-ends with soft/hard voting or averaging.
//! * **[`SnapshotSchedule`]** — `0.5·(cos(π·(t mod T)/T) + 1)`.
//! * **[`SnapshotTrigger`]** — fires at an epoch end when the iteration
//!   counter is an exact multiple of the per-estimator iteration budget.
//! * **[`persist`]** — `manifest.json` plus one safetensors file per snapshot.

pub mod best;
pub mod classifier;
pub mod criterion;
pub mod driver;
pub mod optim;
pub mod persist;
pub mod regressor;
pub mod scheduler;
pub mod telemetry;
pub mod trigger;

pub use best::{BestTracker, ScoreDirection};
pub use classifier::SnapshotEnsembleClassifier;
pub use criterion::{Criterion, LossFn};
pub use driver::{Evaluation, FitOptions, FitReport, SnapshotEnsemble};
pub use optim::{EnsembleOptimizer, OptimizerKind, OptimizerOptions};
pub use persist::{checkpoint_name, Manifest};
pub use regressor::SnapshotEnsembleRegressor;
pub use scheduler::{clip_lr, snapshot_multiplier, LrClip, SnapshotSchedule};
pub use telemetry::{
    CsvTelemetry, MultiTelemetry, NoopTelemetry, TelemetrySink, TracingTelemetry,
};
pub use trigger::SnapshotTrigger;
