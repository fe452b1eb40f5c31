//! Snapshot trigger.
//!
//! Counts optimiser steps and, at epoch boundaries only, reports whether the
//! current cycle is complete. Checking per batch could fire mid-epoch when
//! the per-estimator budget is not a multiple of the epoch length.

/// Iteration counter deciding when to take a snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotTrigger {
    counter: usize,
    per_estimator_iterations: usize,
    total_iterations: usize,
}

impl SnapshotTrigger {
    /// `per_estimator_iterations = floor(epochs * batches_per_epoch / n_estimators)`.
    pub fn new(epochs: usize, batches_per_epoch: usize, n_estimators: usize) -> Self {
        let total_iterations = epochs * batches_per_epoch;
        Self {
            counter: 0,
            per_estimator_iterations: total_iterations / n_estimators.max(1),
            total_iterations,
        }
    }

    /// Record one processed batch.
    pub fn tick(&mut self) {
        self.counter += 1;
    }

    /// Call once after the last batch of an epoch.
    pub fn fires_at_epoch_end(&self) -> bool {
        self.per_estimator_iterations > 0 && self.counter % self.per_estimator_iterations == 0
    }

    /// Global iterations processed so far.
    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn per_estimator_iterations(&self) -> usize {
        self.per_estimator_iterations
    }

    /// Iteration budget of the whole run, fed to the schedule.
    pub fn total_iterations(&self) -> usize {
        self.total_iterations
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
