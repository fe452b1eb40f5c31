//! Snapshot learning-rate schedule and clamp.
//!
//! Cosine annealing with warm restarts: the rate falls from the base rate to
//! ~0 over one cycle, then jumps back up. One cycle per snapshot.

use snapens_core::{EnsembleError, Result};

// ── Snapshot schedule ───────────────────────────────────────────────────────

/// Cyclic cosine multiplier.
///
/// With `I` total iterations and `M` snapshots, the cycle length is
/// `T = ceil(I / M)` and
///
/// ```text
/// f(t) = 0.5 * (cos(π * (t mod T) / T) + 1)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SnapshotSchedule {
    cycle_len: usize,
}

impl SnapshotSchedule {
    /// `n_snapshots` is clamped to at least 1; an empty budget gives `T = 1`.
    pub fn new(total_iters: usize, n_snapshots: usize) -> Self {
        let cycle_len = total_iters.div_ceil(n_snapshots.max(1)).max(1);
        Self { cycle_len }
    }

    pub fn cycle_len(&self) -> usize {
        self.cycle_len
    }

    /// Learning-rate multiplier for global iteration `t`.
    pub fn multiplier(&self, t: usize) -> f64 {
        let phase = (t % self.cycle_len) as f64 / self.cycle_len as f64;
        0.5 * ((std::f64::consts::PI * phase).cos() + 1.0)
    }

    /// Effective rate for iteration `t`.
    pub fn lr_at(&self, base_lr: f64, t: usize) -> f64 {
        base_lr * self.multiplier(t)
    }
}

/// Stateless form of [`SnapshotSchedule::multiplier`].
pub fn snapshot_multiplier(t: usize, total_iters: usize, n_snapshots: usize) -> f64 {
    SnapshotSchedule::new(total_iters, n_snapshots).multiplier(t)
}

// ── Clamp ───────────────────────────────────────────────────────────────────

/// Admissible learning-rate range `[low, high]`, with `low < high`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LrClip {
    low: f64,
    high: f64,
}

impl LrClip {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        // Also rejects NaN bounds.
        if !(low < high) {
            return Err(EnsembleError::config(format!(
                "The first element = {low} should be smaller than the second element = {high} in lr_clip."
            )));
        }
        Ok(Self { low, high })
    }

    /// Parse a `[low, high]` list.
    pub fn from_slice(bounds: &[f64]) -> Result<Self> {
        match bounds {
            [low, high] => Self::new(*low, *high),
            _ => Err(EnsembleError::config(format!(
                "lr_clip should only have two elements, one for lower bound, and another for upper bound; got {}.",
                bounds.len()
            ))),
        }
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn clamp(&self, lr: f64) -> f64 {
        lr.clamp(self.low, self.high)
    }
}

/// Clamp `lr` into `clip` when given, otherwise pass it through.
pub fn clip_lr(lr: f64, clip: Option<&LrClip>) -> f64 {
    match clip {
        Some(c) => c.clamp(lr),
        None => lr,
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
