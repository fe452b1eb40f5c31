//! Best-ensemble bookkeeping.

/// Which way a validation score improves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScoreDirection {
    /// Accuracy; starts from 0.0.
    HigherIsBetter,
    /// Loss; starts from +∞.
    LowerIsBetter,
}

/// Historical best validation score and the ensemble size that reached it.
#[derive(Clone, Debug, PartialEq)]
pub struct BestTracker {
    direction: ScoreDirection,
    best: f64,
    best_len: Option<usize>,
}

impl BestTracker {
    pub fn new(direction: ScoreDirection) -> Self {
        let best = match direction {
            ScoreDirection::HigherIsBetter => 0.0,
            ScoreDirection::LowerIsBetter => f64::INFINITY,
        };
        Self {
            direction,
            best,
            best_len: None,
        }
    }

    /// Record a score. Returns `true` only on strict improvement.
    pub fn observe(&mut self, score: f64, ensemble_len: usize) -> bool {
        let improved = match self.direction {
            ScoreDirection::HigherIsBetter => score > self.best,
            ScoreDirection::LowerIsBetter => score < self.best,
        };
        if improved {
            self.best = score;
            self.best_len = Some(ensemble_len);
        }
        improved
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Ensemble size at the best score, `None` until something improved.
    pub fn best_len(&self) -> Option<usize> {
        self.best_len
    }

    pub fn direction(&self) -> ScoreDirection {
        self.direction
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
