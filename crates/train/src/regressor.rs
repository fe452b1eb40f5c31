//! Regression front-end.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};

use snapens_common::BatchDataset;
use snapens_core::{Architecture, BaseEstimator, EnsembleError, OutputMode, Result};

use crate::criterion::Criterion;
use crate::driver::{FitOptions, FitReport, SnapshotEnsemble};
use crate::optim::{OptimizerKind, OptimizerOptions};
use crate::telemetry::TelemetrySink;

/// Snapshot ensemble averaging real-valued member outputs.
#[derive(Debug)]
pub struct SnapshotEnsembleRegressor<A: Architecture> {
    inner: SnapshotEnsemble<A>,
}

impl<A: Architecture> SnapshotEnsembleRegressor<A> {
    pub fn new(estimator: BaseEstimator<A>, n_estimators: usize, device: Device) -> Self {
        Self {
            inner: SnapshotEnsemble::new(estimator, n_estimators, OutputMode::Regression, device),
        }
    }

    /// Load a regressor checkpoint; rejects classifier checkpoints.
    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        let inner = SnapshotEnsemble::load(dir, device)?;
        if inner.mode() != OutputMode::Regression {
            return Err(EnsembleError::state(format!(
                "{} holds a classification ensemble",
                dir.display()
            )));
        }
        Ok(Self { inner })
    }

    pub fn set_optimizer(&mut self, kind: OptimizerKind, options: OptimizerOptions) {
        self.inner.set_optimizer(kind, options);
    }

    pub fn set_criterion(&mut self, criterion: Criterion) {
        self.inner.set_criterion(criterion);
    }

    pub fn set_telemetry(&mut self, sink: impl TelemetrySink + 'static) {
        self.inner.set_telemetry(sink);
    }

    pub fn fit(
        &mut self,
        train: &dyn BatchDataset,
        validation: Option<&dyn BatchDataset>,
        options: &FitOptions,
    ) -> Result<FitReport> {
        self.inner.fit(train, validation, options)
    }

    /// Mean of member outputs, `(rows, n_outputs)`.
    pub fn predict(&self, xs: &Tensor) -> Result<Tensor> {
        self.inner.predict(xs)
    }

    /// Mean criterion value of the averaged prediction.
    pub fn evaluate(&self, data: &dyn BatchDataset) -> Result<f64> {
        Ok(self.inner.evaluate(data)?.loss)
    }

    pub fn save(&self, save_dir: Option<&Path>) -> Result<PathBuf> {
        self.inner.save(save_dir)
    }

    pub fn inner(&self) -> &SnapshotEnsemble<A> {
        &self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TelemetrySink, VALIDATION_LOSS};
    use snapens_common::{MlpConfig, TabularDataset};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Losses(Rc<RefCell<Vec<f64>>>);

    impl TelemetrySink for Losses {
        fn add_scalar(&mut self, tag: &str, value: f64, _step: usize) {
            if tag == VALIDATION_LOSS {
                self.0.borrow_mut().push(value);
            }
        }
    }

    fn two_targets() -> TabularDataset {
        let xs: Vec<f32> = (0..48).map(|i| i as f32 / 24.0 - 1.0).collect();
        let mut ys = Vec::new();
        for x in &xs {
            ys.extend([x * 0.5, 1.0 - x]);
        }
        TabularDataset::regression(xs, 1, ys, 2, 8).unwrap()
    }

    #[test]
    fn validation_loss_is_reported_per_snapshot() {
        let data = two_targets();
        let losses = Rc::new(RefCell::new(Vec::new()));
        let mut reg = SnapshotEnsembleRegressor::new(
            BaseEstimator::Architecture(MlpConfig {
                input_size: 1,
                output_size: 2,
                hidden_sizes: vec![8],
                ..Default::default()
            }),
            2,
            Device::Cpu,
        );
        reg.set_criterion(Criterion::Mse);
        reg.set_telemetry(Losses(losses.clone()));
        let options = FitOptions {
            epochs: 4,
            save_model: false,
            ..Default::default()
        };
        let report = reg.fit(&data, Some(&data), &options).unwrap();

        assert_eq!(losses.borrow().as_slice(), report.validation_scores.as_slice());
        assert_eq!(report.validation_scores.len(), 2);
        assert!(report.saved_at.is_empty());
        // The first finite loss always improves on +∞.
        assert_eq!(report.best_score.map(f64::is_finite), Some(true));

        let xs = Tensor::new(&[[0.0f32], [0.5]], &Device::Cpu).unwrap();
        assert_eq!(reg.predict(&xs).unwrap().dims(), &[2, 2]);
        let mse = reg.evaluate(&data).unwrap();
        assert!((mse - report.validation_scores[1]).abs() < 1e-6);
    }
}
