//! Classification front-end.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};

use snapens_common::BatchDataset;
use snapens_core::{Architecture, BaseEstimator, EnsembleError, OutputMode, Result, Voting};

use crate::criterion::Criterion;
use crate::driver::{Evaluation, FitOptions, FitReport, SnapshotEnsemble};
use crate::optim::{OptimizerKind, OptimizerOptions};
use crate::telemetry::TelemetrySink;

/// Snapshot ensemble whose members emit class logits.
///
/// `predict` returns class probabilities `(rows, classes)`: the mean softmax
/// for soft voting, vote shares for hard voting.
#[derive(Debug)]
pub struct SnapshotEnsembleClassifier<A: Architecture> {
    inner: SnapshotEnsemble<A>,
}

impl<A: Architecture> SnapshotEnsembleClassifier<A> {
    pub fn new(
        estimator: BaseEstimator<A>,
        n_estimators: usize,
        voting: Voting,
        device: Device,
    ) -> Self {
        Self {
            inner: SnapshotEnsemble::new(
                estimator,
                n_estimators,
                OutputMode::Classification(voting),
                device,
            ),
        }
    }

    /// Load a classifier checkpoint; rejects regressor checkpoints.
    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        let inner = SnapshotEnsemble::load(dir, device)?;
        if !inner.mode().is_classification() {
            return Err(EnsembleError::state(format!(
                "{} holds a regression ensemble",
                dir.display()
            )));
        }
        Ok(Self { inner })
    }

    pub fn voting(&self) -> Voting {
        match self.inner.mode() {
            OutputMode::Classification(v) => v,
            OutputMode::Regression => Voting::default(),
        }
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

    pub fn predict(&self, xs: &Tensor) -> Result<Tensor> {
        self.inner.predict(xs)
    }

    pub fn predict_classes(&self, xs: &Tensor) -> Result<Vec<u32>> {
        self.inner.ensemble().predict_classes(xs)
    }

    /// Accuracy in percent.
    pub fn evaluate(&self, data: &dyn BatchDataset) -> Result<f64> {
        Ok(self.evaluate_with_loss(data)?.0)
    }

    /// Accuracy in percent and mean criterion value.
    pub fn evaluate_with_loss(&self, data: &dyn BatchDataset) -> Result<(f64, f64)> {
        let Evaluation { accuracy, loss } = self.inner.evaluate(data)?;
        Ok((accuracy.unwrap_or(0.0), loss))
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
    use crate::regressor::SnapshotEnsembleRegressor;
    use snapens_common::{MlpConfig, TabularDataset};

    fn xor_like() -> TabularDataset {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let (x, y, c) = match i % 3 {
                0 => (0.0f32, 3.0f32, 0u32),
                1 => (3.0, 0.0, 1),
                _ => (-3.0, -3.0, 2),
            };
            let jitter = (i as f32 * 0.37).sin() * 0.3;
            features.extend([x + jitter, y - jitter]);
            labels.push(c);
        }
        TabularDataset::classification(features, 2, labels, 12).unwrap()
    }

    fn arch() -> MlpConfig {
        MlpConfig {
            input_size: 2,
            output_size: 3,
            hidden_sizes: vec![16],
            ..Default::default()
        }
    }

    #[test]
    fn hard_voting_classifier_end_to_end() {
        let data = xor_like();
        let tmp = tempfile::tempdir().unwrap();
        let mut clf = SnapshotEnsembleClassifier::new(
            BaseEstimator::Architecture(arch()),
            3,
            Voting::Hard,
            Device::Cpu,
        );
        clf.set_optimizer(
            OptimizerKind::Adam,
            OptimizerOptions {
                lr: 0.05,
                ..Default::default()
            },
        );
        let options = FitOptions {
            epochs: 15,
            save_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        clf.fit(&data, None, &options).unwrap();
        assert_eq!(clf.voting(), Voting::Hard);

        let xs = Tensor::new(&[[0f32, 3.0], [3.0, 0.0], [-3.0, -3.0]], &Device::Cpu).unwrap();
        let shares: Vec<Vec<f32>> = clf.predict(&xs).unwrap().to_vec2().unwrap();
        for row in &shares {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-6);
            // Three members: every share is a multiple of 1/3.
            for &s in row {
                let k = s * 3.0;
                assert!((k - k.round()).abs() < 1e-5);
            }
        }
        assert_eq!(clf.predict_classes(&xs).unwrap(), vec![0, 1, 2]);
        assert!(clf.evaluate(&data).unwrap() > 90.0);

        let dir = tmp.path().join("SnapshotEnsembleClassifier_Mlp_3_ckpt");
        let loaded = SnapshotEnsembleClassifier::<MlpConfig>::load(&dir, Device::Cpu).unwrap();
        assert_eq!(loaded.voting(), Voting::Hard);
        assert_eq!(loaded.predict_classes(&xs).unwrap(), vec![0, 1, 2]);

        let err = SnapshotEnsembleRegressor::<MlpConfig>::load(&dir, Device::Cpu).unwrap_err();
        assert!(err.is_state());
    }
}
