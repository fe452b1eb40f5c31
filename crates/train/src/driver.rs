//! Snapshot ensemble driver: one training run, many members.
//!
//! A single base estimator is trained for `epochs` epochs under the cyclic
//! snapshot schedule. Every `per_estimator_iterations` iterations, checked at
//! epoch ends, its parameters are deep-copied into the ensemble. With
//! validation data the whole ensemble is scored after each snapshot and
//! persisted whenever the score strictly improves.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::Module;

use snapens_common::{batch_to_tensors, BatchDataset, TargetKind};
use snapens_core::{
    ops, Architecture, BaseEstimator, Ensemble, EnsembleError, OutputMode, ParamSet, Result,
    Snapshot,
};

use crate::best::{BestTracker, ScoreDirection};
use crate::criterion::Criterion;
use crate::optim::{EnsembleOptimizer, OptimizerKind, OptimizerOptions};
use crate::persist;
use crate::scheduler::{LrClip, SnapshotSchedule};
use crate::telemetry::{NoopTelemetry, TelemetrySink, TRAIN_LOSS, VALIDATION_ACC, VALIDATION_LOSS};
use crate::trigger::SnapshotTrigger;

// ── Options / report ────────────────────────────────────────────────────────

/// Per-call training knobs.
#[derive(Debug, Clone)]
pub struct FitOptions {
    /// `[low, high]` bounds for the learning rate; exactly two elements.
    pub lr_clip: Option<Vec<f64>>,
    pub epochs: usize,
    /// Log every n-th batch of an epoch (batch index 0 included).
    pub log_interval: usize,
    pub save_model: bool,
    /// Parent of the checkpoint directory; the working directory if `None`.
    pub save_dir: Option<PathBuf>,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            lr_clip: None,
            epochs: 100,
            log_interval: 100,
            save_model: true,
            save_dir: None,
        }
    }
}

/// What happened during one `fit` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitReport {
    pub total_iterations: usize,
    /// Iteration counter at each snapshot, in creation order.
    pub snapshot_iterations: Vec<usize>,
    /// Ensemble score after each snapshot (validation runs only).
    pub validation_scores: Vec<f64>,
    /// Ensemble sizes at which the model was written to disk.
    pub saved_at: Vec<usize>,
    pub best_score: Option<f64>,
    pub checkpoint: Option<PathBuf>,
}

/// Ensemble quality on a labelled dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Percentage of correct arg-max predictions; classification only.
    pub accuracy: Option<f64>,
    /// Criterion applied to the aggregated output, averaged over batches.
    pub loss: f64,
}

// ── Driver ──────────────────────────────────────────────────────────────────

/// Trains and holds a snapshot ensemble.
pub struct SnapshotEnsemble<A: Architecture> {
    estimator: BaseEstimator<A>,
    n_estimators: usize,
    optimizer_kind: OptimizerKind,
    optimizer_options: OptimizerOptions,
    criterion: Option<Criterion>,
    ensemble: Ensemble<A>,
    telemetry: Box<dyn TelemetrySink>,
    device: Device,
}

impl<A: Architecture> SnapshotEnsemble<A> {
    pub fn new(
        estimator: BaseEstimator<A>,
        n_estimators: usize,
        mode: OutputMode,
        device: Device,
    ) -> Self {
        let ensemble = Ensemble::new(estimator.arch().clone(), mode);
        Self {
            estimator,
            n_estimators,
            optimizer_kind: OptimizerKind::default(),
            optimizer_options: OptimizerOptions::default(),
            criterion: None,
            ensemble,
            telemetry: Box::new(NoopTelemetry),
            device,
        }
    }

    /// Rebuild from a checkpoint directory written by [`Self::save`].
    pub fn load(dir: &Path, device: Device) -> Result<Self> {
        let (manifest, ensemble) = persist::load::<A>(dir, &device)?;
        let criterion = match manifest.criterion.as_str() {
            "cross_entropy" => Some(Criterion::CrossEntropy),
            "mse" => Some(Criterion::Mse),
            other => {
                tracing::warn!(
                    criterion = other,
                    "custom criterion cannot be restored; using the default for this task"
                );
                None
            }
        };
        Ok(Self {
            estimator: BaseEstimator::Architecture(manifest.architecture),
            n_estimators: manifest.n_estimators,
            optimizer_kind: OptimizerKind::default(),
            optimizer_options: OptimizerOptions::default(),
            criterion,
            ensemble,
            telemetry: Box::new(NoopTelemetry),
            device,
        })
    }

    pub fn set_optimizer(&mut self, kind: OptimizerKind, options: OptimizerOptions) {
        self.optimizer_kind = kind;
        self.optimizer_options = options;
    }

    pub fn set_criterion(&mut self, criterion: Criterion) {
        self.criterion = Some(criterion);
    }

    pub fn set_telemetry(&mut self, sink: impl TelemetrySink + 'static) {
        self.telemetry = Box::new(sink);
    }

    /// Cross-entropy for classification, MSE for regression unless set.
    pub fn criterion(&self) -> Criterion {
        self.criterion.unwrap_or(match self.ensemble.mode() {
            OutputMode::Classification(_) => Criterion::CrossEntropy,
            OutputMode::Regression => Criterion::Mse,
        })
    }

    pub fn ensemble(&self) -> &Ensemble<A> {
        &self.ensemble
    }

    pub fn n_estimators(&self) -> usize {
        self.n_estimators
    }

    pub fn mode(&self) -> OutputMode {
        self.ensemble.mode()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn model_name(&self) -> &'static str {
        match self.ensemble.mode() {
            OutputMode::Classification(_) => "SnapshotEnsembleClassifier",
            OutputMode::Regression => "SnapshotEnsembleRegressor",
        }
    }

    // ── Validation ──────────────────────────────────────────────────────

    fn validate_parameters(
        &self,
        train: &dyn BatchDataset,
        options: &FitOptions,
    ) -> Result<Option<LrClip>> {
        if options.epochs == 0 {
            return Err(EnsembleError::config(format!(
                "The number of training epochs = {} should be strictly positive.",
                options.epochs
            )));
        }
        if options.log_interval == 0 {
            return Err(EnsembleError::config(format!(
                "The number of batches to wait before printing the training status should be strictly positive, but got {} instead.",
                options.log_interval
            )));
        }
        if self.n_estimators == 0 {
            return Err(EnsembleError::config(
                "The number of base estimators should be strictly positive.",
            ));
        }
        if options.epochs % self.n_estimators != 0 {
            return Err(EnsembleError::config(format!(
                "The number of training epochs = {} should be a multiple of n_estimators = {}.",
                options.epochs, self.n_estimators
            )));
        }
        let expected = match self.ensemble.mode() {
            OutputMode::Classification(_) => TargetKind::Class,
            OutputMode::Regression => TargetKind::Value,
        };
        if train.target_kind() != expected {
            return Err(EnsembleError::config(format!(
                "training targets are {:?} but the ensemble expects {expected:?}",
                train.target_kind()
            )));
        }
        options
            .lr_clip
            .as_deref()
            .map(LrClip::from_slice)
            .transpose()
    }

    /// Number of distinct labels for classification, target width for
    /// regression.
    fn decide_n_outputs(&self, train: &dyn BatchDataset) -> Result<usize> {
        use snapens_common::RawTargets;

        let mut labels = std::collections::BTreeSet::new();
        for batch in train.batches() {
            match batch.targets {
                RawTargets::Labels(l) => labels.extend(l),
                RawTargets::Values { width, .. } => return Ok(width),
            }
        }
        if labels.is_empty() {
            return Err(EnsembleError::data("training data is empty"));
        }
        Ok(labels.len())
    }

    // ── Training ────────────────────────────────────────────────────────

    /// Train one base estimator and collect `n_estimators` snapshots.
    ///
    /// All arguments, and the estimator's output width, are checked before
    /// any optimiser step. Members from an earlier fit or load are kept until
    /// the first new snapshot is committed, so a fit that fails before then
    /// leaves the ensemble untouched.
    pub fn fit(
        &mut self,
        train: &dyn BatchDataset,
        validation: Option<&dyn BatchDataset>,
        options: &FitOptions,
    ) -> Result<FitReport> {
        let lr_clip = self.validate_parameters(train, options)?;
        let n_outputs = self.decide_n_outputs(train)?;
        let mode = self.ensemble.mode();

        let (varmap, model) = self.estimator.instantiate(&self.device)?;
        if let Some(batch) = train.batches().next() {
            let (inputs, _) = batch_to_tensors(&batch, &self.device)?;
            check_output_width(&model.forward(&inputs)?, n_outputs, mode)?;
        }
        let mut optimizer =
            EnsembleOptimizer::new(self.optimizer_kind, varmap.all_vars(), &self.optimizer_options)?;
        let mut replaced = false;
        let criterion = self.criterion();
        let base_lr = self.optimizer_options.lr;

        let batches_per_epoch = train.num_batches();
        let mut trigger = SnapshotTrigger::new(options.epochs, batches_per_epoch, self.n_estimators);
        let schedule = SnapshotSchedule::new(trigger.total_iterations(), self.n_estimators);
        let mut best = BestTracker::new(if mode.is_classification() {
            ScoreDirection::HigherIsBetter
        } else {
            ScoreDirection::LowerIsBetter
        });
        let mut report = FitReport {
            total_iterations: trigger.total_iterations(),
            ..Default::default()
        };

        tracing::info!(
            model = self.model_name(),
            n_estimators = self.n_estimators,
            epochs = options.epochs,
            batches_per_epoch,
            cycle_len = schedule.cycle_len(),
            optimizer = ?self.optimizer_kind,
            criterion = criterion.name(),
            "Starting snapshot ensemble training"
        );

        optimizer.set_learning_rate(schedule.lr_at(base_lr, 0));

        for epoch in 0..options.epochs {
            for (batch_idx, batch) in train.batches().enumerate() {
                if let Some(clip) = &lr_clip {
                    optimizer.set_learning_rate(clip.clamp(optimizer.learning_rate()));
                }

                let (inputs, targets) = batch_to_tensors(&batch, &self.device)?;
                let output = model.forward(&inputs)?;
                let loss = criterion.loss(&output, &targets)?;
                let grads = loss.backward()?;
                optimizer.step(&grads)?;

                if batch_idx % options.log_interval == 0 {
                    let loss_val = loss.to_scalar::<f32>()? as f64;
                    let lr = format!("{:.5}", optimizer.learning_rate());
                    if mode.is_classification() {
                        let predicted = ops::argmax_rows(&output)?;
                        let labels = targets.to_vec1::<u32>()?;
                        let correct = predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
                        tracing::info!(
                            lr,
                            epoch,
                            batch = batch_idx,
                            loss = format!("{loss_val:.5}"),
                            correct,
                            total = batch.rows,
                            "train"
                        );
                    } else {
                        tracing::info!(
                            lr,
                            epoch,
                            batch = batch_idx,
                            loss = format!("{loss_val:.5}"),
                            "train"
                        );
                    }
                    self.telemetry.add_scalar(TRAIN_LOSS, loss_val, trigger.counter());
                }

                trigger.tick();
                optimizer.set_learning_rate(schedule.lr_at(base_lr, trigger.counter()));
            }

            if !trigger.fires_at_epoch_end() {
                continue;
            }

            let params = ParamSet::from_varmap(&varmap)?;
            let snapshot = Snapshot::materialize(self.estimator.arch(), params, &self.device)?;
            if !replaced {
                if !self.ensemble.is_empty() {
                    tracing::warn!(
                        members = self.ensemble.len(),
                        "Discarding snapshots from a previous fit"
                    );
                }
                self.ensemble = Ensemble::new(self.estimator.arch().clone(), mode);
                self.ensemble.set_n_outputs(n_outputs);
                replaced = true;
            }
            self.ensemble.append(snapshot);
            report.snapshot_iterations.push(trigger.counter());
            let len = self.ensemble.len();
            tracing::info!(index = len - 1, epoch, "Save the snapshot model");

            if let Some(val) = validation {
                let evaluation = self.evaluate(val)?;
                let (score, tag) = match evaluation.accuracy {
                    Some(acc) => (acc, VALIDATION_ACC),
                    None => (evaluation.loss, VALIDATION_LOSS),
                };
                report.validation_scores.push(score);
                if best.observe(score, len) && options.save_model {
                    report.checkpoint = Some(self.save(options.save_dir.as_deref())?);
                    report.saved_at.push(len);
                }
                tracing::info!(
                    n_estimators = len,
                    score = format!("{score:.3}"),
                    best = format!("{:.3}", best.best()),
                    "Validation"
                );
                self.telemetry.add_scalar(tag, score, len);
            }
        }

        if validation.is_some() {
            report.best_score = best.best_len().map(|_| best.best());
        } else if options.save_model && replaced {
            report.checkpoint = Some(self.save(options.save_dir.as_deref())?);
            report.saved_at.push(self.ensemble.len());
        }
        Ok(report)
    }

    // ── Inference ───────────────────────────────────────────────────────

    /// Aggregated ensemble output for `xs` of shape `(rows, features)`.
    pub fn predict(&self, xs: &Tensor) -> Result<Tensor> {
        self.ensemble.predict(xs)
    }

    /// Score the whole ensemble on a labelled dataset.
    pub fn evaluate(&self, data: &dyn BatchDataset) -> Result<Evaluation> {
        let criterion = self.criterion();
        let classification = self.ensemble.mode().is_classification();
        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        let mut correct = 0usize;
        let mut total = 0usize;

        for batch in data.batches() {
            let (inputs, targets) = batch_to_tensors(&batch, &self.device)?;
            let output = self.ensemble.predict(&inputs)?;
            loss_sum += criterion.loss(&output, &targets)?.to_scalar::<f32>()? as f64;
            batches += 1;
            if classification {
                let predicted = ops::argmax_rows(&output)?;
                let labels = targets.to_vec1::<u32>()?;
                correct += predicted.iter().zip(&labels).filter(|(p, l)| p == l).count();
                total += labels.len();
            }
        }
        if batches == 0 {
            return Err(EnsembleError::data("evaluation data is empty"));
        }

        Ok(Evaluation {
            accuracy: classification.then(|| 100.0 * correct as f64 / total.max(1) as f64),
            loss: loss_sum / batches as f64,
        })
    }

    // ── Persistence ─────────────────────────────────────────────────────

    /// Write the ensemble under `save_dir` (working directory if `None`) and
    /// return the checkpoint directory.
    pub fn save(&self, save_dir: Option<&Path>) -> Result<PathBuf> {
        let dir = save_dir.unwrap_or(Path::new(".")).join(persist::checkpoint_name(
            self.model_name(),
            &self.ensemble.arch().name(),
            self.n_estimators,
        ));
        persist::save(
            &self.ensemble,
            self.model_name(),
            self.n_estimators,
            self.criterion().name(),
            &dir,
        )
    }
}

impl<A: Architecture> std::fmt::Debug for SnapshotEnsemble<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotEnsemble")
            .field("model", &self.model_name())
            .field("n_estimators", &self.n_estimators)
            .field("optimizer", &self.optimizer_kind)
            .field("criterion", &self.criterion())
            .field("ensemble", &self.ensemble)
            .finish()
    }
}

fn check_output_width(output: &Tensor, n_outputs: usize, mode: OutputMode) -> Result<()> {
    let width = output.dim(candle_core::D::Minus1)?;
    let fits = match mode {
        OutputMode::Classification(_) => width >= n_outputs,
        OutputMode::Regression => width == n_outputs,
    };
    if !fits {
        return Err(EnsembleError::config(format!(
            "base estimator produces {width} outputs but the training data needs {n_outputs}"
        )));
    }
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use snapens_common::{MlpConfig, RawBatch, TabularDataset};
    use snapens_core::Voting;

    /// Two well separated Gaussian blobs, 200 rows, batch size 10.
    fn blobs() -> TabularDataset {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..200 {
            let class = (i % 2) as u32;
            let centre = if class == 0 { -2.0f32 } else { 2.0 };
            features.push(centre + rng.gen_range(-0.5f32..0.5));
            features.push(centre + rng.gen_range(-0.5f32..0.5));
            labels.push(class);
        }
        TabularDataset::classification(features, 2, labels, 10).unwrap()
    }

    /// `y = 2x - 1` on 64 points, batch size 16.
    fn line() -> TabularDataset {
        let xs: Vec<f32> = (0..64).map(|i| i as f32 / 32.0 - 1.0).collect();
        let ys: Vec<f32> = xs.iter().map(|x| 2.0 * x - 1.0).collect();
        TabularDataset::regression(xs, 1, ys, 1, 16).unwrap()
    }

    fn classifier_arch() -> MlpConfig {
        MlpConfig {
            input_size: 2,
            output_size: 2,
            hidden_sizes: vec![8],
            ..Default::default()
        }
    }

    fn regressor_arch() -> MlpConfig {
        MlpConfig {
            input_size: 1,
            output_size: 1,
            hidden_sizes: vec![8],
            ..Default::default()
        }
    }

    fn no_save(epochs: usize) -> FitOptions {
        FitOptions {
            epochs,
            save_model: false,
            ..Default::default()
        }
    }

    /// Counts how often `batches` is called.
    struct Counting<'a> {
        inner: &'a TabularDataset,
        calls: Cell<usize>,
    }

    impl BatchDataset for Counting<'_> {
        fn num_batches(&self) -> usize {
            self.inner.num_batches()
        }
        fn num_features(&self) -> usize {
            self.inner.num_features()
        }
        fn target_kind(&self) -> TargetKind {
            self.inner.target_kind()
        }
        fn batches(&self) -> Box<dyn Iterator<Item = RawBatch> + '_> {
            self.calls.set(self.calls.get() + 1);
            self.inner.batches()
        }
    }

    struct Steps(std::rc::Rc<std::cell::RefCell<Vec<(String, usize)>>>);

    impl TelemetrySink for Steps {
        fn add_scalar(&mut self, tag: &str, _value: f64, step: usize) {
            self.0.borrow_mut().push((tag.to_string(), step));
        }
    }

    #[test]
    fn collects_one_snapshot_per_cycle() {
        let data = blobs();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(classifier_arch()),
            5,
            OutputMode::Classification(Voting::Soft),
            Device::Cpu,
        );
        driver.set_optimizer(
            OptimizerKind::Sgd,
            OptimizerOptions {
                lr: 0.1,
                ..Default::default()
            },
        );
        let report = driver.fit(&data, None, &no_save(10)).unwrap();

        assert_eq!(report.total_iterations, 200);
        assert_eq!(report.snapshot_iterations, vec![40, 80, 120, 160, 200]);
        assert_eq!(driver.ensemble().len(), 5);
        assert_eq!(driver.ensemble().n_outputs(), Some(2));
        assert!(report.saved_at.is_empty());

        let eval = driver.evaluate(&data).unwrap();
        assert!(eval.accuracy.unwrap() > 90.0);
    }

    #[test]
    fn snapshots_do_not_track_later_training() {
        let data = blobs();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(classifier_arch()),
            2,
            OutputMode::Classification(Voting::Soft),
            Device::Cpu,
        );
        driver.fit(&data, None, &no_save(2)).unwrap();
        let members = driver.ensemble().members();
        let a = members[0].params().get("fc0.weight").unwrap();
        let b = members[1].params().get("fc0.weight").unwrap();
        let diff = (a - b).unwrap().abs().unwrap().sum_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() > 0.0);
    }

    #[test]
    fn rejects_epochs_not_divisible_before_training() {
        let data = blobs();
        let counting = Counting {
            inner: &data,
            calls: Cell::new(0),
        };
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(classifier_arch()),
            5,
            OutputMode::Classification(Voting::Soft),
            Device::Cpu,
        );
        let err = driver.fit(&counting, None, &no_save(7)).unwrap_err();
        assert!(err.is_config());
        assert_eq!(counting.calls.get(), 0);
        assert!(driver.ensemble().is_empty());
    }

    #[test]
    fn rejects_bad_arguments() {
        let data = blobs();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(classifier_arch()),
            2,
            OutputMode::Classification(Voting::Soft),
            Device::Cpu,
        );
        for options in [
            no_save(0),
            FitOptions {
                log_interval: 0,
                ..no_save(2)
            },
            FitOptions {
                lr_clip: Some(vec![0.1]),
                ..no_save(2)
            },
            FitOptions {
                lr_clip: Some(vec![0.5, 0.1]),
                ..no_save(2)
            },
        ] {
            assert!(driver.fit(&data, None, &options).unwrap_err().is_config());
        }
        // Regression targets on a classifier.
        let err = driver.fit(&line(), None, &no_save(2)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn validation_saves_only_on_strict_improvement() {
        let data = blobs();
        let tmp = tempfile::tempdir().unwrap();
        let steps = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(classifier_arch()),
            4,
            OutputMode::Classification(Voting::Soft),
            Device::Cpu,
        );
        driver.set_telemetry(Steps(steps.clone()));
        let options = FitOptions {
            epochs: 4,
            log_interval: 5,
            save_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let report = driver.fit(&data, Some(&data), &options).unwrap();

        assert_eq!(report.validation_scores.len(), 4);
        let mut running = 0.0;
        let mut expected = Vec::new();
        for (i, &score) in report.validation_scores.iter().enumerate() {
            if score > running {
                running = score;
                expected.push(i + 1);
            }
        }
        assert_eq!(report.saved_at, expected);
        assert_eq!(report.best_score, Some(running));
        if !expected.is_empty() {
            let dir = tmp.path().join("SnapshotEnsembleClassifier_Mlp_4_ckpt");
            assert!(dir.join(persist::MANIFEST_FILE).is_file());
        }

        let steps = steps.borrow();
        let val: Vec<usize> = steps
            .iter()
            .filter(|(t, _)| t == VALIDATION_ACC)
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(val, vec![1, 2, 3, 4]);
        // 20 batches per epoch, logged at batch 0, 5, 10, 15.
        let train_steps: Vec<usize> = steps
            .iter()
            .filter(|(t, _)| t == TRAIN_LOSS)
            .map(|(_, s)| *s)
            .take(5)
            .collect();
        assert_eq!(train_steps, vec![0, 5, 10, 15, 20]);
    }

    #[test]
    fn regression_round_trips_through_disk() {
        let data = line();
        let tmp = tempfile::tempdir().unwrap();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(regressor_arch()),
            3,
            OutputMode::Regression,
            Device::Cpu,
        );
        driver.set_optimizer(
            OptimizerKind::Adam,
            OptimizerOptions {
                lr: 0.01,
                ..Default::default()
            },
        );
        let options = FitOptions {
            epochs: 6,
            lr_clip: Some(vec![1e-4, 0.05]),
            save_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let report = driver.fit(&data, None, &options).unwrap();
        assert_eq!(report.saved_at, vec![3]);
        let dir = report.checkpoint.unwrap();
        assert!(dir.ends_with("SnapshotEnsembleRegressor_Mlp_3_ckpt"));

        let loaded = SnapshotEnsemble::<MlpConfig>::load(&dir, Device::Cpu).unwrap();
        assert_eq!(loaded.ensemble().len(), 3);
        assert_eq!(loaded.mode(), OutputMode::Regression);

        let xs = Tensor::new(&[[0.25f32], [-0.5]], &Device::Cpu).unwrap();
        let a: Vec<Vec<f32>> = driver.predict(&xs).unwrap().to_vec2().unwrap();
        let b: Vec<Vec<f32>> = loaded.predict(&xs).unwrap().to_vec2().unwrap();
        assert_eq!(a, b);

        let eval = loaded.evaluate(&data).unwrap();
        assert!(eval.accuracy.is_none());
        assert!(eval.loss.is_finite());
    }

    #[test]
    fn refit_replaces_members() {
        let data = line();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(regressor_arch()),
            2,
            OutputMode::Regression,
            Device::Cpu,
        );
        driver.fit(&data, None, &no_save(2)).unwrap();
        driver.fit(&data, None, &no_save(4)).unwrap();
        assert_eq!(driver.ensemble().len(), 2);
    }

    #[test]
    fn predicting_before_fit_is_a_state_error() {
        let driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(regressor_arch()),
            2,
            OutputMode::Regression,
            Device::Cpu,
        );
        let xs = Tensor::new(&[[0.0f32]], &Device::Cpu).unwrap();
        assert!(driver.predict(&xs).unwrap_err().is_state());
    }

    #[test]
    fn too_narrow_estimator_is_rejected() {
        let data = blobs();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(MlpConfig {
                output_size: 1,
                ..classifier_arch()
            }),
            1,
            OutputMode::Classification(Voting::Hard),
            Device::Cpu,
        );
        assert!(driver.fit(&data, None, &no_save(1)).unwrap_err().is_config());
    }

    /// Yields its inner batches for the first `ok_calls` calls to `batches`,
    /// then batches whose feature buffer is empty.
    struct BreaksAfter<'a> {
        inner: &'a TabularDataset,
        ok_calls: usize,
        calls: Cell<usize>,
    }

    impl BatchDataset for BreaksAfter<'_> {
        fn num_batches(&self) -> usize {
            self.inner.num_batches()
        }
        fn num_features(&self) -> usize {
            self.inner.num_features()
        }
        fn target_kind(&self) -> TargetKind {
            self.inner.target_kind()
        }
        fn batches(&self) -> Box<dyn Iterator<Item = RawBatch> + '_> {
            self.calls.set(self.calls.get() + 1);
            let broken = self.calls.get() > self.ok_calls;
            Box::new(self.inner.batches().map(move |mut batch| {
                if broken {
                    batch.features.clear();
                }
                batch
            }))
        }
    }

    fn fitted_regressor(data: &TabularDataset) -> SnapshotEnsemble<MlpConfig> {
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Architecture(regressor_arch()),
            2,
            OutputMode::Regression,
            Device::Cpu,
        );
        driver.fit(data, None, &no_save(2)).unwrap();
        driver
    }

    fn predictions(driver: &SnapshotEnsemble<MlpConfig>) -> Vec<Vec<f32>> {
        let xs = Tensor::new(&[[0.25f32], [-0.5]], &Device::Cpu).unwrap();
        driver.predict(&xs).unwrap().to_vec2().unwrap()
    }

    #[test]
    fn output_width_error_keeps_previous_ensemble() {
        let mut driver = fitted_regressor(&line());
        let before = predictions(&driver);

        let xs: Vec<f32> = (0..16).map(|i| i as f32 / 8.0).collect();
        let ys: Vec<f32> = xs.iter().flat_map(|x| [*x, -x]).collect();
        let two_targets = TabularDataset::regression(xs, 1, ys, 2, 4).unwrap();
        let err = driver.fit(&two_targets, None, &no_save(2)).unwrap_err();

        assert!(err.is_config());
        assert_eq!(driver.ensemble().len(), 2);
        assert_eq!(driver.ensemble().n_outputs(), Some(1));
        assert_eq!(predictions(&driver), before);
    }

    #[test]
    fn failure_before_first_snapshot_keeps_previous_ensemble() {
        let data = line();
        let mut driver = fitted_regressor(&data);
        let before = predictions(&driver);

        // The first three passes over the data succeed; epoch 1 breaks before
        // the first snapshot of the new run.
        let breaking = BreaksAfter {
            inner: &data,
            ok_calls: 3,
            calls: Cell::new(0),
        };
        let err = driver.fit(&breaking, None, &no_save(4)).unwrap_err();

        assert!(matches!(err, EnsembleError::Candle(_)));
        assert_eq!(driver.ensemble().len(), 2);
        assert_eq!(predictions(&driver), before);
    }

    #[test]
    fn failure_mid_run_keeps_committed_snapshots() {
        let data = line();
        let mut driver = fitted_regressor(&data);

        // 4 epochs, 2 estimators: the first snapshot lands after epoch 1,
        // epoch 2 breaks.
        let breaking = BreaksAfter {
            inner: &data,
            ok_calls: 4,
            calls: Cell::new(0),
        };
        let err = driver.fit(&breaking, None, &no_save(4)).unwrap_err();

        assert!(matches!(err, EnsembleError::Candle(_)));
        assert_eq!(breaking.calls.get(), 5);
        assert_eq!(driver.ensemble().len(), 1);
        let out = predictions(&driver);
        assert_eq!(out.len(), 2);
        assert!(out.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn prebuilt_estimator_trains_from_its_parameters() {
        let device = Device::Cpu;
        let arch = MlpConfig {
            input_size: 1,
            output_size: 1,
            hidden_sizes: vec![],
            ..Default::default()
        };
        let params = ParamSet::from_tensors([
            ("fc0.weight".to_string(), Tensor::new(&[[5f32]], &device).unwrap()),
            ("fc0.bias".to_string(), Tensor::new(&[3f32], &device).unwrap()),
        ])
        .unwrap();
        let mut driver = SnapshotEnsemble::new(
            BaseEstimator::Prebuilt { arch, params },
            1,
            OutputMode::Regression,
            device.clone(),
        );
        driver.set_optimizer(
            OptimizerKind::Sgd,
            OptimizerOptions {
                lr: 1e-9,
                ..Default::default()
            },
        );
        driver.fit(&line(), None, &no_save(1)).unwrap();

        let snapshot = driver.ensemble().members()[0].params();
        let w: Vec<Vec<f32>> = snapshot.get("fc0.weight").unwrap().to_vec2().unwrap();
        let b: Vec<f32> = snapshot.get("fc0.bias").unwrap().to_vec1().unwrap();
        assert!((w[0][0] - 5.0).abs() < 1e-4);
        assert!((b[0] - 3.0).abs() < 1e-4);

        let xs = Tensor::new(&[[1f32]], &device).unwrap();
        let y: Vec<Vec<f32>> = driver.predict(&xs).unwrap().to_vec2().unwrap();
        assert!((y[0][0] - 8.0).abs() < 1e-3);
    }

    #[test]
    fn debug_names_the_model() {
        let driver = fitted_regressor(&line());
        let text = format!("{driver:?}");
        assert!(text.contains("SnapshotEnsembleRegressor"));
        assert!(text.contains("n_estimators: 2"));
    }
}
