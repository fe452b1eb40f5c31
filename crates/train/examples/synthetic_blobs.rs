//! Example: snapshot ensemble on Gaussian blobs.
//!
//! Run:
//!   RUST_LOG=info cargo run -p snapens-train --example synthetic_blobs -- --n_estimators 5 --epochs 20

use std::path::PathBuf;

use candle_core::Device;
use clap::Parser;
use rand::{Rng, SeedableRng};

use snapens_common::{MlpConfig, TabularDataset};
use snapens_core::{BaseEstimator, Voting};
use snapens_train::{
    FitOptions, OptimizerKind, OptimizerOptions, SnapshotEnsembleClassifier, TracingTelemetry,
};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = "3")]
    classes: usize,
    #[arg(long, default_value = "600")]
    rows: usize,
    #[arg(long, default_value = "32")]
    batch_size: usize,
    #[arg(long, default_value = "5")]
    n_estimators: usize,
    #[arg(long, default_value = "20")]
    epochs: usize,
    #[arg(long, default_value = "0.05")]
    lr: f64,
    #[arg(long, default_value = "soft", value_parser = ["soft", "hard"])]
    voting: String,
    #[arg(long, default_value = "0")]
    seed: u64,
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

fn blobs(rows: usize, classes: usize, seed: u64) -> (Vec<f32>, Vec<u32>) {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut features = Vec::with_capacity(rows * 2);
    let mut labels = Vec::with_capacity(rows);
    for i in 0..rows {
        let class = i % classes;
        let angle = std::f32::consts::TAU * class as f32 / classes as f32;
        features.push(3.0 * angle.cos() + rng.gen_range(-1.0f32..1.0));
        features.push(3.0 * angle.sin() + rng.gen_range(-1.0f32..1.0));
        labels.push(class as u32);
    }
    (features, labels)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let (features, labels) = blobs(args.rows, args.classes, args.seed);
    let train =
        TabularDataset::classification(features, 2, labels, args.batch_size)?.with_shuffle(args.seed);
    let (features, labels) = blobs(args.rows / 4, args.classes, args.seed + 1);
    let test = TabularDataset::classification(features, 2, labels, args.batch_size)?;

    let arch = MlpConfig {
        input_size: 2,
        output_size: args.classes,
        hidden_sizes: vec![32, 32],
        ..Default::default()
    };
    let voting: Voting = args.voting.parse()?;
    let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);

    let mut clf =
        SnapshotEnsembleClassifier::new(BaseEstimator::Architecture(arch), args.n_estimators, voting, device);
    clf.set_optimizer(
        OptimizerKind::Sgd,
        OptimizerOptions {
            lr: args.lr,
            ..Default::default()
        },
    );
    clf.set_telemetry(TracingTelemetry);

    let options = FitOptions {
        epochs: args.epochs,
        log_interval: 5,
        save_model: args.save_dir.is_some(),
        save_dir: args.save_dir,
        ..Default::default()
    };
    let report = clf.fit(&train, Some(&test), &options)?;
    let (acc, loss) = clf.evaluate_with_loss(&test)?;

    tracing::info!(
        snapshots = report.snapshot_iterations.len(),
        accuracy = format!("{acc:.2}%"),
        loss = format!("{loss:.4}"),
        "done"
    );
    Ok(())
}
