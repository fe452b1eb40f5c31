use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use candle_core::{Device, Tensor};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use snapens_common::{load_features, BatchDataset, MlpConfig, TabularDataset, TargetKind};
use snapens_core::{BaseEstimator, OutputMode, Voting};
use snapens_train::persist::load_manifest;
use snapens_train::telemetry::TRAIN_LOSS;
use snapens_train::{
    CsvTelemetry, FitOptions, MultiTelemetry, OptimizerKind, OptimizerOptions, SnapshotEnsemble,
    TelemetrySink, TracingTelemetry,
};

#[derive(Parser, Debug)]
#[command(name = "snapens", about = "Snapshot ensembles of small neural networks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a snapshot ensemble on a CSV / JSONL table.
    Train(TrainArgs),
    /// Write ensemble predictions for a feature-only table.
    Predict(PredictArgs),
    /// Score a saved ensemble on a labelled table.
    Evaluate(EvaluateArgs),
}

// ── Train ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct TrainArgs {
    /// Base estimator config; created from the data shape if missing.
    #[arg(long, default_value = "mlp.json")]
    config: PathBuf,
    #[arg(long)]
    train: PathBuf,
    #[arg(long)]
    val: Option<PathBuf>,
    #[arg(long, default_value = "classification", value_parser = ["classification", "regression"])]
    task: String,
    #[arg(long, default_value = "soft", value_parser = ["soft", "hard"])]
    voting: String,
    /// Number of trailing target columns (regression only).
    #[arg(long, default_value_t = 1)]
    target_width: usize,
    #[arg(long, default_value_t = 5)]
    n_estimators: usize,
    #[arg(long, default_value_t = 100)]
    epochs: usize,
    #[arg(long, default_value_t = 32)]
    batch_size: usize,
    #[arg(long, default_value = "adam")]
    optimizer: String,
    #[arg(long, default_value_t = 1e-3)]
    lr: f64,
    #[arg(long, default_value_t = 0.0)]
    weight_decay: f64,
    /// Lower and upper learning-rate bound.
    #[arg(long, num_args = 2, value_names = ["LOW", "HIGH"])]
    lr_clip: Option<Vec<f64>>,
    #[arg(long, default_value_t = 100)]
    log_interval: usize,
    #[arg(long, default_value = ".")]
    save_dir: PathBuf,
    #[arg(long)]
    no_save: bool,
    /// Also write every metric to this CSV file.
    #[arg(long)]
    metrics_csv: Option<PathBuf>,
    /// Shuffle training rows every epoch with this seed.
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    cpu: bool,
}

// ── Predict / Evaluate ─────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
struct PredictArgs {
    /// Checkpoint directory (contains manifest.json).
    #[arg(long)]
    model_dir: PathBuf,
    #[arg(long)]
    input: PathBuf,
    /// Output CSV; stdout if omitted.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Emit arg-max class ids instead of probabilities.
    #[arg(long)]
    classes: bool,
    #[arg(long)]
    cpu: bool,
}

#[derive(Parser, Debug)]
struct EvaluateArgs {
    #[arg(long)]
    model_dir: PathBuf,
    #[arg(long)]
    data: PathBuf,
    #[arg(long, default_value_t = 256)]
    batch_size: usize,
    #[arg(long)]
    cpu: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Train(args) => cmd_train(args),
        Command::Predict(args) => cmd_predict(args),
        Command::Evaluate(args) => cmd_evaluate(args),
    }
}

fn device(cpu: bool) -> Device {
    if cpu {
        Device::Cpu
    } else {
        Device::cuda_if_available(0).unwrap_or(Device::Cpu)
    }
}

// ── Progress ───────────────────────────────────────────────────────────────────

/// Drives a progress bar from training-loss events.
struct ProgressTelemetry {
    pb: ProgressBar,
}

impl ProgressTelemetry {
    fn new(total_iterations: usize) -> Result<Self> {
        let pb = ProgressBar::new(total_iterations as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} iters {msg}")?
                .progress_chars("=>-"),
        );
        Ok(Self { pb })
    }
}

impl TelemetrySink for ProgressTelemetry {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        if tag == TRAIN_LOSS {
            self.pb.set_position(step as u64);
            self.pb.set_message(format!("loss {value:.4}"));
        }
    }
}

impl Drop for ProgressTelemetry {
    fn drop(&mut self) {
        self.pb.finish_with_message("done");
    }
}

// ── Command implementations ────────────────────────────────────────────────────

fn cmd_train(args: TrainArgs) -> Result<()> {
    let classification = args.task == "classification";
    let kind = if classification {
        TargetKind::Class
    } else {
        TargetKind::Value
    };

    let mut train = TabularDataset::from_file(&args.train, kind, args.target_width, args.batch_size)
        .with_context(|| format!("reading {}", args.train.display()))?;
    if let Some(seed) = args.seed {
        train = train.with_shuffle(seed);
    }
    let val = args
        .val
        .as_ref()
        .map(|p| TabularDataset::from_file(p, kind, args.target_width, args.batch_size))
        .transpose()?;
    eprintln!(
        "Training rows: {} ({} batches of {})",
        train.num_rows(),
        train.num_batches(),
        args.batch_size
    );

    let n_outputs = if classification {
        train.distinct_labels().len()
    } else {
        train.target_width()
    };
    let arch = if args.config.exists() {
        MlpConfig::load(&args.config)?
    } else {
        let default = MlpConfig {
            input_size: train.num_features(),
            output_size: n_outputs,
            ..Default::default()
        };
        default.save(&args.config)?;
        eprintln!("Created default config at {}", args.config.display());
        default
    };
    if arch.input_size != train.num_features() {
        bail!(
            "config expects {} features but {} has {}",
            arch.input_size,
            args.train.display(),
            train.num_features()
        );
    }
    tracing::info!(params = arch.num_params(), layers = ?arch.layer_dims(), "Base estimator");

    let mode = if classification {
        OutputMode::Classification(args.voting.parse::<Voting>()?)
    } else {
        OutputMode::Regression
    };
    let mut ensemble = SnapshotEnsemble::new(
        BaseEstimator::Architecture(arch),
        args.n_estimators,
        mode,
        device(args.cpu),
    );
    ensemble.set_optimizer(
        args.optimizer.parse::<OptimizerKind>()?,
        OptimizerOptions {
            lr: args.lr,
            weight_decay: args.weight_decay,
            ..Default::default()
        },
    );

    let mut telemetry = MultiTelemetry::new()
        .with(TracingTelemetry)
        .with(ProgressTelemetry::new(args.epochs * train.num_batches())?);
    if let Some(path) = &args.metrics_csv {
        telemetry = telemetry.with(CsvTelemetry::create(path)?);
    }
    ensemble.set_telemetry(telemetry);

    let options = FitOptions {
        lr_clip: args.lr_clip,
        epochs: args.epochs,
        log_interval: args.log_interval,
        save_model: !args.no_save,
        save_dir: Some(args.save_dir),
    };
    let report = ensemble.fit(&train, val.as_ref().map(|v| v as &dyn BatchDataset), &options)?;

    eprintln!(
        "Collected {} snapshots over {} iterations",
        report.snapshot_iterations.len(),
        report.total_iterations
    );
    if let Some(best) = report.best_score {
        eprintln!("Best validation score: {best:.4}");
    }
    if let Some(dir) = report.checkpoint {
        eprintln!("Saved to {}", dir.display());
    }
    Ok(())
}

fn load_ensemble(dir: &Path, cpu: bool) -> Result<SnapshotEnsemble<MlpConfig>> {
    let ensemble = SnapshotEnsemble::<MlpConfig>::load(dir, device(cpu))
        .with_context(|| format!("loading ensemble from {}", dir.display()))?;
    eprintln!(
        "Loaded {} ({} snapshots)",
        ensemble.model_name(),
        ensemble.ensemble().len()
    );
    Ok(ensemble)
}

fn cmd_predict(args: PredictArgs) -> Result<()> {
    let ensemble = load_ensemble(&args.model_dir, args.cpu)?;
    let (features, num_features) = load_features(&args.input)?;
    if num_features == 0 || features.is_empty() {
        bail!("{} has no feature rows", args.input.display());
    }
    let rows = features.len() / num_features;
    let xs = Tensor::from_vec(features, (rows, num_features), ensemble.device())?;

    let mut out: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(std::io::BufWriter::new(std::fs::File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };
    if args.classes {
        if !ensemble.mode().is_classification() {
            bail!("--classes needs a classification ensemble");
        }
        for class in ensemble.ensemble().predict_classes(&xs)? {
            writeln!(out, "{class}")?;
        }
    } else {
        for row in ensemble.predict(&xs)?.to_vec2::<f32>()? {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(out, "{}", line.join(","))?;
        }
    }
    out.flush()?;
    Ok(())
}

fn cmd_evaluate(args: EvaluateArgs) -> Result<()> {
    let manifest = load_manifest::<MlpConfig>(&args.model_dir)?;
    let (kind, width) = match manifest.mode {
        OutputMode::Classification(_) => (TargetKind::Class, 1),
        OutputMode::Regression => (TargetKind::Value, manifest.architecture.output_size),
    };
    let data = TabularDataset::from_file(&args.data, kind, width, args.batch_size)?;
    let ensemble = load_ensemble(&args.model_dir, args.cpu)?;

    let evaluation = ensemble.evaluate(&data)?;
    match evaluation.accuracy {
        Some(acc) => println!("accuracy={acc:.3} loss={:.5}", evaluation.loss),
        None => println!("loss={:.5}", evaluation.loss),
    }
    Ok(())
}
