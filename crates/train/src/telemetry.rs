//! Scalar metric sinks.
//!
//! The driver reports `(tag, value, step)` triples. Tags used:
//!
//! * `snapshot_ensemble/Train_Loss`: step is the global iteration.
//! * `snapshot_ensemble/Validation_Acc` / `snapshot_ensemble/Validation_Loss`:
//!   step is the ensemble size.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const TRAIN_LOSS: &str = "snapshot_ensemble/Train_Loss";
pub const VALIDATION_ACC: &str = "snapshot_ensemble/Validation_Acc";
pub const VALIDATION_LOSS: &str = "snapshot_ensemble/Validation_Loss";

/// Receives scalar metric events.
pub trait TelemetrySink {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn add_scalar(&mut self, _tag: &str, _value: f64, _step: usize) {}
}

/// Re-emits events as `tracing` debug records.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        tracing::debug!(tag, value, step, "scalar");
    }
}

/// Appends `tag,step,value` rows to a CSV file.
///
/// Write failures are logged and otherwise ignored: losing a metric row must
/// not abort a training run.
pub struct CsvTelemetry {
    writer: BufWriter<File>,
}

impl CsvTelemetry {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "tag,step,value")?;
        Ok(Self { writer })
    }
}

impl TelemetrySink for CsvTelemetry {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        if let Err(e) = writeln!(self.writer, "{tag},{step},{value}").and_then(|_| self.writer.flush())
        {
            tracing::warn!(error = %e, tag, "failed to write metric row");
        }
    }
}

/// Fan-out to several sinks.
#[derive(Default)]
pub struct MultiTelemetry {
    sinks: Vec<Box<dyn TelemetrySink>>,
}

impl MultiTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl TelemetrySink for MultiTelemetry {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) {
        for sink in &mut self.sinks {
            sink.add_scalar(tag, value, step);
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
