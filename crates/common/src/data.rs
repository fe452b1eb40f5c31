//! Data pipeline: tabular loading, shuffling, batching.
//!
//! Rows come from CSV (targets in the trailing columns) or JSONL
//! (`{"features": [...], "target": ...}`). Batches are row-major `f32`
//! features plus either class labels or regression targets.
//!
//! * **[`TabularDataset`]** — in-memory rows; call [`BatchDataset::batches`]
//!   once per epoch. Restartable, optionally reshuffled every pass.
//! * **[`batch_to_tensors`]** — raw batch → `(inputs, targets)` tensors.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result as AnyhowResult};
use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

// ── Targets ─────────────────────────────────────────────────────────────────

/// What the target columns hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// One integer class label per row.
    Class,
    /// One or more real-valued targets per row.
    Value,
}

/// Targets of one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum RawTargets {
    Labels(Vec<u32>),
    /// Row-major, `rows * width` values.
    Values { values: Vec<f32>, width: usize },
}

/// One batch before it is moved onto a device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub rows: usize,
    pub num_features: usize,
    /// Row-major, `rows * num_features` values.
    pub features: Vec<f32>,
    pub targets: RawTargets,
}

// ── BatchDataset trait ──────────────────────────────────────────────────────

/// A finite, restartable source of batches.
///
/// `num_batches` must be known before iteration and must equal the number of
/// items every call to `batches` yields.
pub trait BatchDataset {
    fn num_batches(&self) -> usize;
    fn num_features(&self) -> usize;
    fn target_kind(&self) -> TargetKind;
    fn batches(&self) -> Box<dyn Iterator<Item = RawBatch> + '_>;
}

// ── TabularDataset (in-memory) ──────────────────────────────────────────────

/// In-memory table of rows.
pub struct TabularDataset {
    features: Vec<f32>,
    num_features: usize,
    labels: Vec<u32>,
    values: Vec<f32>,
    target_kind: TargetKind,
    target_width: usize,
    batch_size: usize,
    shuffle_seed: Option<u64>,
    passes: Cell<u64>,
}

impl TabularDataset {
    /// Classification table. `features.len()` must equal `labels.len() * num_features`.
    pub fn classification(
        features: Vec<f32>,
        num_features: usize,
        labels: Vec<u32>,
        batch_size: usize,
    ) -> AnyhowResult<Self> {
        if num_features == 0 || features.len() != labels.len() * num_features {
            anyhow::bail!(
                "feature buffer of {} values does not hold {} rows of {} features",
                features.len(),
                labels.len(),
                num_features
            );
        }
        Self::build(
            features,
            num_features,
            labels,
            Vec::new(),
            TargetKind::Class,
            1,
            batch_size,
        )
    }

    /// Regression table with `target_width` targets per row.
    pub fn regression(
        features: Vec<f32>,
        num_features: usize,
        values: Vec<f32>,
        target_width: usize,
        batch_size: usize,
    ) -> AnyhowResult<Self> {
        if num_features == 0 || target_width == 0 {
            anyhow::bail!("num_features and target_width must be positive");
        }
        let rows = features.len() / num_features;
        if features.len() != rows * num_features || values.len() != rows * target_width {
            anyhow::bail!(
                "inconsistent buffers: {} feature values, {} target values for width {}/{}",
                features.len(),
                values.len(),
                num_features,
                target_width
            );
        }
        Self::build(
            features,
            num_features,
            Vec::new(),
            values,
            TargetKind::Value,
            target_width,
            batch_size,
        )
    }

    fn build(
        features: Vec<f32>,
        num_features: usize,
        labels: Vec<u32>,
        values: Vec<f32>,
        target_kind: TargetKind,
        target_width: usize,
        batch_size: usize,
    ) -> AnyhowResult<Self> {
        if batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        Ok(Self {
            features,
            num_features,
            labels,
            values,
            target_kind,
            target_width,
            batch_size,
            shuffle_seed: None,
            passes: Cell::new(0),
        })
    }

    /// Load a CSV file. The last `target_width` columns are targets (a single
    /// integer label column for [`TargetKind::Class`]). A first line that does
    /// not parse as numbers is treated as a header and skipped.
    ///
    /// Files ending in `.jsonl` / `.json` are read as one JSON object per line.
    pub fn from_file(
        path: &Path,
        target_kind: TargetKind,
        target_width: usize,
        batch_size: usize,
    ) -> AnyhowResult<Self> {
        let is_jsonl = path
            .extension()
            .map(|e| e == "jsonl" || e == "json")
            .unwrap_or(false);
        let target_width = match target_kind {
            TargetKind::Class => 1,
            TargetKind::Value => target_width.max(1),
        };
        let reader = BufReader::new(File::open(path).context("open data file")?);

        let mut features = Vec::new();
        let mut targets = Vec::new();
        let mut num_features = 0usize;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let row = if is_jsonl {
                parse_json_row(line)
                    .with_context(|| format!("{}:{}", path.display(), line_no + 1))?
            } else {
                match parse_csv_row(line, target_width) {
                    Ok(row) => row,
                    Err(_) if line_no == 0 => continue,
                    Err(e) => {
                        return Err(e.context(format!("{}:{}", path.display(), line_no + 1)))
                    }
                }
            };
            let (row_features, row_targets) = row;
            if num_features == 0 {
                num_features = row_features.len();
            } else if row_features.len() != num_features {
                anyhow::bail!(
                    "{}:{}: expected {} features, found {}",
                    path.display(),
                    line_no + 1,
                    num_features,
                    row_features.len()
                );
            }
            if row_targets.len() != target_width {
                anyhow::bail!(
                    "{}:{}: expected {} targets, found {}",
                    path.display(),
                    line_no + 1,
                    target_width,
                    row_targets.len()
                );
            }
            features.extend(row_features);
            targets.extend(row_targets);
        }
        if features.is_empty() {
            anyhow::bail!("no rows in {}", path.display());
        }

        match target_kind {
            TargetKind::Class => {
                let labels = targets
                    .iter()
                    .map(|&t| {
                        if t < 0.0 || t.fract() != 0.0 {
                            anyhow::bail!("class label {t} is not a non-negative integer");
                        }
                        Ok(t as u32)
                    })
                    .collect::<AnyhowResult<Vec<_>>>()?;
                Self::classification(features, num_features, labels, batch_size)
            }
            TargetKind::Value => {
                Self::regression(features, num_features, targets, target_width, batch_size)
            }
        }
    }

    /// Reshuffle row order on every pass, seeded by `seed + pass index`.
    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    pub fn num_rows(&self) -> usize {
        self.features.len() / self.num_features
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn target_width(&self) -> usize {
        self.target_width
    }

    /// Distinct class labels (empty for regression tables).
    pub fn distinct_labels(&self) -> BTreeSet<u32> {
        self.labels.iter().copied().collect()
    }

    fn row_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.num_rows()).collect();
        if let Some(seed) = self.shuffle_seed {
            let pass = self.passes.get();
            let mut rng = StdRng::seed_from_u64(seed.wrapping_add(pass));
            order.shuffle(&mut rng);
        }
        self.passes.set(self.passes.get() + 1);
        order
    }

    fn gather(&self, rows: &[usize]) -> RawBatch {
        let nf = self.num_features;
        let mut features = Vec::with_capacity(rows.len() * nf);
        for &r in rows {
            features.extend_from_slice(&self.features[r * nf..(r + 1) * nf]);
        }
        let targets = match self.target_kind {
            TargetKind::Class => RawTargets::Labels(rows.iter().map(|&r| self.labels[r]).collect()),
            TargetKind::Value => {
                let w = self.target_width;
                let mut values = Vec::with_capacity(rows.len() * w);
                for &r in rows {
                    values.extend_from_slice(&self.values[r * w..(r + 1) * w]);
                }
                RawTargets::Values { values, width: w }
            }
        };
        RawBatch {
            rows: rows.len(),
            num_features: nf,
            features,
            targets,
        }
    }
}

impl BatchDataset for TabularDataset {
    fn num_batches(&self) -> usize {
        self.num_rows().div_ceil(self.batch_size)
    }

    fn num_features(&self) -> usize {
        self.num_features
    }

    fn target_kind(&self) -> TargetKind {
        self.target_kind
    }

    fn batches(&self) -> Box<dyn Iterator<Item = RawBatch> + '_> {
        let order = self.row_order();
        let batch_size = self.batch_size;
        let mut start = 0usize;
        Box::new(std::iter::from_fn(move || {
            if start >= order.len() {
                return None;
            }
            let end = (start + batch_size).min(order.len());
            let batch = self.gather(&order[start..end]);
            start = end;
            Some(batch)
        }))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Convert a raw batch to Candle tensors.
///
/// Inputs are `(rows, num_features)` `f32`; labels are `(rows,)` `u32`,
/// regression targets `(rows, width)` `f32`.
pub fn batch_to_tensors(batch: &RawBatch, device: &Device) -> Result<(Tensor, Tensor)> {
    let inputs = Tensor::from_vec(
        batch.features.clone(),
        (batch.rows, batch.num_features),
        device,
    )?;
    let targets = match &batch.targets {
        RawTargets::Labels(labels) => Tensor::from_vec(labels.clone(), (batch.rows,), device)?,
        RawTargets::Values { values, width } => {
            Tensor::from_vec(values.clone(), (batch.rows, *width), device)?
        }
    };
    Ok((inputs, targets))
}

/// Read feature-only rows (CSV or JSONL `{"features": [...]}`) for prediction.
/// Returns the row-major buffer and the feature count.
pub fn load_features(path: &Path) -> AnyhowResult<(Vec<f32>, usize)> {
    let is_jsonl = path
        .extension()
        .map(|e| e == "jsonl" || e == "json")
        .unwrap_or(false);
    let reader = BufReader::new(File::open(path).context("open feature file")?);
    let mut features = Vec::new();
    let mut num_features = 0usize;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let row = if is_jsonl {
            parse_json_row(line)?.0
        } else {
            match parse_csv_row(line, 0) {
                Ok((row, _)) => row,
                Err(_) if line_no == 0 => continue,
                Err(e) => return Err(e),
            }
        };
        if num_features == 0 {
            num_features = row.len();
        } else if row.len() != num_features {
            anyhow::bail!(
                "{}:{}: expected {} features, found {}",
                path.display(),
                line_no + 1,
                num_features,
                row.len()
            );
        }
        features.extend(row);
    }
    if num_features == 0 {
        anyhow::bail!("no rows in {}", path.display());
    }
    Ok((features, num_features))
}

/// Split a CSV line into `(features, targets)`; targets are the trailing columns.
fn parse_csv_row(line: &str, target_width: usize) -> AnyhowResult<(Vec<f32>, Vec<f32>)> {
    let mut values = line
        .split(',')
        .map(|c| {
            c.trim()
                .parse::<f32>()
                .with_context(|| format!("not a number: {c:?}"))
        })
        .collect::<AnyhowResult<Vec<_>>>()?;
    if values.len() <= target_width {
        anyhow::bail!(
            "row has {} columns, need more than {} target columns",
            values.len(),
            target_width
        );
    }
    let targets = values.split_off(values.len() - target_width);
    Ok((values, targets))
}

#[derive(Deserialize)]
struct JsonRow {
    features: Vec<f32>,
    #[serde(default)]
    target: Option<serde_json::Value>,
}

/// Parse `{"features": [...], "target": 1}` or `{"features": [...], "target": [0.5, 1.0]}`.
fn parse_json_row(line: &str) -> AnyhowResult<(Vec<f32>, Vec<f32>)> {
    let row: JsonRow = serde_json::from_str(line)?;
    let targets = match row.target {
        None => Vec::new(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|x| x as f32)
                    .ok_or_else(|| anyhow::anyhow!("non-numeric target {v}"))
            })
            .collect::<AnyhowResult<Vec<_>>>()?,
        Some(v) => vec![v
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("non-numeric target {v}"))?
            as f32],
    };
    Ok((row.features, targets))
}

// ── Tests ───────────────────────────────────────────────────────────────────
