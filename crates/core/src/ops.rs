//! Combining member outputs.

use candle_core::{DType, Tensor};

use crate::error::{EnsembleError, Result};

/// Elementwise mean of equally shaped tensors.
pub fn average(outputs: &[Tensor]) -> Result<Tensor> {
    if outputs.is_empty() {
        return Err(EnsembleError::state("cannot average zero outputs"));
    }
    Ok(Tensor::stack(outputs, 0)?.mean(0)?)
}

/// Index of the largest value in each row. Ties go to the lowest index.
pub fn argmax_rows(xs: &Tensor) -> Result<Vec<u32>> {
    let rows: Vec<Vec<f32>> = xs.to_dtype(DType::F32)?.to_vec2()?;
    Ok(rows.iter().map(|row| argmax(row) as u32).collect())
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate().skip(1) {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Hard voting over `(rows, classes)` outputs.
///
/// Every member votes for its arg-max class; the result is the per-row vote
/// share, `(rows, classes)`, each row summing to one.
pub fn majority_vote(outputs: &[Tensor]) -> Result<Tensor> {
    let first = outputs
        .first()
        .ok_or_else(|| EnsembleError::state("cannot vote over zero outputs"))?;
    let (rows, classes) = first.dims2().map_err(|_| {
        EnsembleError::data(format!(
            "voting expects (rows, classes) outputs, got shape {:?}",
            first.dims()
        ))
    })?;

    let mut counts = vec![0f32; rows * classes];
    for output in outputs {
        for (r, class) in argmax_rows(output)?.into_iter().enumerate() {
            counts[r * classes + class as usize] += 1.0;
        }
    }
    let n = outputs.len() as f32;
    counts.iter_mut().for_each(|c| *c /= n);
    Ok(Tensor::from_vec(counts, (rows, classes), first.device())?)
}

// ── Tests ───────────────────────────────────────────────────────────────────
