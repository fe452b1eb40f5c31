//! Training criteria.

use candle_core::{Result, Tensor};
use candle_nn::loss;

/// `(output, target) -> scalar loss` for custom criteria.
pub type LossFn = fn(&Tensor, &Tensor) -> Result<Tensor>;

/// Loss used to train the live model (and to score regression validation).
#[derive(Clone, Copy)]
pub enum Criterion {
    /// Logits `(rows, classes)` against `u32` labels `(rows,)`.
    CrossEntropy,
    /// Mean squared error over equally shaped tensors.
    Mse,
    Custom { name: &'static str, loss: LossFn },
}

impl Criterion {
    pub fn loss(&self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        match self {
            Self::CrossEntropy => loss::cross_entropy(output, target),
            Self::Mse => loss::mse(output, target),
            Self::Custom { loss: f, .. } => f(output, target),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CrossEntropy => "cross_entropy",
            Self::Mse => "mse",
            Self::Custom { name, .. } => *name,
        }
    }
}

impl std::fmt::Debug for Criterion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Criterion({})", self.name())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn l1(output: &Tensor, target: &Tensor) -> Result<Tensor> {
        (output - target)?.abs()?.mean_all()
    }

    #[test]
    fn mse_of_known_values() {
        let out = Tensor::new(&[[1f32, 2.0], [3.0, 4.0]], &Device::Cpu).unwrap();
        let tgt = Tensor::new(&[[1f32, 0.0], [3.0, 6.0]], &Device::Cpu).unwrap();
        let l = Criterion::Mse.loss(&out, &tgt).unwrap();
        assert!((l.to_scalar::<f32>().unwrap() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn cross_entropy_of_uniform_logits_is_log_classes() {
        let logits = Tensor::zeros((3, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
        let labels = Tensor::new(&[0u32, 1, 3], &Device::Cpu).unwrap();
        let l = Criterion::CrossEntropy.loss(&logits, &labels).unwrap();
        assert!((l.to_scalar::<f32>().unwrap() - 4f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn custom_criterion_is_called() {
        let c = Criterion::Custom { name: "l1", loss: l1 };
        let out = Tensor::new(&[1f32, -1.0], &Device::Cpu).unwrap();
        let tgt = Tensor::new(&[0f32, 0.0], &Device::Cpu).unwrap();
        assert_eq!(c.loss(&out, &tgt).unwrap().to_scalar::<f32>().unwrap(), 1.0);
        assert_eq!(format!("{c:?}"), "Criterion(l1)");
    }
}
