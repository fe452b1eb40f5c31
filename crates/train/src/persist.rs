//! Ensemble persistence.
//!
//! Layout of a checkpoint directory:
//!
//! ```text
//! {Model}_{Arch}_{n_estimators}_ckpt/
//!   manifest.json            architecture, output mode, member list
//!   snapshot_0.safetensors
//!   snapshot_1.safetensors
//!   ...
//! ```
//!
//! The manifest is written last, so a directory whose manifest parses always
//! refers to complete snapshot files.

use std::path::{Path, PathBuf};

use candle_core::Device;
use serde::{Deserialize, Serialize};

use snapens_core::{Architecture, Ensemble, EnsembleError, OutputMode, ParamSet, Result, Snapshot};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Everything besides tensor data needed to rebuild an ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest<A> {
    pub model: String,
    pub architecture: A,
    pub mode: OutputMode,
    pub n_estimators: usize,
    #[serde(default)]
    pub n_outputs: Option<usize>,
    pub criterion: String,
    pub snapshots: Vec<String>,
}

/// Directory name for a model, e.g. `SnapshotEnsembleClassifier_Mlp_5_ckpt`.
pub fn checkpoint_name(model: &str, arch: &str, n_estimators: usize) -> String {
    format!("{model}_{arch}_{n_estimators}_ckpt")
}

fn snapshot_file(index: usize) -> String {
    format!("snapshot_{index}.safetensors")
}

/// Write `ensemble` into `dir`, creating it if needed. Overwrites a previous
/// save in the same directory.
pub fn save<A: Architecture>(
    ensemble: &Ensemble<A>,
    model: &str,
    n_estimators: usize,
    criterion: &str,
    dir: &Path,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let mut snapshots = Vec::with_capacity(ensemble.len());
    for (i, member) in ensemble.members().iter().enumerate() {
        let file = snapshot_file(i);
        member.params().save(&dir.join(&file))?;
        snapshots.push(file);
    }

    let manifest = Manifest {
        model: model.to_string(),
        architecture: ensemble.arch().clone(),
        mode: ensemble.mode(),
        n_estimators,
        n_outputs: ensemble.n_outputs(),
        criterion: criterion.to_string(),
        snapshots,
    };
    let path = dir.join(MANIFEST_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&manifest)?)?;
    tracing::info!(
        path = %dir.display(),
        snapshots = manifest.snapshots.len(),
        "Saved ensemble"
    );
    Ok(dir.to_path_buf())
}

/// Read only the manifest of a checkpoint directory.
pub fn load_manifest<A: Architecture>(dir: &Path) -> Result<Manifest<A>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Err(EnsembleError::state(format!(
            "no {MANIFEST_FILE} in {}",
            dir.display()
        )));
    }
    let json = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Rebuild a saved ensemble on `device`.
pub fn load<A: Architecture>(dir: &Path, device: &Device) -> Result<(Manifest<A>, Ensemble<A>)> {
    let manifest: Manifest<A> = load_manifest(dir)?;
    let mut ensemble = Ensemble::new(manifest.architecture.clone(), manifest.mode);
    if let Some(n) = manifest.n_outputs {
        ensemble.set_n_outputs(n);
    }
    for file in &manifest.snapshots {
        let path = dir.join(file);
        if !path.is_file() {
            return Err(EnsembleError::state(format!(
                "snapshot {} listed in manifest is missing",
                path.display()
            )));
        }
        let params = ParamSet::load(&path, device)?;
        ensemble.append(Snapshot::materialize(&manifest.architecture, params, device)?);
    }
    tracing::info!(
        path = %dir.display(),
        snapshots = ensemble.len(),
        "Loaded ensemble"
    );
    Ok((manifest, ensemble))
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Tensor;
    use snapens_common::MlpConfig;
    use snapens_core::{BaseEstimator, Voting};

    fn config() -> MlpConfig {
        MlpConfig {
            input_size: 3,
            output_size: 2,
            hidden_sizes: vec![4],
            ..Default::default()
        }
    }

    fn random_member(device: &Device) -> Snapshot<MlpConfig> {
        let (varmap, _model) = BaseEstimator::Architecture(config())
            .instantiate(device)
            .unwrap();
        let params = ParamSet::from_varmap(&varmap).unwrap();
        Snapshot::materialize(&config(), params, device).unwrap()
    }

    #[test]
    fn round_trip_keeps_predictions() {
        let device = Device::Cpu;
        let mut ensemble = Ensemble::new(config(), OutputMode::Classification(Voting::Soft));
        ensemble.set_n_outputs(2);
        ensemble.append(random_member(&device));
        ensemble.append(random_member(&device));

        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join(checkpoint_name("SnapshotEnsembleClassifier", "Mlp", 2));
        save(&ensemble, "SnapshotEnsembleClassifier", 2, "cross_entropy", &dir).unwrap();

        let (manifest, loaded) = load::<MlpConfig>(&dir, &device).unwrap();
        assert_eq!(manifest.snapshots.len(), 2);
        assert_eq!(manifest.architecture, config());
        assert_eq!(loaded.n_outputs(), Some(2));
        assert_eq!(loaded.mode(), ensemble.mode());

        let xs = Tensor::randn(0f32, 1.0, (5, 3), &device).unwrap();
        let before: Vec<Vec<f32>> = ensemble.predict(&xs).unwrap().to_vec2().unwrap();
        let after: Vec<Vec<f32>> = loaded.predict(&xs).unwrap().to_vec2().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn missing_snapshot_is_a_state_error() {
        let device = Device::Cpu;
        let mut ensemble = Ensemble::new(config(), OutputMode::Regression);
        ensemble.append(random_member(&device));
        let tmp = tempfile::tempdir().unwrap();
        save(&ensemble, "SnapshotEnsembleRegressor", 1, "mse", tmp.path()).unwrap();
        std::fs::remove_file(tmp.path().join("snapshot_0.safetensors")).unwrap();

        let err = load::<MlpConfig>(tmp.path(), &device).unwrap_err();
        assert!(err.is_state());
    }

    #[test]
    fn empty_directory_has_no_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(load_manifest::<MlpConfig>(tmp.path()).unwrap_err().is_state());
    }

    #[test]
    fn checkpoint_names() {
        assert_eq!(
            checkpoint_name("SnapshotEnsembleRegressor", "Mlp", 5),
            "SnapshotEnsembleRegressor_Mlp_5_ckpt"
        );
    }
}
