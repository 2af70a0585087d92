//! Directory-backed storage for the per-epoch trajectory of model snapshots.
//!
//! One store owns one uniquely named run directory under a caller-supplied
//! base path. Each completed epoch writes a full parameter snapshot
//! (safetensors) under `epoch{i}`; early-stop finalization writes one more
//! under `earlystop`. A `meta.json` sidecar makes the run self-describing.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::error::{RieszError, RieszResult};

/// Key a snapshot is saved and loaded under.
///
/// Rendered to the exact on-disk file names `epoch{i}` and `earlystop`; the
/// extensionless names are part of the layout contract even though the file
/// content is safetensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointKey {
    /// Snapshot written after the epoch with this index completed
    Epoch(usize),
    /// The best-on-validation snapshot written at finalization
    EarlyStop,
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epoch(i) => write!(f, "epoch{i}"),
            Self::EarlyStop => write!(f, "earlystop"),
        }
    }
}

/// Metadata sidecar written beside the checkpoints at finalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    /// Epochs actually executed (early-stop epoch + 1 on early exit)
    pub n_epochs: usize,
    /// Whether the patience threshold ended the run
    pub early_stopped: bool,
    /// Epoch holding the best validation loss, when a validation set was used
    pub best_epoch: Option<usize>,
    /// The best validation loss observed
    pub best_val_loss: Option<f64>,
}

/// A run directory full of parameter snapshots.
///
/// The directory is created uniquely under the base path, so concurrent or
/// repeated fits never collide; it is removed when the store is dropped.
pub struct CheckpointStore {
    run_dir: TempDir,
}

impl CheckpointStore {
    /// Create the base directory if absent and a fresh run directory inside it.
    pub fn create(base_dir: &Path) -> RieszResult<Self> {
        fs::create_dir_all(base_dir)?;
        let run_dir = tempfile::Builder::new()
            .prefix("riesz-run-")
            .tempdir_in(base_dir)?;
        tracing::debug!(run_dir = %run_dir.path().display(), "created run directory");
        Ok(Self { run_dir })
    }

    /// Path of the run directory owned by this store.
    pub fn run_dir(&self) -> &Path {
        self.run_dir.path()
    }

    fn path(&self, key: CheckpointKey) -> PathBuf {
        self.run_dir.path().join(key.to_string())
    }

    /// Whether a snapshot was ever saved under `key`.
    pub fn contains(&self, key: CheckpointKey) -> bool {
        self.path(key).is_file()
    }

    /// Serialize the full parameter state under `key`, overwriting any
    /// previous snapshot with the same key.
    pub fn save(&self, key: CheckpointKey, var_map: &VarMap) -> RieszResult<()> {
        let path = self.path(key);
        var_map.save(&path)?;
        tracing::debug!(key = %key, path = %path.display(), "saved checkpoint");
        Ok(())
    }

    /// Restore the parameter state saved under `key` into a
    /// same-architecture map.
    ///
    /// Fails with [`RieszError::CheckpointNotFound`] when the key was never
    /// saved; a corrupted file surfaces as a deserialization failure from
    /// candle.
    pub fn load(&self, key: CheckpointKey, var_map: &VarMap, device: &Device) -> RieszResult<()> {
        let path = self.path(key);
        if !path.is_file() {
            return Err(RieszError::CheckpointNotFound(key));
        }
        let tensors = candle_core::safetensors::load(&path, device)?;
        let data = var_map.data().lock().unwrap();
        for (name, var) in data.iter() {
            let tensor = tensors.get(name).ok_or_else(|| {
                candle_core::Error::Msg(format!("checkpoint {key} has no tensor named {name}"))
            })?;
            var.set(tensor)?;
        }
        Ok(())
    }

    /// Write the `meta.json` sidecar.
    pub fn write_meta(&self, meta: &RunMeta) -> RieszResult<()> {
        let path = self.run_dir.path().join("meta.json");
        fs::write(&path, serde_json::to_vec_pretty(meta)?)?;
        Ok(())
    }

    /// Read the `meta.json` sidecar back.
    pub fn read_meta(&self) -> RieszResult<RunMeta> {
        let path = self.run_dir.path().join("meta.json");
        Ok(serde_json::from_slice(&fs::read(&path)?)?)
    }
}

/// Deep-copy the current parameter state, detached from the autograd graph.
pub fn snapshot_vars(var_map: &VarMap) -> candle_core::Result<Vec<(String, Tensor)>> {
    let data = var_map.data().lock().unwrap();
    let mut snapshot = Vec::with_capacity(data.len());
    for (name, var) in data.iter() {
        snapshot.push((name.clone(), var.as_tensor().detach().copy()?));
    }
    Ok(snapshot)
}

/// Write a snapshot from [`snapshot_vars`] back into the map's variables.
pub fn restore_vars(var_map: &VarMap, snapshot: &[(String, Tensor)]) -> candle_core::Result<()> {
    let data = var_map.data().lock().unwrap();
    for (name, tensor) in snapshot {
        let var = data.get(name).ok_or_else(|| {
            candle_core::Error::Msg(format!("snapshot has no matching variable {name}"))
        })?;
        var.set(tensor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::VarBuilder;
    use tempfile::TempDir;

    fn test_map(seed: f32) -> VarMap {
        let var_map = VarMap::new();
        let vb = VarBuilder::from_varmap(&var_map, DType::F32, &Device::Cpu);
        vb.get_with_hints((2, 3), "w", candle_nn::init::Init::Const(seed as f64))
            .unwrap();
        vb.get_with_hints(2, "b", candle_nn::init::Init::Const(-seed as f64))
            .unwrap();
        var_map
    }

    fn flat(var_map: &VarMap) -> Vec<f32> {
        let data = var_map.data().lock().unwrap();
        let mut named: Vec<_> = data.iter().collect();
        named.sort_by(|a, b| a.0.cmp(b.0));
        named
            .iter()
            .flat_map(|(_, v)| v.flatten_all().unwrap().to_vec1::<f32>().unwrap())
            .collect()
    }

    #[test]
    fn test_key_file_names() {
        assert_eq!(CheckpointKey::Epoch(0).to_string(), "epoch0");
        assert_eq!(CheckpointKey::Epoch(17).to_string(), "epoch17");
        assert_eq!(CheckpointKey::EarlyStop.to_string(), "earlystop");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let base = TempDir::new().unwrap();
        let store = CheckpointStore::create(base.path()).unwrap();

        let saved = test_map(3.0);
        store.save(CheckpointKey::Epoch(0), &saved).unwrap();

        let restored = test_map(0.0);
        store
            .load(CheckpointKey::Epoch(0), &restored, &Device::Cpu)
            .unwrap();
        assert_eq!(flat(&saved), flat(&restored));
    }

    #[test]
    fn test_save_overwrites_existing_key() {
        let base = TempDir::new().unwrap();
        let store = CheckpointStore::create(base.path()).unwrap();

        store.save(CheckpointKey::Epoch(0), &test_map(1.0)).unwrap();
        store.save(CheckpointKey::Epoch(0), &test_map(2.0)).unwrap();

        let restored = test_map(0.0);
        store
            .load(CheckpointKey::Epoch(0), &restored, &Device::Cpu)
            .unwrap();
        assert_eq!(flat(&restored), flat(&test_map(2.0)));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let base = TempDir::new().unwrap();
        let store = CheckpointStore::create(base.path()).unwrap();

        let err = store
            .load(CheckpointKey::EarlyStop, &test_map(0.0), &Device::Cpu)
            .unwrap_err();
        assert!(matches!(
            err,
            RieszError::CheckpointNotFound(CheckpointKey::EarlyStop)
        ));
    }

    #[test]
    fn test_run_dirs_are_unique() {
        let base = TempDir::new().unwrap();
        let a = CheckpointStore::create(base.path()).unwrap();
        let b = CheckpointStore::create(base.path()).unwrap();
        assert_ne!(a.run_dir(), b.run_dir());
    }

    #[test]
    fn test_run_dir_removed_on_drop() {
        let base = TempDir::new().unwrap();
        let store = CheckpointStore::create(base.path()).unwrap();
        let run_dir = store.run_dir().to_path_buf();
        store.save(CheckpointKey::Epoch(0), &test_map(1.0)).unwrap();
        drop(store);
        assert!(!run_dir.exists());
    }

    #[test]
    fn test_meta_sidecar_roundtrip() {
        let base = TempDir::new().unwrap();
        let store = CheckpointStore::create(base.path()).unwrap();
        store
            .write_meta(&RunMeta {
                n_epochs: 7,
                early_stopped: true,
                best_epoch: Some(3),
                best_val_loss: Some(0.25),
            })
            .unwrap();
        let meta = store.read_meta().unwrap();
        assert_eq!(meta.n_epochs, 7);
        assert!(meta.early_stopped);
        assert_eq!(meta.best_epoch, Some(3));
        assert_eq!(meta.best_val_loss, Some(0.25));
    }

    #[test]
    fn test_snapshot_restore() {
        let var_map = test_map(1.0);
        let snapshot = snapshot_vars(&var_map).unwrap();
        let before = flat(&var_map);

        // Mutate in place, then roll back.
        let data = var_map.data().lock().unwrap();
        for (_, var) in data.iter() {
            let bumped = (var.as_tensor() + 5.0).unwrap();
            var.set(&bumped).unwrap();
        }
        drop(data);
        assert_ne!(flat(&var_map), before);

        restore_vars(&var_map, &snapshot).unwrap();
        assert_eq!(flat(&var_map), before);
    }
}
