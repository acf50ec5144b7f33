//! Checkpoint files
//!
//! A checkpoint is one file holding the run metadata, the model record and
//! the optimizer record:
//!
//! ```text
//! <save>/checkpoint.pth.tar      latest state, rewritten after every epoch
//! <save>/alexnet_model.pth.tar   copy of the latest file from the best epoch
//! ```
//!
//! Files are encoded with burn's named MessagePack recorder. Every write goes
//! to a hidden sibling first and is renamed over the target, so a reader sees
//! either the previous file or the new one.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::optim::Optimizer;
use burn::record::{FullPrecisionSettings, NamedMpkBytesRecorder, PrecisionSettings, Record, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::backend::DefaultBackend;
use crate::model::{AlexNet, AlexNetRecord};
use crate::utils::error::{FinetuneError, Result};

/// Latest checkpoint, relative to the save directory
pub const LATEST_FILE: &str = "checkpoint.pth.tar";
/// Best model, relative to the save directory
pub const BEST_FILE: &str = "alexnet_model.pth.tar";

type CheckpointRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// Run state stored with the records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Last completed epoch (1-based)
    pub epoch: usize,
    /// Highest validation accuracy seen so far, in percent
    pub best_accuracy: f64,
    /// Training class folders in label order
    pub class_names: Vec<String>,
    /// Class folder -> human label
    pub class_labels: BTreeMap<String, String>,
    /// When the file was written (RFC 3339)
    pub timestamp: String,
}

impl CheckpointMeta {
    pub fn new(
        epoch: usize,
        best_accuracy: f64,
        class_names: Vec<String>,
        class_labels: BTreeMap<String, String>,
    ) -> Self {
        Self {
            epoch,
            best_accuracy,
            class_names,
            class_labels,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Everything persisted after an epoch
pub struct CheckpointRecord<B: Backend, O: Record<B>> {
    pub meta: CheckpointMeta,
    pub model: AlexNetRecord<B>,
    pub optim: O,
}

/// Serialized form of [`CheckpointRecord`]
#[derive(Clone, Serialize, Deserialize)]
pub struct CheckpointItem<M, O> {
    pub meta: CheckpointMeta,
    pub model: M,
    pub optim: O,
}

impl<B: Backend, O: Record<B>> Record<B> for CheckpointRecord<B, O> {
    type Item<S: PrecisionSettings> =
        CheckpointItem<<AlexNetRecord<B> as Record<B>>::Item<S>, O::Item<S>>;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        CheckpointItem {
            meta: self.meta,
            model: self.model.into_item::<S>(),
            optim: self.optim.into_item::<S>(),
        }
    }

    fn from_item<S: PrecisionSettings>(item: Self::Item<S>, device: &B::Device) -> Self {
        Self {
            meta: item.meta,
            model: AlexNetRecord::<B>::from_item::<S>(item.model, device),
            optim: O::from_item::<S>(item.optim, device),
        }
    }
}

/// Reads only the metadata of a checkpoint file; the records are skipped
struct MetaRecord(CheckpointMeta);

#[derive(Clone, Serialize, Deserialize)]
struct MetaItem {
    meta: CheckpointMeta,
}

impl<B: Backend> Record<B> for MetaRecord {
    type Item<S: PrecisionSettings> = MetaItem;

    fn into_item<S: PrecisionSettings>(self) -> Self::Item<S> {
        MetaItem { meta: self.0 }
    }

    fn from_item<S: PrecisionSettings>(item: Self::Item<S>, _device: &B::Device) -> Self {
        Self(item.meta)
    }
}

/// Reads and writes the latest and best checkpoint files under one save directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    save_dir: PathBuf,
}

impl CheckpointManager {
    pub fn new<P: AsRef<Path>>(save_dir: P) -> Self {
        Self {
            save_dir: save_dir.as_ref().to_path_buf(),
        }
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn latest_path(&self) -> PathBuf {
        self.save_dir.join(LATEST_FILE)
    }

    pub fn best_path(&self) -> PathBuf {
        self.save_dir.join(BEST_FILE)
    }

    /// Whether a latest checkpoint is present
    pub fn exists(&self) -> bool {
        self.latest_path().is_file()
    }

    /// Whether a best model file is present
    pub fn has_best(&self) -> bool {
        self.best_path().is_file()
    }

    /// Write the latest checkpoint
    pub fn save<B, O>(&self, meta: &CheckpointMeta, model: &AlexNet<B>, optim: &O) -> Result<()>
    where
        B: AutodiffBackend,
        O: Optimizer<AlexNet<B>, B>,
    {
        let record = CheckpointRecord::<B, O::Record> {
            meta: meta.clone(),
            model: model.clone().into_record(),
            optim: optim.to_record(),
        };
        let bytes = Recorder::<B>::record(&CheckpointRecorder::new(), record, ())?;

        let target = self.latest_path();
        let staging = staging_path(&target);
        fs::write(&staging, bytes)?;
        replace_file(&staging, &target)?;
        info!("Checkpoint for epoch {} written to {:?}", meta.epoch, target);
        Ok(())
    }

    /// Copy the latest checkpoint over the best model file
    pub fn promote_latest(&self) -> Result<()> {
        let latest = self.latest_path();
        if !latest.is_file() {
            return Err(FinetuneError::Checkpoint(format!(
                "no checkpoint to promote at {:?}",
                latest
            )));
        }

        let target = self.best_path();
        let staging = staging_path(&target);
        fs::copy(&latest, &staging)?;
        replace_file(&staging, &target)?;
        info!("Best model updated at {:?}", target);
        Ok(())
    }

    /// Metadata of the latest (or best) checkpoint
    pub fn load_meta(&self, best: bool) -> Result<CheckpointMeta> {
        let path = if best { self.best_path() } else { self.latest_path() };
        let bytes = read_checkpoint(&path)?;
        let record: MetaRecord =
            Recorder::<DefaultBackend>::load(&CheckpointRecorder::new(), bytes, &Default::default())?;
        Ok(record.0)
    }

    /// Restore model and optimizer state from the latest checkpoint
    pub fn load<B, O>(
        &self,
        model: AlexNet<B>,
        optim: O,
        device: &B::Device,
    ) -> Result<(CheckpointMeta, AlexNet<B>, O)>
    where
        B: AutodiffBackend,
        O: Optimizer<AlexNet<B>, B>,
    {
        let path = self.latest_path();
        let bytes = read_checkpoint(&path)?;
        let record: CheckpointRecord<B, O::Record> =
            Recorder::<B>::load(&CheckpointRecorder::new(), bytes, device)?;

        let model = model.load_record(record.model);
        let optim = optim.load_record(record.optim);
        let meta = record.meta;

        info!(
            "Resumed from {:?}: epoch {}, best accuracy {:.2}",
            path, meta.epoch, meta.best_accuracy
        );
        Ok((meta, model, optim))
    }
}

fn read_checkpoint(path: &Path) -> Result<Vec<u8>> {
    if !path.is_file() {
        return Err(FinetuneError::PathNotFound(path.to_path_buf()));
    }
    Ok(fs::read(path)?)
}

/// `<dir>/.<name>.tmp` next to `target`
fn staging_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.tmp", name))
}

/// Rename `staging` over `target` in one step
fn replace_file(staging: &Path, target: &Path) -> Result<()> {
    fs::rename(staging, target)?;
    debug!("Replaced {:?}", target);
    Ok(())
}
