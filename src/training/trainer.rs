//! Fine-tuning loop
//!
//! Runs epochs `start_epoch + 1 ..= epochs`. Each epoch is a training pass,
//! a validation pass and a checkpoint write; the best model file is refreshed
//! whenever validation accuracy strictly improves on the best seen so far,
//! including the best restored from a previous run.

use std::collections::BTreeMap;
use std::sync::Arc;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    data::dataset::Dataset,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::dataset::{ImageBatch, ImageBatcher, ImageItem};
use crate::model::AlexNet;
use crate::training::checkpoint::{CheckpointManager, CheckpointMeta};
use crate::training::config::TrainingConfig;
use crate::training::metrics::{count_correct, EpochMetrics, EpochSummary};
use crate::utils::error::{FinetuneError, Result};
use crate::utils::logging::EpochTimer;

/// Where the trainer is in its run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingPhase {
    NotStarted,
    Training(usize),
    Validating(usize),
    Checkpointing(usize),
    Done,
}

/// What a call to `run` did
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Epochs completed by this run
    pub epochs_run: usize,
    /// Best validation accuracy across this and prior runs
    pub best_accuracy: f64,
    /// Epochs whose validation accuracy set a new best
    pub improved_epochs: Vec<usize>,
    /// Optimizer steps taken by this run
    pub steps: usize,
}

pub struct Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<AlexNet<B>, B>,
{
    model: AlexNet<B>,
    optim: O,
    config: TrainingConfig,
    checkpoints: CheckpointManager,
    class_names: Vec<String>,
    class_labels: BTreeMap<String, String>,
    device: B::Device,
    start_epoch: usize,
    best_accuracy: f64,
    steps: usize,
    phase: TrainingPhase,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<AlexNet<B>, B>,
{
    /// `model` is expected to be frozen except for `fc3`
    pub fn new(
        model: AlexNet<B>,
        optim: O,
        config: TrainingConfig,
        checkpoints: CheckpointManager,
        class_names: Vec<String>,
        class_labels: BTreeMap<String, String>,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            optim,
            config,
            checkpoints,
            class_names,
            class_labels,
            device,
            start_epoch: 0,
            best_accuracy: 0.0,
            steps: 0,
            phase: TrainingPhase::NotStarted,
        }
    }

    /// Restore model, optimizer, epoch and best accuracy from the latest
    /// checkpoint, if one exists.
    ///
    /// Without a latest checkpoint the run starts at epoch 0, but a best
    /// model file left by an earlier run still sets the accuracy to beat.
    pub fn resume(mut self) -> Result<Self> {
        if !self.checkpoints.exists() {
            if self.checkpoints.has_best() {
                let best = self.checkpoints.load_meta(true)?;
                self.check_classes(&best.class_names)?;
                warn!(
                    "No latest checkpoint under {:?}; keeping best accuracy {:.2} from epoch {}",
                    self.checkpoints.save_dir(),
                    best.best_accuracy,
                    best.epoch
                );
                self.best_accuracy = best.best_accuracy;
            } else {
                debug!("No checkpoint under {:?}, starting fresh", self.checkpoints.save_dir());
            }
            return Ok(self);
        }

        println!("Loading checkpoint file");
        let (meta, model, optim) = self.checkpoints.load(self.model, self.optim, &self.device)?;
        self.model = model;
        self.optim = optim;
        self.check_classes(&meta.class_names)?;

        Ok(Self {
            model: self.model.freeze_backbone(),
            start_epoch: meta.epoch,
            best_accuracy: meta.best_accuracy,
            ..self
        })
    }

    fn check_classes(&self, saved: &[String]) -> Result<()> {
        if saved != self.class_names.as_slice() {
            return Err(FinetuneError::Checkpoint(format!(
                "checkpoint has {} classes that do not match the {} training classes",
                saved.len(),
                self.class_names.len()
            )));
        }
        Ok(())
    }

    pub fn start_epoch(&self) -> usize {
        self.start_epoch
    }

    pub fn best_accuracy(&self) -> f64 {
        self.best_accuracy
    }

    /// Optimizer steps taken so far
    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn phase(&self) -> TrainingPhase {
        self.phase
    }

    pub fn model(&self) -> &AlexNet<B> {
        &self.model
    }

    fn set_phase(&mut self, phase: TrainingPhase) {
        debug!("Trainer phase: {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Forward, loss, backward and one Adam step.
    ///
    /// Returns the batch loss and the number of correct predictions.
    pub fn train_step(&mut self, batch: ImageBatch<B>) -> (f64, usize) {
        let output = self.model.forward(batch.images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), batch.targets.clone());

        let loss_value: f64 = loss.clone().into_scalar().elem();
        let correct = count_correct(output, batch.targets);

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optim
            .step(self.config.learning_rate, self.model.clone(), grads);
        self.steps += 1;

        (loss_value, correct)
    }

    /// Track a validation result; true if it strictly beats the best so far
    pub fn record_validation(&mut self, accuracy: f64) -> bool {
        let better = accuracy > self.best_accuracy;
        if better {
            info!(
                "Validation accuracy improved: {:.2} -> {:.2}",
                self.best_accuracy, accuracy
            );
        }
        self.best_accuracy = self.best_accuracy.max(accuracy);
        better
    }

    fn train_epoch(
        &mut self,
        loader: &Arc<dyn DataLoader<B, ImageBatch<B>>>,
        epoch: usize,
    ) -> EpochMetrics {
        let progress = ProgressBar::new(loader.num_items() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut metrics = EpochMetrics::new();
        for batch in loader.iter() {
            let rows = batch.num_rows();
            let (loss, correct) = self.train_step(batch);
            metrics.update(loss, correct, rows);

            progress.inc(rows as u64);
            progress.set_message(format!("loss {:.4}", loss));
        }
        progress.finish_and_clear();

        debug!(
            "Epoch {} training pass: {} batches, {} samples",
            epoch, metrics.batches, metrics.total
        );
        metrics
    }

    fn validate_epoch(
        &self,
        loader: &Arc<dyn DataLoader<B::InnerBackend, ImageBatch<B::InnerBackend>>>,
    ) -> EpochMetrics {
        let model = self.model.valid();
        let mut metrics = EpochMetrics::new();

        for batch in loader.iter() {
            let rows = batch.num_rows();
            let output = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&output.device())
                .forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.into_scalar().elem();
            metrics.update(loss_value, count_correct(output, batch.targets), rows);
        }

        metrics
    }

    /// Run the remaining epochs.
    ///
    /// Every item of both datasets must load; a pass that sees fewer rows
    /// than its dataset holds is an error. A checkpoint at or past the epoch
    /// budget counts as finished, so a smaller `epochs` never retrains.
    pub fn run<DT, DV>(&mut self, train: DT, valid: DV) -> Result<TrainingOutcome>
    where
        DT: Dataset<ImageItem> + 'static,
        DV: Dataset<ImageItem> + 'static,
    {
        let total_epochs = self.config.epochs;
        let mut outcome = TrainingOutcome {
            best_accuracy: self.best_accuracy,
            ..Default::default()
        };

        if self.start_epoch >= total_epochs {
            println!("Training completed");
            self.set_phase(TrainingPhase::Done);
            return Ok(outcome);
        }

        let train_len = train.len();
        let valid_len = valid.len();
        info!(
            "Training on {} images, validating on {} images",
            train_len, valid_len
        );

        let train_loader = DataLoaderBuilder::<B, ImageItem, ImageBatch<B>>::new(
            ImageBatcher::new(self.config.image_size),
        )
        .batch_size(self.config.train_batch_size)
        .shuffle(self.config.shuffle_seed)
        .num_workers(self.config.num_workers)
        .set_device(self.device.clone())
        .build(train);

        let valid_loader = DataLoaderBuilder::<
            B::InnerBackend,
            ImageItem,
            ImageBatch<B::InnerBackend>,
        >::new(ImageBatcher::new(self.config.image_size))
        .batch_size(self.config.val_batch_size)
        .num_workers(self.config.num_workers)
        .build(valid);

        println!("Starting training from epoch {}", self.start_epoch + 1);
        let steps_before = self.steps;

        for epoch in self.start_epoch + 1..=total_epochs {
            self.set_phase(TrainingPhase::Training(epoch));
            let timer = EpochTimer::start(epoch);
            let train_metrics = self.train_epoch(&train_loader, epoch);
            let train_time = timer.elapsed_secs();
            check_complete("training", &train_metrics, train_len)?;

            self.set_phase(TrainingPhase::Validating(epoch));
            let valid_metrics = self.validate_epoch(&valid_loader);
            check_complete("validation", &valid_metrics, valid_len)?;

            let train_summary = train_metrics.summary(epoch);
            let valid_summary = valid_metrics.summary(epoch);
            print_epoch(&train_summary, &valid_summary, train_time);

            self.set_phase(TrainingPhase::Checkpointing(epoch));
            let better = self.record_validation(valid_summary.accuracy);
            println!("Save model checkpoint after epoch {}", epoch);
            let meta = CheckpointMeta::new(
                epoch,
                self.best_accuracy,
                self.class_names.clone(),
                self.class_labels.clone(),
            );
            self.checkpoints.save(&meta, &self.model, &self.optim)?;
            if better {
                self.checkpoints.promote_latest()?;
                outcome.improved_epochs.push(epoch);
            }

            outcome.epochs_run += 1;
            self.start_epoch = epoch;
        }

        self.set_phase(TrainingPhase::Done);
        outcome.best_accuracy = self.best_accuracy;
        outcome.steps = self.steps - steps_before;
        info!(
            "{} epochs done, best validation accuracy {:.2}",
            outcome.epochs_run, outcome.best_accuracy
        );
        Ok(outcome)
    }
}

/// Fail the run if images were dropped while loading a pass
fn check_complete(split: &str, metrics: &EpochMetrics, expected: usize) -> Result<()> {
    if metrics.total != expected {
        return Err(FinetuneError::Dataset(format!(
            "{} pass saw {} of {} images; see the log for the failed files",
            split, metrics.total, expected
        )));
    }
    Ok(())
}

fn print_epoch(train: &EpochSummary, valid: &EpochSummary, train_time: f64) {
    println!(
        "{} = {} Training loss {} Training Accuracy {}",
        "Epoch".yellow().bold(),
        train.epoch,
        train.loss,
        train.accuracy
    );
    println!(
        "{} = {} Validation loss {} Validation Accuracy {}",
        "Epoch".yellow().bold(),
        valid.epoch,
        valid.loss,
        valid.accuracy
    );
    println!("Total Training Time: {} s", train_time);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlexNetConfig;
    use burn::backend::Autodiff;
    use burn::data::dataloader::batcher::Batcher;
    use burn::data::dataset::InMemDataset;
    use burn::optim::AdamConfig;
    use burn::tensor::{Tensor, TensorData};
    use burn_ndarray::NdArray;
    use std::fs;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray<f32>>;

    const SIZE: usize = 64;
    const CLASSES: usize = 3;

    fn config(epochs: usize) -> TrainingConfig {
        TrainingConfig {
            epochs,
            train_batch_size: 4,
            val_batch_size: 2,
            num_workers: 1,
            image_size: SIZE,
            resize_size: SIZE,
            ..Default::default()
        }
    }

    fn items(count: usize) -> Vec<ImageItem> {
        (0..count)
            .map(|i| ImageItem {
                image: vec![(i % 7) as f32 / 7.0; 3 * SIZE * SIZE],
                label: i % CLASSES,
            })
            .collect()
    }

    fn class_names() -> Vec<String> {
        vec!["n01".to_string(), "n02".to_string(), "n03".to_string()]
    }

    fn trainer(
        save: &TempDir,
        epochs: usize,
    ) -> Trainer<TestBackend, impl Optimizer<AlexNet<TestBackend>, TestBackend>> {
        let device = Default::default();
        let model = AlexNetConfig::new()
            .with_num_classes(CLASSES)
            .with_hidden_size(8)
            .init::<TestBackend>(&device)
            .freeze_backbone();
        let optim = AdamConfig::new().init::<TestBackend, AlexNet<TestBackend>>();
        Trainer::new(
            model,
            optim,
            config(epochs),
            CheckpointManager::new(save.path()),
            class_names(),
            BTreeMap::new(),
            device,
        )
    }

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_only_fc3_changes_after_step() {
        let save = TempDir::new().unwrap();
        let mut trainer = trainer(&save, 1);
        let device = Default::default();

        let before = trainer.model().clone();
        let batch: ImageBatch<TestBackend> = ImageBatcher::new(SIZE).batch(items(4), &device);
        trainer.train_step(batch);
        let after = trainer.model();

        assert_eq!(trainer.steps(), 1);
        let frozen_convs = [
            (&before.conv1.conv, &after.conv1.conv),
            (&before.conv2.conv, &after.conv2.conv),
            (&before.conv3.conv, &after.conv3.conv),
            (&before.conv4.conv, &after.conv4.conv),
            (&before.conv5.conv, &after.conv5.conv),
        ];
        for (old, new) in frozen_convs {
            assert_eq!(values(old.weight.val()), values(new.weight.val()));
            let (old_bias, new_bias) = (old.bias.as_ref().unwrap(), new.bias.as_ref().unwrap());
            assert_eq!(values(old_bias.val()), values(new_bias.val()));
        }
        for (old, new) in [(&before.fc1, &after.fc1), (&before.fc2, &after.fc2)] {
            assert_eq!(values(old.weight.val()), values(new.weight.val()));
            let (old_bias, new_bias) = (old.bias.as_ref().unwrap(), new.bias.as_ref().unwrap());
            assert_eq!(values(old_bias.val()), values(new_bias.val()));
        }

        assert_ne!(values(before.fc3.weight.val()), values(after.fc3.weight.val()));
        let (old_bias, new_bias) = (
            before.fc3.bias.as_ref().unwrap(),
            after.fc3.bias.as_ref().unwrap(),
        );
        assert_ne!(values(old_bias.val()), values(new_bias.val()));
    }

    #[test]
    fn test_better_only_when_strictly_greater() {
        let save = TempDir::new().unwrap();
        let mut trainer = trainer(&save, 1);

        assert!(trainer.record_validation(50.0));
        assert!(!trainer.record_validation(50.0));
        assert!(trainer.record_validation(60.0));
        assert!(!trainer.record_validation(55.0));
        assert_eq!(trainer.best_accuracy(), 60.0);
    }

    #[test]
    fn test_finished_checkpoint_takes_no_steps() -> Result<()> {
        let save = TempDir::new().unwrap();
        {
            let done = trainer(&save, 2);
            let meta = CheckpointMeta::new(2, 40.0, class_names(), BTreeMap::new());
            done.checkpoints.save(&meta, &done.model, &done.optim)?;
        }

        let mut finished = trainer(&save, 2).resume()?;
        assert_eq!(finished.start_epoch(), 2);

        let outcome = finished.run(InMemDataset::new(items(6)), InMemDataset::new(items(3)))?;

        assert_eq!(outcome.epochs_run, 0);
        assert_eq!(outcome.steps, 0);
        assert_eq!(outcome.best_accuracy, 40.0);
        assert_eq!(finished.phase(), TrainingPhase::Done);

        // A checkpoint past a smaller budget is also finished
        let mut shorter = trainer(&save, 1).resume()?;
        let outcome = shorter.run(InMemDataset::new(items(6)), InMemDataset::new(items(3)))?;
        assert_eq!(outcome.epochs_run, 0);
        assert_eq!(outcome.steps, 0);
        Ok(())
    }

    #[test]
    fn test_resume_rejects_other_classes() -> Result<()> {
        let save = TempDir::new().unwrap();
        let done = trainer(&save, 2);
        let meta = CheckpointMeta::new(1, 0.0, vec!["n09".to_string()], BTreeMap::new());
        done.checkpoints.save(&meta, &done.model, &done.optim)?;

        assert!(matches!(
            trainer(&save, 2).resume(),
            Err(FinetuneError::Checkpoint(_))
        ));
        Ok(())
    }

    #[test]
    fn test_run_and_resume() -> Result<()> {
        let save = TempDir::new().unwrap();

        // 6 training items in batches of 4: one full and one partial batch
        let mut first = trainer(&save, 2).resume()?;
        assert_eq!(first.start_epoch(), 0);
        let outcome = first.run(InMemDataset::new(items(6)), InMemDataset::new(items(3)))?;

        assert_eq!(outcome.epochs_run, 2);
        assert_eq!(outcome.steps, 4);
        let manager = CheckpointManager::new(save.path());
        let latest = manager.load_meta(false)?;
        assert_eq!(latest.epoch, 2);
        assert_eq!(latest.class_names, class_names());
        assert_eq!(latest.best_accuracy, outcome.best_accuracy);
        match outcome.improved_epochs.last() {
            Some(epoch) => assert_eq!(manager.load_meta(true)?.epoch, *epoch),
            None => assert!(!manager.has_best()),
        }

        let mut second = trainer(&save, 3).resume()?;
        assert_eq!(second.start_epoch(), 2);
        assert_eq!(second.best_accuracy(), outcome.best_accuracy);
        let resumed = second.run(InMemDataset::new(items(6)), InMemDataset::new(items(3)))?;

        assert_eq!(resumed.epochs_run, 1);
        assert_eq!(resumed.steps, 2);
        assert!(resumed.best_accuracy >= outcome.best_accuracy);
        assert_eq!(manager.load_meta(false)?.epoch, 3);
        Ok(())
    }

    /// One identical image per class: every prediction hits exactly one
    /// label, so validation accuracy is always 100 / CLASSES.
    fn one_per_class() -> Vec<ImageItem> {
        (0..CLASSES)
            .map(|label| ImageItem {
                image: vec![0.5; 3 * SIZE * SIZE],
                label,
            })
            .collect()
    }

    /// Latest and best files at epoch 1 with the given best accuracy
    fn seed_best(save: &TempDir, best_accuracy: f64) -> Result<()> {
        let seeded = trainer(save, 1);
        let meta = CheckpointMeta::new(1, best_accuracy, class_names(), BTreeMap::new());
        seeded.checkpoints.save(&meta, &seeded.model, &seeded.optim)?;
        seeded.checkpoints.promote_latest()
    }

    #[test]
    fn test_best_file_untouched_without_improvement() -> Result<()> {
        let save = TempDir::new().unwrap();
        seed_best(&save, 90.0)?;
        let manager = CheckpointManager::new(save.path());
        let best_before = fs::read(manager.best_path())?;

        let mut trainer = trainer(&save, 2).resume()?;
        assert_eq!(trainer.best_accuracy(), 90.0);
        let outcome = trainer.run(InMemDataset::new(items(6)), InMemDataset::new(one_per_class()))?;

        assert_eq!(outcome.epochs_run, 1);
        assert!(outcome.improved_epochs.is_empty());
        assert_eq!(outcome.best_accuracy, 90.0);
        assert_eq!(fs::read(manager.best_path())?, best_before);
        assert_eq!(manager.load_meta(false)?.epoch, 2);
        Ok(())
    }

    #[test]
    fn test_best_file_rewritten_on_improvement() -> Result<()> {
        let save = TempDir::new().unwrap();
        seed_best(&save, 10.0)?;
        let manager = CheckpointManager::new(save.path());

        let mut trainer = trainer(&save, 2).resume()?;
        let outcome = trainer.run(InMemDataset::new(items(6)), InMemDataset::new(one_per_class()))?;

        let expected = 100.0 / CLASSES as f64;
        assert_eq!(outcome.improved_epochs, vec![2]);
        let best = manager.load_meta(true)?;
        assert_eq!(best.epoch, 2);
        assert!((best.best_accuracy - expected).abs() < 1e-9);
        assert_eq!(fs::read(manager.best_path())?, fs::read(manager.latest_path())?);
        Ok(())
    }

    #[test]
    fn test_best_accuracy_kept_when_latest_missing() -> Result<()> {
        let save = TempDir::new().unwrap();
        seed_best(&save, 90.0)?;
        let manager = CheckpointManager::new(save.path());
        fs::remove_file(manager.latest_path())?;
        let best_before = fs::read(manager.best_path())?;

        let mut trainer = trainer(&save, 1).resume()?;
        assert_eq!(trainer.start_epoch(), 0);
        assert_eq!(trainer.best_accuracy(), 90.0);
        let outcome = trainer.run(InMemDataset::new(items(6)), InMemDataset::new(one_per_class()))?;

        assert!(outcome.improved_epochs.is_empty());
        assert_eq!(fs::read(manager.best_path())?, best_before);
        assert_eq!(manager.load_meta(true)?.best_accuracy, 90.0);
        Ok(())
    }

    #[test]
    fn test_partial_batch_counts_real_rows() {
        let save = TempDir::new().unwrap();
        let mut trainer = trainer(&save, 1);
        let device = Default::default();

        let batch: ImageBatch<TestBackend> = ImageBatcher::new(SIZE).batch(items(3), &device);
        assert_eq!(batch.num_rows(), 3);
        let (_, correct) = trainer.train_step(batch);
        assert!(correct <= 3);

        let targets = Tensor::<TestBackend, 1, burn::tensor::Int>::from_data(
            TensorData::new(vec![0i64], [1]),
            &device,
        );
        let output = Tensor::<TestBackend, 2>::from_floats(
            TensorData::new(vec![0.9f32, 0.05, 0.05], [1, 3]),
            &device,
        );
        assert_eq!(count_correct(output, targets), 1);
    }
}
