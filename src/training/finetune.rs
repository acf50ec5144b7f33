//! End-to-end fine-tuning run
//!
//! Prepares the validation split, scans both splits, builds the model from
//! pretrained weights, resumes from the latest checkpoint when present and
//! trains the remaining epochs.

use std::path::PathBuf;

use burn::data::dataset::Dataset;
use burn::optim::AdamConfig;
use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::{debug, info, warn};

use crate::dataset::{
    class_labels, prepare_validation_split, DataLayout, ImageFolder, ImageFolderDataset,
    ImageTransform,
};
use crate::model::{build_finetune_model, AlexNet, AlexNetConfig};
use crate::training::checkpoint::CheckpointManager;
use crate::training::config::TrainingConfig;
use crate::training::trainer::{Trainer, TrainingOutcome};
use crate::utils::error::{FinetuneError, Result};

/// Inputs of one fine-tuning run
#[derive(Debug, Clone)]
pub struct FinetuneOptions {
    /// Tiny-ImageNet root (`train/`, `val/`, `words.txt`)
    pub data_dir: PathBuf,
    /// Directory holding `checkpoint.pth.tar` and `alexnet_model.pth.tar`
    pub save_dir: PathBuf,
    /// ImageNet-pretrained AlexNet weights
    pub pretrained: Option<PathBuf>,
    pub config: TrainingConfig,
}

pub fn run_finetune<B: AutodiffBackend>(
    options: &FinetuneOptions,
    device: B::Device,
) -> Result<TrainingOutcome> {
    let config = &options.config;
    config.validate()?;

    println!("{}", "Preparing Dataset...".cyan());
    prepare_validation_split(&options.data_dir)?;

    let layout = DataLayout::new(&options.data_dir);
    let train_folder = ImageFolder::scan(layout.train_dir())?;
    if train_folder.num_classes() == 0 {
        return Err(FinetuneError::Dataset(format!(
            "no class folders under {:?}",
            layout.train_dir()
        )));
    }
    let class_names = train_folder.classes.clone();
    let counts = train_folder.class_counts();
    for (class, _) in class_names.iter().zip(&counts).filter(|(_, &count)| count == 0) {
        warn!("Class {} has no training images", class);
    }
    debug!("Training images per class: {:?}", counts);
    let labels = class_labels(&options.data_dir, &class_names)?;
    let valid_folder = ImageFolder::scan_with_classes(layout.val_images_dir(), &class_names)?;

    println!("  Classes:            {}", class_names.len());
    println!("  Training images:    {}", train_folder.len());
    println!("  Validation images:  {}", valid_folder.len());

    let train = ImageFolderDataset::new(
        &train_folder,
        ImageTransform::train(config.image_size as u32),
    );
    let valid = ImageFolderDataset::new(
        &valid_folder,
        ImageTransform::eval(config.image_size as u32, config.resize_size as u32),
    );
    info!(
        "Datasets ready: {} train / {} validation",
        train.len(),
        valid.len()
    );

    B::seed(config.seed);
    println!("{}", "Creating Model...".cyan());
    let model_config = AlexNetConfig::new().with_num_classes(class_names.len());
    let (model, report) =
        build_finetune_model::<B>(&model_config, options.pretrained.as_deref(), &device)?;
    if !report.copied.is_empty() {
        println!("  Pretrained layers:  {}", report.copied.join(", "));
    }

    let optim = AdamConfig::new().init::<B, AlexNet<B>>();

    std::fs::create_dir_all(&options.save_dir)?;
    let checkpoints = CheckpointManager::new(&options.save_dir);

    let mut trainer = Trainer::new(
        model,
        optim,
        config.clone(),
        checkpoints,
        class_names,
        labels,
        device,
    )
    .resume()?;

    trainer.run(train, valid)
}
