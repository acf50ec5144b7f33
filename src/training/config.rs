//! Training configuration
//!
//! Loaded from an optional JSON file; every field has a default, so a partial
//! file only overrides what it names.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{FinetuneError, Result};

/// Training hyperparameters and data pipeline settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Total number of epochs, counted across resumed runs
    pub epochs: usize,

    /// Batch size for the training split
    pub train_batch_size: usize,

    /// Batch size for the validation split
    pub val_batch_size: usize,

    /// Adam learning rate
    pub learning_rate: f64,

    /// Dataloader worker threads per split
    pub num_workers: usize,

    /// Backend seed set before the model is created
    pub seed: u64,

    /// Seed for the training dataloader's shuffle
    pub shuffle_seed: u64,

    /// Side of the square model input
    pub image_size: usize,

    /// Shorter-side size before the validation center crop
    pub resize_size: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            train_batch_size: 100,
            val_batch_size: 10,
            learning_rate: 0.001,
            num_workers: 5,
            seed: 1,
            shuffle_seed: 42,
            image_size: 224,
            resize_size: 256,
        }
    }
}

impl TrainingConfig {
    /// Read a JSON config file
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FinetuneError::PathNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    /// Reject settings the trainer cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(FinetuneError::Config("epochs must be > 0".to_string()));
        }
        if self.train_batch_size == 0 || self.val_batch_size == 0 {
            return Err(FinetuneError::Config("batch sizes must be > 0".to_string()));
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            return Err(FinetuneError::Config(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.num_workers == 0 {
            return Err(FinetuneError::Config("num_workers must be > 0".to_string()));
        }
        if self.image_size == 0 {
            return Err(FinetuneError::Config("image_size must be > 0".to_string()));
        }
        if self.resize_size < self.image_size {
            return Err(FinetuneError::Config(format!(
                "resize_size ({}) must be at least image_size ({})",
                self.resize_size, self.image_size
            )));
        }
        Ok(())
    }
}
