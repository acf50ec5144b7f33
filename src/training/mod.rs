//! Training module
//!
//! This module provides:
//! - The epoch loop with Burn's autodiff and Adam
//! - Checkpoint files for resuming and for the best model
//! - Loss and accuracy accounting
//! - The JSON training configuration

pub mod checkpoint;
pub mod config;
pub mod finetune;
pub mod metrics;
pub mod trainer;

pub use checkpoint::{CheckpointManager, CheckpointMeta};
pub use config::TrainingConfig;
pub use finetune::{run_finetune, FinetuneOptions};
pub use metrics::{EpochMetrics, EpochSummary};
pub use trainer::{Trainer, TrainingOutcome, TrainingPhase};
