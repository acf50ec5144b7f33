//! # AlexNet Fine-Tuning
//!
//! Fine-tunes an ImageNet-pretrained AlexNet on a Tiny-ImageNet style dataset
//! with the Burn framework. The convolutional backbone and the first two
//! fully-connected layers are frozen; only the classifier head is trained.
//!
//! ## Modules
//!
//! - `dataset`: Validation split preparation, class vocabulary, image folders and batching
//! - `model`: AlexNet architecture and pretrained weight transfer
//! - `training`: Epoch loop, checkpoints and configuration
//! - `utils`: Logging and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use alexnet_finetune::backend::{default_device, TrainingBackend};
//! use alexnet_finetune::training::{run_finetune, FinetuneOptions, TrainingConfig};
//!
//! let options = FinetuneOptions {
//!     data_dir: "data/tiny-imagenet-200".into(),
//!     save_dir: "output".into(),
//!     pretrained: Some("alexnet-owt-7be5be79.pth".into()),
//!     config: TrainingConfig::default(),
//! };
//! let outcome = run_finetune::<TrainingBackend>(&options, default_device())?;
//! ```

pub mod backend;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

pub use dataset::{ImageBatch, ImageBatcher, ImageFolder, ImageFolderDataset, ImageItem};
pub use model::{AlexNet, AlexNetConfig};
pub use training::{
    run_finetune, CheckpointManager, CheckpointMeta, FinetuneOptions, Trainer, TrainingConfig,
    TrainingOutcome,
};
pub use utils::error::{FinetuneError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
