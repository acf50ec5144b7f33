//! Dataset module for Tiny-ImageNet style data
//!
//! This module provides:
//! - Preparation of the validation split into per-class folders
//! - The wnid -> human label vocabulary
//! - Image folder scanning, per-split transforms and Burn integration
//!
//! ## Expected Layout
//!
//! ```text
//! <data>/words.txt
//! <data>/train/<wnid>/images/*.JPEG
//! <data>/val/val_annotations.txt
//! <data>/val/images/*.JPEG          (before preparation)
//! <data>/val/images/<wnid>/*.JPEG   (after preparation)
//! ```

pub mod burn_dataset;
pub mod loader;
pub mod prepare;
pub mod transform;

pub use burn_dataset::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
pub use loader::{ImageFolder, ImageSample, IMAGE_EXTENSIONS};
pub use prepare::{class_labels, prepare_validation_split, DataLayout, PrepareReport};
pub use transform::{ImageTransform, TransformMode};

/// Per-channel mean used for input normalization (ImageNet statistics)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// Per-channel standard deviation used for input normalization
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];
