//! Model module
//!
//! - `alexnet`: the AlexNet classifier and its burn `Config`
//! - `transfer`: pretrained weight loading and shape-matched layer transfer

pub mod alexnet;
pub mod transfer;

pub use alexnet::{AlexNet, AlexNetConfig, AlexNetRecord};
pub use transfer::{build_finetune_model, load_pretrained, TransferReport, IMAGENET_CLASSES};
