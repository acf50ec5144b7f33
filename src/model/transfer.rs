//! Pretrained weight transfer
//!
//! A pretrained AlexNet (1000 ImageNet classes) is loaded as a reference
//! model; each learnable layer whose weight shape matches ours is copied into
//! the fine-tuning model. With the default config every layer but `fc3`
//! matches.

use std::path::Path;

use burn::module::{Module, Param};
use burn::nn::Linear;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::{backend::Backend, Tensor};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::alexnet::{AlexNet, AlexNetConfig, AlexNetRecord, ConvStage};
use crate::utils::error::{FinetuneError, Result};

/// Output classes of the ImageNet-pretrained reference model
pub const IMAGENET_CLASSES: usize = 1000;

/// torchvision AlexNet state-dict keys -> our module paths
const TORCHVISION_KEY_REMAP: [(&str, &str); 8] = [
    (r"^features\.0\.(.+)$", "conv1.conv.$1"),
    (r"^features\.3\.(.+)$", "conv2.conv.$1"),
    (r"^features\.6\.(.+)$", "conv3.conv.$1"),
    (r"^features\.8\.(.+)$", "conv4.conv.$1"),
    (r"^features\.10\.(.+)$", "conv5.conv.$1"),
    (r"^classifier\.1\.(.+)$", "fc1.$1"),
    (r"^classifier\.4\.(.+)$", "fc2.$1"),
    (r"^classifier\.6\.(.+)$", "fc3.$1"),
];

/// Which layers were copied from the pretrained model
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReport {
    pub copied: Vec<String>,
    pub skipped: Vec<String>,
}

impl TransferReport {
    fn record(&mut self, layer: &str, copied: bool) {
        if copied {
            debug!("Copied pretrained weights for {}", layer);
            self.copied.push(layer.to_string());
        } else {
            debug!("Shape mismatch for {}, keeping random init", layer);
            self.skipped.push(layer.to_string());
        }
    }
}

/// Replace `target`'s value with `source`'s, keeping `target`'s parameter id
fn copy_param<B: Backend, const D: usize>(
    target: &Param<Tensor<B, D>>,
    source: &Param<Tensor<B, D>>,
) -> Param<Tensor<B, D>> {
    Param::initialized(target.id.clone(), source.val())
}

fn transfer_conv<B: Backend>(target: &mut ConvStage<B>, source: &ConvStage<B>) -> bool {
    if target.conv.weight.dims() != source.conv.weight.dims() {
        return false;
    }
    target.conv.weight = copy_param(&target.conv.weight, &source.conv.weight);
    if let (Some(bias), Some(src)) = (&target.conv.bias, &source.conv.bias) {
        target.conv.bias = Some(copy_param(bias, src));
    }
    true
}

fn transfer_linear<B: Backend>(target: &mut Linear<B>, source: &Linear<B>) -> bool {
    if target.weight.dims() != source.weight.dims() {
        return false;
    }
    target.weight = copy_param(&target.weight, &source.weight);
    if let (Some(bias), Some(src)) = (&target.bias, &source.bias) {
        target.bias = Some(copy_param(bias, src));
    }
    true
}

impl<B: Backend> AlexNet<B> {
    /// Copy every layer whose weight shape matches `source`.
    ///
    /// Layers are visited in order conv1..conv5, fc1..fc3.
    pub fn transfer_from(mut self, source: &AlexNet<B>) -> (Self, TransferReport) {
        let mut report = TransferReport::default();

        report.record("conv1", transfer_conv(&mut self.conv1, &source.conv1));
        report.record("conv2", transfer_conv(&mut self.conv2, &source.conv2));
        report.record("conv3", transfer_conv(&mut self.conv3, &source.conv3));
        report.record("conv4", transfer_conv(&mut self.conv4, &source.conv4));
        report.record("conv5", transfer_conv(&mut self.conv5, &source.conv5));
        report.record("fc1", transfer_linear(&mut self.fc1, &source.fc1));
        report.record("fc2", transfer_linear(&mut self.fc2, &source.fc2));
        report.record("fc3", transfer_linear(&mut self.fc3, &source.fc3));

        info!(
            "Transferred {} layers from pretrained model, {} left at random init",
            report.copied.len(),
            report.skipped.len()
        );
        (self, report)
    }
}

/// Config of the ImageNet reference model sharing our hidden width
pub fn reference_config(hidden_size: usize) -> AlexNetConfig {
    AlexNetConfig::new()
        .with_num_classes(IMAGENET_CLASSES)
        .with_hidden_size(hidden_size)
}

/// Load an ImageNet-pretrained AlexNet.
///
/// `.pth`/`.pt` files are read as a torchvision state dict; anything else is
/// read as a burn record of a 1000-class AlexNet.
pub fn load_pretrained<B: Backend>(
    path: &Path,
    hidden_size: usize,
    device: &B::Device,
) -> Result<AlexNet<B>> {
    if !path.exists() {
        return Err(FinetuneError::PathNotFound(path.to_path_buf()));
    }

    let model: AlexNet<B> = reference_config(hidden_size).init(device);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    info!("Loading pretrained weights from {:?}", path);
    let model = match extension.as_str() {
        "pth" | "pt" => {
            let args = TORCHVISION_KEY_REMAP
                .iter()
                .fold(LoadArgs::new(path.to_path_buf()), |args, (from, to)| {
                    args.with_key_remap(from, to)
                });
            let record: AlexNetRecord<B> =
                PyTorchFileRecorder::<FullPrecisionSettings>::default().load(args, device)?;
            model.load_record(record)
        }
        _ => model.load_file(
            path.to_path_buf(),
            &NamedMpkFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )?,
    };

    Ok(model)
}

/// Build the fine-tuning model: transfer from `pretrained` when given, then
/// freeze everything except `fc3`.
pub fn build_finetune_model<B: Backend>(
    config: &AlexNetConfig,
    pretrained: Option<&Path>,
    device: &B::Device,
) -> Result<(AlexNet<B>, TransferReport)> {
    let model = config.init::<B>(device);

    let (model, report) = match pretrained {
        Some(path) => {
            let reference = load_pretrained::<B>(path, config.hidden_size, device)?;
            model.transfer_from(&reference)
        }
        None => {
            warn!("No pretrained weights given, training from random initialization");
            (model, TransferReport::default())
        }
    };

    Ok((model.freeze_backbone(), report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray<f32>;

    fn values<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec().unwrap()
    }

    #[test]
    fn test_transfer_copies_only_matching_layers() {
        let device = Default::default();
        let source: AlexNet<TestBackend> = AlexNetConfig::new()
            .with_num_classes(10)
            .with_hidden_size(8)
            .init(&device);
        let target: AlexNet<TestBackend> = AlexNetConfig::new()
            .with_num_classes(3)
            .with_hidden_size(8)
            .init(&device);
        let fc3_before = values(target.fc3.weight.val());

        let (target, report) = target.transfer_from(&source);

        assert_eq!(
            report.copied,
            vec!["conv1", "conv2", "conv3", "conv4", "conv5", "fc1", "fc2"]
        );
        assert_eq!(report.skipped, vec!["fc3"]);
        assert_eq!(
            values(target.conv3.conv.weight.val()),
            values(source.conv3.conv.weight.val())
        );
        assert_eq!(values(target.fc2.weight.val()), values(source.fc2.weight.val()));
        assert_eq!(values(target.fc3.weight.val()), fc3_before);
    }

    #[test]
    fn test_transfer_skips_hidden_size_mismatch() {
        let device = Default::default();
        let source: AlexNet<TestBackend> = AlexNetConfig::new()
            .with_num_classes(3)
            .with_hidden_size(8)
            .init(&device);
        let target: AlexNet<TestBackend> = AlexNetConfig::new()
            .with_num_classes(3)
            .with_hidden_size(4)
            .init(&device);

        let (_, report) = target.transfer_from(&source);
        assert_eq!(report.skipped, vec!["fc1", "fc2", "fc3"]);
    }

    #[test]
    fn test_load_pretrained_from_burn_record() {
        let device = Default::default();
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reference");

        let reference: AlexNet<TestBackend> = reference_config(8).init(&device);
        let expected = values(reference.conv1.conv.weight.val());
        reference
            .save_file(path.clone(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let loaded = load_pretrained::<TestBackend>(&path.with_extension("mpk"), 8, &device).unwrap();
        assert_eq!(loaded.num_classes(), IMAGENET_CLASSES);
        assert_eq!(values(loaded.conv1.conv.weight.val()), expected);
    }

    #[test]
    fn test_missing_pretrained_file() {
        let device = Default::default();
        let result = load_pretrained::<TestBackend>(Path::new("/nonexistent/alexnet.pth"), 8, &device);
        assert!(matches!(result, Err(FinetuneError::PathNotFound(_))));
    }
}
