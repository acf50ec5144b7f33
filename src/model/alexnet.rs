//! AlexNet Architecture
//!
//! Five convolutional stages followed by three fully-connected layers, laid
//! out like torchvision's AlexNet so pretrained ImageNet weights can be
//! transferred layer by layer.
//!
//! For fine-tuning, everything except the last linear layer (`fc3`) is frozen.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// Spatial size of the feature map entering the classifier
pub const FEATURE_GRID: usize = 6;
/// Channels produced by the last convolutional stage
pub const FEATURE_CHANNELS: usize = 256;

/// Configuration for the AlexNet classifier
#[derive(Config, Debug)]
pub struct AlexNetConfig {
    /// Number of output classes (200 for Tiny-ImageNet)
    #[config(default = "200")]
    pub num_classes: usize,

    /// Width of the two hidden fully-connected layers
    #[config(default = "4096")]
    pub hidden_size: usize,

    /// Dropout rate before fc1 and fc2
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl AlexNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> AlexNet<B> {
        AlexNet::new(self, device)
    }
}

/// Convolution + ReLU with an optional 3x3/2 max pool
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    pub conv: Conv2d<B>,
    pub pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvStage<B> {
    pub fn new(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        padding: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .init(device);

        let pool = if with_pool {
            Some(MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self { conv, pool }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = Relu::new().forward(x);

        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// AlexNet classifier
///
/// Architecture:
/// - conv1: 3 -> 64, 11x11 stride 4, pool
/// - conv2: 64 -> 192, 5x5, pool
/// - conv3: 192 -> 384, 3x3
/// - conv4: 384 -> 256, 3x3
/// - conv5: 256 -> 256, 3x3, pool
/// - adaptive average pool to 6x6
/// - dropout, fc1 (9216 -> hidden), ReLU
/// - dropout, fc2 (hidden -> hidden), ReLU
/// - fc3 (hidden -> classes), softmax
#[derive(Module, Debug)]
pub struct AlexNet<B: Backend> {
    pub conv1: ConvStage<B>,
    pub conv2: ConvStage<B>,
    pub conv3: ConvStage<B>,
    pub conv4: ConvStage<B>,
    pub conv5: ConvStage<B>,

    pub avgpool: AdaptiveAvgPool2d,
    pub dropout: Dropout,

    pub fc1: Linear<B>,
    pub fc2: Linear<B>,
    pub fc3: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> AlexNet<B> {
    pub fn new(config: &AlexNetConfig, device: &B::Device) -> Self {
        let features = FEATURE_CHANNELS * FEATURE_GRID * FEATURE_GRID;

        Self {
            conv1: ConvStage::new([3, 64], 11, 4, 2, true, device),
            conv2: ConvStage::new([64, 192], 5, 1, 2, true, device),
            conv3: ConvStage::new([192, 384], 3, 1, 1, false, device),
            conv4: ConvStage::new([384, 256], 3, 1, 1, false, device),
            conv5: ConvStage::new([256, FEATURE_CHANNELS], 3, 1, 1, true, device),
            avgpool: AdaptiveAvgPool2dConfig::new([FEATURE_GRID, FEATURE_GRID]).init(),
            dropout: DropoutConfig::new(config.dropout).init(),
            fc1: LinearConfig::new(features, config.hidden_size).init(device),
            fc2: LinearConfig::new(config.hidden_size, config.hidden_size).init(device),
            fc3: LinearConfig::new(config.hidden_size, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Pre-softmax class scores, shape [batch_size, num_classes]
    pub fn forward_logits(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);
        let x = self.conv5.forward(x);

        let x = self.avgpool.forward(x);
        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.dropout.forward(x);
        let x = Relu::new().forward(self.fc1.forward(x));
        let x = self.dropout.forward(x);
        let x = Relu::new().forward(self.fc2.forward(x));

        self.fc3.forward(x)
    }

    /// Class probabilities, shape [batch_size, num_classes]
    ///
    /// The trainer computes cross-entropy on these probabilities.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(x), 1)
    }

    /// Freeze every parameter except the final linear layer's
    pub fn freeze_backbone(self) -> Self {
        let mut model = self.no_grad();
        model.fc3.weight = model.fc3.weight.set_require_grad(true);
        model.fc3.bias = model.fc3.bias.map(|bias| bias.set_require_grad(true));
        model
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Distribution;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn small_config() -> AlexNetConfig {
        AlexNetConfig::new().with_num_classes(5).with_hidden_size(16)
    }

    #[test]
    fn test_default_config() {
        let config = AlexNetConfig::new();
        assert_eq!(config.num_classes, 200);
        assert_eq!(config.hidden_size, 4096);
        assert_eq!(config.dropout, 0.5);
    }

    #[test]
    fn test_layer_shapes() {
        let device = Default::default();
        let model: AlexNet<TestBackend> = small_config().init(&device);

        assert_eq!(model.conv1.conv.weight.dims(), [64, 3, 11, 11]);
        assert_eq!(model.conv2.conv.weight.dims(), [192, 64, 5, 5]);
        assert_eq!(model.conv5.conv.weight.dims(), [256, 256, 3, 3]);
        assert_eq!(model.fc1.weight.dims(), [9216, 16]);
        assert_eq!(model.fc3.weight.dims(), [16, 5]);
        assert_eq!(model.num_classes(), 5);
    }

    #[test]
    fn test_forward_is_a_distribution() {
        let device = Default::default();
        let model: AlexNet<TestBackend> = small_config().init(&device);

        let input = Tensor::<TestBackend, 4>::random([2, 3, 64, 64], Distribution::Default, &device);
        let probs = model.forward(input);

        assert_eq!(probs.dims(), [2, 5]);
        let sums: Vec<f32> = probs.sum_dim(1).into_data().to_vec().unwrap();
        for sum in sums {
            assert!((sum - 1.0).abs() < 1e-4);
        }
    }
}
