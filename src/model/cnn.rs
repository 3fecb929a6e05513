//! CNN architecture for construction-material classification.
//!
//! A convolutional backbone of [`ConvBlock`]s feeding a global-average-pooled
//! dense head. The backbone is organized as an ordered list of blocks so the
//! training phases can freeze a prefix and progressively unfreeze the top.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

/// Architecture identifier recorded in artifact metadata
pub const ARCHITECTURE: &str = "matstudio-cnn-8";

/// Number of backbone blocks
pub const NUM_BLOCKS: usize = 8;

/// Configuration for the material classifier
#[derive(Config, Debug)]
pub struct MaterialClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,

    /// Input image size (square)
    #[config(default = "224")]
    pub input_size: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,

    /// Dropout after the first dense layer
    #[config(default = "0.4")]
    pub head_dropout: f64,
}

/// A CNN block with Conv2d, BatchNorm, ReLU, and optional MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        with_pool: bool,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = if with_pool {
            Some(MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init())
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        match &self.pool {
            Some(pool) => pool.forward(x),
            None => x,
        }
    }
}

/// Material classifier CNN
///
/// Eight backbone blocks with pooling on five of them (224 -> 7 spatial),
/// global average pooling, then a 256 -> 128 -> num_classes head with
/// dropout, mirroring the transfer-learning head the original deployment
/// used.
#[derive(Module, Debug)]
pub struct MaterialClassifier<B: Backend> {
    blocks: Vec<ConvBlock<B>>,
    global_pool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    dropout1: Dropout,
    fc2: Linear<B>,
    dropout2: Dropout,
    fc3: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> MaterialClassifier<B> {
    pub fn new(config: &MaterialClassifierConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        // (in, out, pool) per block; pools on five blocks halve 224 down to 7.
        let plan = [
            (config.in_channels, base, true),
            (base, base * 2, true),
            (base * 2, base * 2, false),
            (base * 2, base * 4, true),
            (base * 4, base * 4, false),
            (base * 4, base * 8, true),
            (base * 8, base * 8, false),
            (base * 8, base * 8, true),
        ];
        debug_assert_eq!(plan.len(), NUM_BLOCKS);

        let blocks = plan
            .iter()
            .map(|&(cin, cout, pool)| ConvBlock::new(cin, cout, 3, pool, device))
            .collect();

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc1 = LinearConfig::new(base * 8, 256).init(device);
        let dropout1 = DropoutConfig::new(config.head_dropout).init();
        let fc2 = LinearConfig::new(256, 128).init(device);
        let dropout2 = DropoutConfig::new(0.3).init();
        let fc3 = LinearConfig::new(128, config.num_classes).init(device);

        Self {
            blocks,
            global_pool,
            fc1,
            dropout1,
            fc2,
            dropout2,
            fc3,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass producing logits of shape [batch_size, num_classes].
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout1.forward(x);
        let x = self.fc2.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout2.forward(x);
        self.fc3.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Detach gradients on all backbone blocks except the top `unfrozen_top`.
    ///
    /// The head always stays trainable. Frozen parameters receive no
    /// gradients, so the optimizer leaves them untouched.
    pub fn with_frozen_backbone(mut self, unfrozen_top: usize) -> Self {
        let total = self.blocks.len();
        let frozen = total.saturating_sub(unfrozen_top);
        self.blocks = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| if i < frozen { block.no_grad() } else { block })
            .collect();
        self
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}
