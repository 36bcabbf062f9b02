//! Burn modules for triplet-ranking image embeddings.
//!
//! This crate defines the network architectures used for metric learning:
//! - `EmbeddingNet`: convolutional feature extractor plus projection head that maps a
//!   `[B, 3, H, W]` image batch to `[B, embedding_dim]` vectors.
//! - `TripletNet`: wraps a single `EmbeddingNet` and runs anchor/positive/negative through it,
//!   returning the pairwise distances used by the ranking loss.
//!
//! These are pure Burn Modules. Losses, optimizers and checkpoint handling live in the
//! `training` crate.
//!
//! ## Design Note
//! Dropout is only active on autodiff backends. Training runs on `Autodiff<B>` and evaluation
//! on the inner backend (via `AutodiffModule::valid()`), so there is no train/eval flag to toggle.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Added under the square root of [`pairwise_distance`] and subtracted back out afterwards.
pub const PAIRWISE_EPS: f32 = 1e-12;

#[derive(Debug, Clone)]
pub struct EmbeddingNetConfig {
    /// Output channels of the five convolution stages.
    pub channels: [usize; 5],
    /// Width of the hidden projection layer.
    pub hidden: usize,
    /// Length of the produced embedding vector.
    pub embedding_dim: usize,
    /// Dropout probability before each projection layer (train backend only).
    pub dropout: f64,
    /// Spatial size the backbone output is pooled to before flattening.
    pub pooled: usize,
}

impl Default for EmbeddingNetConfig {
    fn default() -> Self {
        Self {
            channels: [64, 192, 384, 256, 256],
            hidden: 4096,
            embedding_dim: 128,
            dropout: 0.5,
            pooled: 6,
        }
    }
}

impl EmbeddingNetConfig {
    /// Small configuration for smoke tests and CPU experiments.
    pub fn tiny() -> Self {
        Self {
            channels: [4, 8, 8, 8, 8],
            hidden: 16,
            embedding_dim: 8,
            dropout: 0.5,
            pooled: 1,
        }
    }

    /// Smallest square input the backbone accepts (three 3x3/2 pools after an 11x11/4 stem).
    pub fn min_input_size(&self) -> usize {
        67
    }

    fn flattened(&self) -> usize {
        self.channels[4] * self.pooled.max(1) * self.pooled.max(1)
    }
}

#[derive(Debug, Module)]
pub struct EmbeddingNet<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    conv5: Conv2d<B>,
    pool: MaxPool2d,
    adaptive: AdaptiveAvgPool2d,
    dropout: nn::Dropout,
    fc1: nn::Linear<B>,
    fc2: nn::Linear<B>,
}

impl<B: Backend> EmbeddingNet<B> {
    pub fn new(cfg: EmbeddingNetConfig, device: &B::Device) -> Self {
        let [c1, c2, c3, c4, c5] = cfg.channels;
        let conv1 = Conv2dConfig::new([3, c1], [11, 11])
            .with_stride([4, 4])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);
        let conv2 = Conv2dConfig::new([c1, c2], [5, 5])
            .with_padding(PaddingConfig2d::Explicit(2, 2))
            .init(device);
        let conv3 = Conv2dConfig::new([c2, c3], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv4 = Conv2dConfig::new([c3, c4], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let conv5 = Conv2dConfig::new([c4, c5], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);
        let pool = MaxPool2dConfig::new([3, 3]).with_strides([2, 2]).init();
        let pooled = cfg.pooled.max(1);
        let adaptive = AdaptiveAvgPool2dConfig::new([pooled, pooled]).init();
        let dropout = nn::DropoutConfig::new(cfg.dropout).init();
        let fc1 = nn::LinearConfig::new(cfg.flattened(), cfg.hidden).init(device);
        let fc2 = nn::LinearConfig::new(cfg.hidden, cfg.embedding_dim).init(device);
        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            conv5,
            pool,
            adaptive,
            dropout,
            fc1,
            fc2,
        }
    }

    /// Weight shapes of every parameterized layer, in forward order.
    pub fn layer_shapes(&self) -> Vec<(&'static str, Vec<usize>)> {
        vec![
            ("conv1", self.conv1.weight.val().dims().to_vec()),
            ("conv2", self.conv2.weight.val().dims().to_vec()),
            ("conv3", self.conv3.weight.val().dims().to_vec()),
            ("conv4", self.conv4.weight.val().dims().to_vec()),
            ("conv5", self.conv5.weight.val().dims().to_vec()),
            ("fc1", self.fc1.weight.val().dims().to_vec()),
            ("fc2", self.fc2.weight.val().dims().to_vec()),
        ]
    }

    /// Backbone only: `[B, 3, H, W]` -> `[B, C, pooled, pooled]`.
    pub fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pool.forward(relu(self.conv1.forward(images)));
        let x = self.pool.forward(relu(self.conv2.forward(x)));
        let x = relu(self.conv3.forward(x));
        let x = relu(self.conv4.forward(x));
        let x = self.pool.forward(relu(self.conv5.forward(x)));
        self.adaptive.forward(x)
    }

    /// Full embedding: `[B, 3, H, W]` -> `[B, embedding_dim]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features(images).flatten::<2>(1, 3);
        let x = relu(self.fc1.forward(self.dropout.forward(x)));
        self.fc2.forward(self.dropout.forward(x))
    }
}

/// Row-wise Euclidean distance between two `[B, D]` batches.
///
/// Identical rows yield exactly zero; the epsilon offset only keeps the gradient finite there.
pub fn pairwise_distance<B: Backend>(x: Tensor<B, 2>, y: Tensor<B, 2>) -> Tensor<B, 1> {
    let [batch, _] = x.dims();
    (x - y)
        .powf_scalar(2.0)
        .sum_dim(1)
        .add_scalar(PAIRWISE_EPS)
        .sqrt()
        .sub_scalar(PAIRWISE_EPS.sqrt())
        .reshape([batch])
}

/// Distances and embeddings produced by one triplet forward pass.
///
/// `dist_negative` is the distance the ranking loss expects to be the larger one.
#[derive(Debug, Clone)]
pub struct TripletOutput<B: Backend> {
    /// `||anchor - negative||`, shape `[B]`.
    pub dist_negative: Tensor<B, 1>,
    /// `||anchor - positive||`, shape `[B]`.
    pub dist_positive: Tensor<B, 1>,
    pub emb_anchor: Tensor<B, 2>,
    pub emb_positive: Tensor<B, 2>,
    pub emb_negative: Tensor<B, 2>,
}

/// Shared-weight wrapper: all three branches go through the same `embedding` module.
#[derive(Debug, Module)]
pub struct TripletNet<B: Backend> {
    pub embedding: EmbeddingNet<B>,
}

impl<B: Backend> TripletNet<B> {
    pub fn new(embedding: EmbeddingNet<B>) -> Self {
        Self { embedding }
    }

    pub fn from_config(cfg: EmbeddingNetConfig, device: &B::Device) -> Self {
        Self::new(EmbeddingNet::new(cfg, device))
    }

    pub fn forward(
        &self,
        anchor: Tensor<B, 4>,
        positive: Tensor<B, 4>,
        negative: Tensor<B, 4>,
    ) -> TripletOutput<B> {
        let emb_anchor = self.embedding.forward(anchor);
        let emb_positive = self.embedding.forward(positive);
        let emb_negative = self.embedding.forward(negative);
        let dist_negative = pairwise_distance(emb_anchor.clone(), emb_negative.clone());
        let dist_positive = pairwise_distance(emb_anchor.clone(), emb_positive.clone());
        TripletOutput {
            dist_negative,
            dist_positive,
            emb_anchor,
            emb_positive,
            emb_negative,
        }
    }

    pub fn into_embedding(self) -> EmbeddingNet<B> {
        self.embedding
    }
}

pub mod prelude {
    pub use super::{
        pairwise_distance, EmbeddingNet, EmbeddingNetConfig, TripletNet, TripletOutput,
    };
}
