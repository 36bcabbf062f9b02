//! Triplet ranking loss and embedding-norm regularization.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::TripletOutput;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum LossError {
    #[error("failed to read {term} loss from device: {msg}")]
    Readout { term: &'static str, msg: String },
    #[error("{term} loss tensor is empty")]
    Empty { term: &'static str },
    #[error("{term} loss is not finite: {value}")]
    NonFinite { term: &'static str, value: f32 },
}

/// Weight of the embedding-norm penalty in the total loss.
pub const DEFAULT_EMBED_WEIGHT: f32 = 0.001;

/// Hinge ranking loss with the target fixed at +1: `mean(max(0, margin - (larger - smaller)))`.
pub fn margin_ranking_loss<B: Backend>(
    larger: Tensor<B, 1>,
    smaller: Tensor<B, 1>,
    margin: f32,
) -> Tensor<B, 1> {
    (larger - smaller)
        .neg()
        .add_scalar(margin)
        .clamp_min(0.0)
        .mean()
}

/// Host reference for a single example.
pub fn margin_ranking_scalar(larger: f32, smaller: f32, margin: f32) -> f32 {
    (margin - (larger - smaller)).max(0.0)
}

/// Frobenius norm of a whole `[B, D]` batch.
pub fn batch_norm_l2<B: Backend>(x: Tensor<B, 2>) -> Tensor<B, 1> {
    x.powf_scalar(2.0).sum().sqrt()
}

/// `||x|| + ||y|| + ||z||` over the three embedding batches.
pub fn embedding_norm_penalty<B: Backend>(
    x: Tensor<B, 2>,
    y: Tensor<B, 2>,
    z: Tensor<B, 2>,
) -> Tensor<B, 1> {
    batch_norm_l2(x) + batch_norm_l2(y) + batch_norm_l2(z)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TripletLoss {
    pub margin: f32,
    pub embed_weight: f32,
}

impl TripletLoss {
    pub fn new(margin: f32) -> Self {
        Self {
            margin,
            embed_weight: DEFAULT_EMBED_WEIGHT,
        }
    }

    pub fn with_embed_weight(mut self, embed_weight: f32) -> Self {
        self.embed_weight = embed_weight;
        self
    }

    /// Anchor-negative distance is the one expected to be larger.
    pub fn forward<B: Backend>(&self, out: &TripletOutput<B>) -> LossBreakdown<B> {
        let triplet = margin_ranking_loss(
            out.dist_negative.clone(),
            out.dist_positive.clone(),
            self.margin,
        );
        let embed = embedding_norm_penalty(
            out.emb_anchor.clone(),
            out.emb_positive.clone(),
            out.emb_negative.clone(),
        );
        let total = triplet.clone() + embed.clone().mul_scalar(self.embed_weight);
        LossBreakdown {
            total,
            triplet,
            embed,
        }
    }
}

/// Loss terms as single-element tensors; `total` is the one to backpropagate.
#[derive(Debug, Clone)]
pub struct LossBreakdown<B: Backend> {
    pub total: Tensor<B, 1>,
    pub triplet: Tensor<B, 1>,
    pub embed: Tensor<B, 1>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossScalars {
    pub total: f32,
    pub triplet: f32,
    pub embed: f32,
}

impl<B: Backend> LossBreakdown<B> {
    /// Read the three terms back to the host. A NaN or infinite loss is an error.
    pub fn scalars(&self) -> Result<LossScalars, LossError> {
        Ok(LossScalars {
            total: finite_scalar("total", self.total.clone())?,
            triplet: finite_scalar("triplet", self.triplet.clone())?,
            embed: finite_scalar("embed", self.embed.clone())?,
        })
    }
}

pub(crate) fn first_scalar<B: Backend>(
    term: &'static str,
    t: Tensor<B, 1>,
) -> Result<f32, LossError> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| LossError::Readout {
            term,
            msg: format!("{e:?}"),
        })?
        .first()
        .copied()
        .ok_or(LossError::Empty { term })
}

fn finite_scalar<B: Backend>(term: &'static str, t: Tensor<B, 1>) -> Result<f32, LossError> {
    let value = first_scalar(term, t)?;
    if !value.is_finite() {
        return Err(LossError::NonFinite { term, value });
    }
    Ok(value)
}
