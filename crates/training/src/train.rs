//! SGD-with-momentum training over triplet batches, checkpointing after every epoch.

use crate::checkpoint::{load_optimizer, save_checkpoint, save_optimizer, CheckpointPaths};
use crate::cli::RunSettings;
use crate::context::ExecutionContext;
use crate::events::{Event, Reporter};
use crate::loss::{LossError, LossScalars, TripletLoss};
use anyhow::Context;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use models::{EmbeddingNet, TripletNet};
use std::path::PathBuf;
use triplet_dataset::{TripletBatch, TripletLoader};

pub struct TrainOutcome<B: AutodiffBackend> {
    pub model: TripletNet<B>,
    /// Epochs completed by this call (not counting resumed ones).
    pub epochs_run: usize,
    pub last_checkpoint: Option<PathBuf>,
    pub optimizer_restored: bool,
}

/// Forward, loss, backward and one optimizer update. Returns the updated model and the
/// loss values measured before the update; a loss that cannot be read back aborts the step.
pub fn train_step<B, O>(
    model: TripletNet<B>,
    optim: &mut O,
    loss_fn: &TripletLoss,
    batch: TripletBatch<B>,
    lr: f64,
) -> Result<(TripletNet<B>, LossScalars), LossError>
where
    B: AutodiffBackend,
    O: Optimizer<TripletNet<B>, B>,
{
    let out = model.forward(batch.anchor, batch.positive, batch.negative);
    let loss = loss_fn.forward(&out);
    let scalars = loss.scalars()?;
    let grads = GradientsParams::from_grads(loss.total.backward(), &model);
    let model = optim.step(lr, model, grads);
    Ok((model, scalars))
}

/// Run epochs `start_epoch..=settings.epochs`.
///
/// Checkpoints go to the directory derived from `settings.checkpoint`. Unless the run is
/// `fresh`, optimizer state found there is restored first.
pub fn train<B: AutodiffBackend>(
    ctx: &ExecutionContext<B>,
    settings: &RunSettings,
    embedding: EmbeddingNet<B>,
    start_epoch: usize,
    loader: &TripletLoader,
    reporter: &mut dyn Reporter,
) -> anyhow::Result<TrainOutcome<B>> {
    let paths = CheckpointPaths::resolve(&settings.checkpoint);
    let mut model = TripletNet::new(embedding);
    let momentum = MomentumConfig::new()
        .with_momentum(settings.momentum)
        .with_dampening(0.0)
        .with_nesterov(false);
    let optim = SgdConfig::new()
        .with_momentum(Some(momentum))
        .init::<B, TripletNet<B>>();
    let (mut optim, optimizer_restored) = if settings.fresh {
        (optim, false)
    } else {
        load_optimizer::<B, TripletNet<B>, _>(&paths, optim, ctx.device())?
    };
    if optimizer_restored {
        eprintln!(
            "Restored optimizer state from {}",
            paths.optimizer_file().display()
        );
    }

    let loss_fn = TripletLoss::new(settings.margin).with_embed_weight(settings.embed_weight);
    eprintln!(
        "training epochs {start_epoch}..={} on {} ({}, {} batches/epoch)",
        settings.epochs,
        ctx.describe(),
        loader.source().describe(),
        loader.batches_per_epoch()
    );

    let mut epochs_run = 0;
    let mut last_checkpoint = None;
    for epoch in start_epoch..=settings.epochs {
        let mut iter = loader.epoch(epoch);
        let mut losses = Vec::new();
        while let Some(batch) = iter
            .next_batch::<B>(ctx.device())
            .with_context(|| format!("loading batches for epoch {epoch}"))?
        {
            let (next, scalars) = train_step(model, &mut optim, &loss_fn, batch, settings.lr)
                .with_context(|| format!("epoch {epoch} batch {}", losses.len() + 1))?;
            model = next;
            reporter.report(&Event::Batch {
                epoch,
                batch: losses.len() + 1,
                loss: scalars.total,
                triplet: scalars.triplet,
                embed: scalars.embed,
            });
            losses.push(scalars.total);
        }
        let mean_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f32>() / losses.len() as f32
        };

        let checkpoint = save_checkpoint(&paths, epoch + 1, &model)?;
        save_optimizer::<B, TripletNet<B>, _>(&paths, &optim)?;
        reporter.report(&Event::Epoch {
            epoch,
            batches: losses.len(),
            mean_loss,
            checkpoint: checkpoint.clone(),
        });
        reporter.flush();
        last_checkpoint = Some(checkpoint);
        epochs_run += 1;
    }

    Ok(TrainOutcome {
        model,
        epochs_run,
        last_checkpoint,
        optimizer_restored,
    })
}
