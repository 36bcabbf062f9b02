//! Binary entry point: settings, reporters, startup checkpoint load, then train or test.

use crate::checkpoint::{load_embedding, CheckpointPaths};
use crate::cli::{validate_backend_choice, Mode, RunSettings, TripletArgs};
use crate::config::RunConfig;
use crate::context::ExecutionContext;
use crate::eval::evaluate;
use crate::events::{ConsoleReporter, Event, FanOut, JsonlReporter, Reporter};
use crate::train::train;
use crate::TrainBackend;
use anyhow::Context;
use burn::tensor::backend::Backend;
use models::EmbeddingNet;
use triplet_dataset::TripletLoader;

pub fn run(args: TripletArgs) -> anyhow::Result<()> {
    validate_backend_choice(args.backend)?;
    let (cfg, cfg_path) = RunConfig::load(args.config.as_deref())?;
    if let Some(path) = &cfg_path {
        eprintln!("config: loaded {}", path.display());
    }
    let settings = RunSettings::from_parts(&args, cfg);
    let mut reporter = build_reporter(&args)?;

    let ctx = ExecutionContext::<TrainBackend>::resolve();
    if args.debug {
        eprintln!("settings: {}", settings.describe());
    }
    let res = match settings.mode {
        Mode::Train => run_train(&ctx, &settings, &mut reporter),
        Mode::Test => run_test(&ctx, &settings, &mut reporter),
    };
    reporter.flush();
    res
}

pub fn build_reporter(args: &TripletArgs) -> anyhow::Result<FanOut> {
    let mut fan = FanOut::new();
    if !args.quiet {
        fan = fan.with(Box::new(ConsoleReporter));
    }
    if let Some(path) = &args.metrics_out {
        let jsonl = JsonlReporter::create(path)
            .with_context(|| format!("opening metrics file {}", path.display()))?;
        fan = fan.with(Box::new(jsonl));
    }
    Ok(fan)
}

/// Network to start from: the checkpoint's weights and stored next epoch, or a random
/// initialization at epoch 1 when `fresh` is set.
pub fn startup_embedding<B: Backend>(
    ctx: &ExecutionContext<B>,
    settings: &RunSettings,
    reporter: &mut dyn Reporter,
) -> anyhow::Result<(EmbeddingNet<B>, usize)> {
    if settings.fresh {
        eprintln!("--fresh: starting from random weights");
        return Ok((EmbeddingNet::new(settings.model.clone(), ctx.device()), 1));
    }
    let paths = CheckpointPaths::resolve(&settings.checkpoint);
    let (net, epoch) = load_embedding::<B>(paths.load_file(), settings.model.clone(), ctx.device())
        .with_context(|| {
            format!(
                "loading startup checkpoint from {} (pass --fresh to start from random weights)",
                settings.checkpoint.display()
            )
        })?;
    reporter.report(&Event::CheckpointLoaded {
        path: paths.load_file().to_path_buf(),
        epoch,
    });
    Ok((net, epoch.max(1)))
}

fn run_train(
    ctx: &ExecutionContext<TrainBackend>,
    settings: &RunSettings,
    reporter: &mut dyn Reporter,
) -> anyhow::Result<()> {
    let ad = ctx.autodiff();
    let (embedding, start_epoch) = startup_embedding(&ad, settings, reporter)?;
    let loader = TripletLoader::from_root(
        &settings.datapath,
        settings.preprocess.clone(),
        settings.loader.clone(),
    )
    .with_context(|| format!("indexing dataset root {}", settings.datapath.display()))?;
    let outcome = train(&ad, settings, embedding, start_epoch, &loader, reporter)?;
    match outcome.last_checkpoint {
        Some(path) => eprintln!(
            "trained {} epochs; last checkpoint {}",
            outcome.epochs_run,
            path.display()
        ),
        None => eprintln!(
            "nothing to train: start epoch {start_epoch} is past --train_iter {}",
            settings.epochs
        ),
    }
    Ok(())
}

fn run_test(
    ctx: &ExecutionContext<TrainBackend>,
    settings: &RunSettings,
    reporter: &mut dyn Reporter,
) -> anyhow::Result<()> {
    let (net, _) = startup_embedding(ctx, settings, reporter)?;
    let matrix = evaluate(
        ctx,
        &net,
        &settings.datapath,
        &settings.preprocess,
        settings.batch_size,
        reporter,
    )
    .with_context(|| format!("evaluating images listed in {}", settings.datapath.display()))?;
    eprintln!("computed {0}x{0} distance matrix", matrix.len());
    Ok(())
}
