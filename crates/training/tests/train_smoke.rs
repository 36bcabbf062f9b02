mod common;

use burn::backend::Autodiff;
use burn::module::AutodiffModule;
use burn::tensor::{Distribution, Tensor};
use burn_ndarray::NdArray;
use training::{
    load_embedding, startup_embedding, train, Event, ExecutionContext, MemoryReporter,
};
use triplet_dataset::TripletLoader;

type Inner = NdArray<f32>;
type Backend = Autodiff<Inner>;

#[test]
fn two_epochs_write_checkpoint_and_report() -> anyhow::Result<()> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    common::create_places(data.path(), 2, 2)?;
    let ckpt_dir = ckpt.path().join("checkpoints");
    let settings = common::settings(&[
        "--mode",
        "train",
        "--fresh",
        "--bsize",
        "2",
        "--epochs",
        "2",
        "--datapath",
        data.path().to_str().unwrap(),
        "--checkpoint",
        ckpt_dir.to_str().unwrap(),
    ]);

    let ctx = ExecutionContext::<Inner>::resolve().autodiff();
    let mut reporter = MemoryReporter::default();
    let (embedding, start) = startup_embedding(&ctx, &settings, &mut reporter)?;
    assert_eq!(start, 1);
    assert!(reporter.events.is_empty());

    let loader = TripletLoader::from_root(
        &settings.datapath,
        settings.preprocess.clone(),
        settings.loader.clone(),
    )?;
    let outcome = train(&ctx, &settings, embedding, start, &loader, &mut reporter)?;
    assert_eq!(outcome.epochs_run, 2);
    assert!(!outcome.optimizer_restored);
    assert!(ckpt_dir.join("new.bin").is_file());
    assert!(ckpt_dir.join("new_optim.bin").is_file());

    let batches: Vec<_> = reporter
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Batch {
                epoch, batch, loss, ..
            } => Some((*epoch, *batch, *loss)),
            _ => None,
        })
        .collect();
    assert_eq!(batches.len(), 4);
    assert!(batches.iter().all(|(_, _, loss)| loss.is_finite() && *loss >= 0.0));
    let numbering: Vec<_> = batches.iter().map(|(e, b, _)| (*e, *b)).collect();
    assert_eq!(numbering, vec![(1, 1), (1, 2), (2, 1), (2, 2)]);
    let epochs: Vec<_> = reporter
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Epoch { epoch, batches, .. } => Some((*epoch, *batches)),
            _ => None,
        })
        .collect();
    assert_eq!(epochs, vec![(1, 2), (2, 2)]);

    // The saved network must embed exactly like the in-memory one.
    let device = Default::default();
    let (restored, next_epoch) =
        load_embedding::<Inner>(&ckpt_dir.join("new.bin"), settings.model.clone(), &device)?;
    assert_eq!(next_epoch, 3);
    let trained = outcome.model.valid().into_embedding();
    let input = Tensor::<Inner, 4>::random([2, 3, 72, 72], Distribution::Default, &device);
    let a = trained.forward(input.clone()).into_data().to_vec::<f32>().unwrap();
    let b = restored.forward(input).into_data().to_vec::<f32>().unwrap();
    for (x, y) in a.iter().zip(&b) {
        assert!((x - y).abs() < 1e-5, "{x} vs {y}");
    }
    Ok(())
}

#[test]
fn resume_continues_from_stored_epoch() -> anyhow::Result<()> {
    let data = tempfile::tempdir()?;
    let ckpt = tempfile::tempdir()?;
    common::create_places(data.path(), 3, 2)?;
    let datapath = data.path().to_str().unwrap().to_string();
    let ckpt_dir = ckpt.path().to_str().unwrap().to_string();
    let base = ["--bsize", "4", "--datapath", &datapath, "--checkpoint", &ckpt_dir];

    let ctx = ExecutionContext::<Inner>::resolve().autodiff();
    let mut first = MemoryReporter::default();
    let mut args = vec!["--fresh", "--epochs", "1"];
    args.extend_from_slice(&base);
    let settings = common::settings(&args);
    let loader = TripletLoader::from_root(
        &settings.datapath,
        settings.preprocess.clone(),
        settings.loader.clone(),
    )?;
    let (embedding, start) = startup_embedding(&ctx, &settings, &mut first)?;
    train::<Backend>(&ctx, &settings, embedding, start, &loader, &mut first)?;

    let mut second = MemoryReporter::default();
    let mut args = vec!["--epochs", "2"];
    args.extend_from_slice(&base);
    let settings = common::settings(&args);
    let (embedding, start) = startup_embedding(&ctx, &settings, &mut second)?;
    assert_eq!(start, 2);
    assert!(matches!(
        second.events.first(),
        Some(Event::CheckpointLoaded { epoch: 2, .. })
    ));
    let outcome = train(&ctx, &settings, embedding, start, &loader, &mut second)?;
    assert_eq!(outcome.epochs_run, 1);
    assert!(outcome.optimizer_restored);
    Ok(())
}

#[test]
fn missing_checkpoint_is_fatal_without_fresh() -> anyhow::Result<()> {
    let ckpt = tempfile::tempdir()?;
    let settings = common::settings(&[
        "--mode",
        "train",
        "--checkpoint",
        ckpt.path().to_str().unwrap(),
    ]);
    let ctx = ExecutionContext::<Inner>::resolve();
    let mut reporter = MemoryReporter::default();
    let err = startup_embedding(&ctx, &settings, &mut reporter).unwrap_err();
    assert!(err.to_string().contains("--fresh"));
    assert!(reporter.events.is_empty());
    Ok(())
}
