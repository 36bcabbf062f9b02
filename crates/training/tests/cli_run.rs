mod common;

use clap::Parser;
use std::fs;
use training::{run, TripletArgs};

const TINY_TOML: &str = r#"
[model]
channels = [4, 8, 8, 8, 8]
hidden = 16
embedding_dim = 8
pooled = 1

[data]
image_size = 72
epoch_size = 4
seed = 3
"#;

#[test]
fn test_mode_writes_distance_events() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let imgs = [tmp.path().join("x.png"), tmp.path().join("y.png")];
    for (i, p) in imgs.iter().enumerate() {
        common::write_image(p, i as u32)?;
    }
    let list = tmp.path().join("list.txt");
    fs::write(&list, format!("{}\n{}\n", imgs[0].display(), imgs[1].display()))?;
    let config = tmp.path().join("run.toml");
    fs::write(&config, TINY_TOML)?;
    let metrics = tmp.path().join("logs/metrics.jsonl");

    let args = TripletArgs::try_parse_from([
        "triplet_embed",
        "--mode",
        "test",
        "--fresh",
        "--quiet",
        "--datapath",
        list.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--metrics-out",
        metrics.to_str().unwrap(),
    ])?;
    run(args)?;

    let lines: Vec<serde_json::Value> = fs::read_to_string(&metrics)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    let distances = lines.iter().filter(|v| v["event"] == "distance").count();
    let rows = lines.iter().filter(|v| v["event"] == "eval_row").count();
    assert_eq!(distances, 4);
    assert_eq!(rows, 2);
    Ok(())
}

#[test]
fn train_mode_without_checkpoint_aborts() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    common::create_places(tmp.path(), 2, 2)?;
    let config = tmp.path().join("run.toml");
    fs::write(&config, TINY_TOML)?;
    let ckpt = tmp.path().join("ckpt");
    let args = TripletArgs::try_parse_from([
        "triplet_embed",
        "--mode",
        "train",
        "--quiet",
        "--epochs",
        "1",
        "--datapath",
        tmp.path().to_str().unwrap(),
        "--checkpoint",
        ckpt.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ])?;
    assert!(run(args).is_err());
    assert!(!ckpt.join("new.bin").exists());
    Ok(())
}

#[test]
fn explicit_bad_config_is_fatal() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let config = tmp.path().join("broken.toml");
    fs::write(&config, "[model\n")?;
    let args = TripletArgs::try_parse_from([
        "triplet_embed",
        "--fresh",
        "--quiet",
        "--config",
        config.to_str().unwrap(),
    ])?;
    assert!(run(args).is_err());
    Ok(())
}
