#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use training::{RunConfig, RunSettings, TripletArgs};
use clap::Parser;
use models::EmbeddingNetConfig;
use triplet_dataset::PreprocessConfig;

pub const SIDE: u32 = 72;

/// Gradient image whose pattern depends on `seed`, slightly wider than tall.
pub fn write_image(path: &Path, seed: u32) -> anyhow::Result<()> {
    let img = RgbImage::from_fn(SIDE + 8, SIDE, |x, y| {
        Rgb([
            ((x * (seed + 1) * 3) % 256) as u8,
            ((y * (seed + 2) * 5) % 256) as u8,
            ((x + y + seed * 37) % 256) as u8,
        ])
    });
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    img.save(path)?;
    Ok(())
}

pub fn create_places(root: &Path, places: u32, views: u32) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for p in 0..places {
        for v in 0..views {
            let path = root.join(format!("place_{p}/view_{v}.png"));
            write_image(&path, p * 10 + v)?;
            out.push(path);
        }
    }
    Ok(out)
}

pub fn tiny_config() -> RunConfig {
    let mut cfg = RunConfig::default();
    cfg.model = EmbeddingNetConfig::tiny();
    cfg.data.preprocess = PreprocessConfig::square(SIDE);
    cfg.data.epoch_size = 4;
    cfg.data.seed = Some(1);
    cfg
}

pub fn settings(extra: &[&str]) -> RunSettings {
    let mut argv = vec!["triplet_embed"];
    argv.extend_from_slice(extra);
    let args = TripletArgs::try_parse_from(argv).unwrap();
    RunSettings::from_parts(&args, tiny_config())
}
