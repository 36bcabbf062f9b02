use crate::config::RunConfig;
use clap::{Parser, ValueEnum};
use models::EmbeddingNetConfig;
use std::path::PathBuf;
use triplet_dataset::{LoaderConfig, PreprocessConfig};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "triplet_embed",
    about = "Train a triplet-ranking image embedding or print pairwise embedding distances"
)]
pub struct TripletArgs {
    /// `train` on a dataset root or `test` on a list of image paths.
    #[arg(long, value_enum, default_value_t = Mode::Test)]
    pub mode: Mode,
    /// Dataset root (train) or newline-delimited image list (test).
    #[arg(long, default_value = "datapath")]
    pub datapath: PathBuf,
    /// Batch size.
    #[arg(long, default_value_t = 10)]
    pub bsize: usize,
    /// Ranking-loss margin.
    #[arg(long, default_value_t = 0.2)]
    pub margin: f32,
    /// SGD learning rate.
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,
    /// SGD momentum.
    #[arg(long, default_value_t = 0.5)]
    pub momentum: f64,
    /// Checkpoint directory (loads and saves `new.bin`) or checkpoint file to load.
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint: PathBuf,
    /// Last epoch to train.
    #[arg(
        long = "train_iter",
        visible_aliases = ["epochs", "train-iter"],
        default_value_t = 20_000_000
    )]
    pub train_iter: usize,
    /// Accepted for compatibility; unused.
    #[arg(long, default_value_t = 0.001)]
    pub tau: f64,
    /// Accepted for compatibility; unused.
    #[arg(long, default_value_t = 50_000.0)]
    pub epsilon: f64,
    /// Log per-batch loader timing on stderr.
    #[arg(long)]
    pub debug: bool,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Start from random weights instead of loading the checkpoint.
    #[arg(long)]
    pub fresh: bool,
    /// Append JSONL run events to this file.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
    /// Suppress console output of run events.
    #[arg(long)]
    pub quiet: bool,
    /// TOML run config (falls back to $TRIPLET_EMBED_CONFIG, then ./triplet-embed.toml).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            eprintln!("note: built with backend-wgpu; the run will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}

/// Everything a train or test run needs, merged once from the CLI and the TOML config.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub mode: Mode,
    pub datapath: PathBuf,
    pub checkpoint: PathBuf,
    pub batch_size: usize,
    pub margin: f32,
    pub lr: f64,
    pub momentum: f64,
    pub epochs: usize,
    pub embed_weight: f32,
    pub fresh: bool,
    pub model: EmbeddingNetConfig,
    pub preprocess: PreprocessConfig,
    pub loader: LoaderConfig,
}

impl RunSettings {
    pub fn from_parts(args: &TripletArgs, cfg: RunConfig) -> Self {
        let batch_size = args.bsize.max(1);
        let data = cfg.data;
        let loader = LoaderConfig {
            batch_size,
            epoch_size: data.epoch_size,
            shuffle: data.shuffle,
            seed: data.seed,
            workers: data.workers.max(1),
            prefetch: data.prefetch.max(1),
            drop_last: false,
            log_batches: args.debug,
        };
        Self {
            mode: args.mode,
            datapath: args.datapath.clone(),
            checkpoint: args.checkpoint.clone(),
            batch_size,
            margin: args.margin,
            lr: args.lr,
            momentum: args.momentum,
            epochs: args.train_iter,
            embed_weight: cfg.embed_weight,
            fresh: args.fresh,
            model: cfg.model,
            preprocess: data.preprocess,
            loader,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "mode={:?} datapath={} checkpoint={} bsize={} margin={} lr={} momentum={} epochs={} embed_dim={} {}",
            self.mode,
            self.datapath.display(),
            self.checkpoint.display(),
            self.batch_size,
            self.margin,
            self.lr,
            self.momentum,
            self.epochs,
            self.model.embedding_dim,
            self.preprocess.describe()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_flags() {
        let args = TripletArgs::try_parse_from(["triplet_embed"]).unwrap();
        assert_eq!(args.mode, Mode::Test);
        assert_eq!(args.datapath, PathBuf::from("datapath"));
        assert_eq!(args.bsize, 10);
        assert_eq!(args.margin, 0.2);
        assert_eq!(args.lr, 0.01);
        assert_eq!(args.momentum, 0.5);
        assert_eq!(args.checkpoint, PathBuf::from("checkpoints"));
        assert_eq!(args.train_iter, 20_000_000);
        assert!(!args.fresh && !args.quiet && !args.debug);
    }

    #[test]
    fn epoch_flag_aliases() {
        for flag in ["--train_iter", "--epochs", "--train-iter"] {
            let args = TripletArgs::try_parse_from(["triplet_embed", flag, "3"]).unwrap();
            assert_eq!(args.train_iter, 3);
        }
    }

    #[test]
    fn unknown_mode_is_rejected() {
        assert!(TripletArgs::try_parse_from(["triplet_embed", "--mode", "validate"]).is_err());
    }

    #[test]
    fn settings_merge_cli_and_config() {
        let args = TripletArgs::try_parse_from([
            "triplet_embed",
            "--mode",
            "train",
            "--bsize",
            "0",
            "--debug",
        ])
        .unwrap();
        let mut cfg = RunConfig::default();
        cfg.data.seed = Some(3);
        cfg.data.workers = 0;
        let settings = RunSettings::from_parts(&args, cfg);
        assert_eq!(settings.mode, Mode::Train);
        assert_eq!(settings.batch_size, 1);
        assert_eq!(settings.loader.batch_size, 1);
        assert_eq!(settings.loader.seed, Some(3));
        assert_eq!(settings.loader.workers, 1);
        assert!(settings.loader.log_batches);
    }
}
