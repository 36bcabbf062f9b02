//! Optional TOML run configuration.
//!
//! Lookup order: `--config <path>`, then `$TRIPLET_EMBED_CONFIG`, then `triplet-embed.toml` in
//! the working directory. Every field is optional; missing ones keep their defaults.
//!
//! ```toml
//! [model]
//! embedding_dim = 128
//! hidden = 4096
//!
//! [data]
//! image_size = 227
//! workers = 4
//! seed = 7
//!
//! [loss]
//! embed_weight = 0.001
//! ```

use crate::loss::DEFAULT_EMBED_WEIGHT;
use models::EmbeddingNetConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use triplet_dataset::PreprocessConfig;

pub const DEFAULT_CONFIG_NAME: &str = "triplet-embed.toml";
pub const CONFIG_ENV: &str = "TRIPLET_EMBED_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config {path}: {msg}")]
    Invalid { path: PathBuf, msg: String },
}

/// Data-pipeline knobs that have no CLI flag.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSettings {
    pub preprocess: PreprocessConfig,
    pub epoch_size: usize,
    pub workers: usize,
    pub prefetch: usize,
    pub seed: Option<u64>,
    pub shuffle: bool,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            preprocess: PreprocessConfig::default(),
            epoch_size: 100_000,
            workers: 1,
            prefetch: 2,
            seed: None,
            shuffle: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: EmbeddingNetConfig,
    pub data: DataSettings,
    pub embed_weight: f32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: EmbeddingNetConfig::default(),
            data: DataSettings::default(),
            embed_weight: DEFAULT_EMBED_WEIGHT,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    model: Option<ModelSection>,
    data: Option<DataSection>,
    loss: Option<LossSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelSection {
    embedding_dim: Option<usize>,
    hidden: Option<usize>,
    channels: Option<[usize; 5]>,
    dropout: Option<f64>,
    pooled: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DataSection {
    /// Crop side; also the resize target unless `resize` is given.
    image_size: Option<u32>,
    resize: Option<u32>,
    epoch_size: Option<usize>,
    workers: Option<usize>,
    prefetch: Option<usize>,
    seed: Option<u64>,
    shuffle: Option<bool>,
    mean: Option<[f32; 3]>,
    std: Option<[f32; 3]>,
}

#[derive(Debug, Deserialize, Default)]
struct LossSection {
    embed_weight: Option<f32>,
}

impl RunConfig {
    /// Resolve and load the run config.
    ///
    /// An explicitly named file (flag or env var) must load; the implicit default file is
    /// skipped with a warning when it cannot be parsed. Returns the file actually used.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        if let Some(path) = named {
            let cfg = Self::from_path(&path)?;
            cfg.warn_if_unusual();
            return Ok((cfg, Some(path)));
        }
        let default = PathBuf::from(DEFAULT_CONFIG_NAME);
        if !default.is_file() {
            return Ok((Self::default(), None));
        }
        match Self::from_path(&default) {
            Ok(cfg) => {
                cfg.warn_if_unusual();
                Ok((cfg, Some(default)))
            }
            Err(e) => {
                eprintln!("config: ignoring {DEFAULT_CONFIG_NAME}: {e}");
                Ok((Self::default(), None))
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw, path)
    }

    /// Parse TOML text; `origin` only labels errors.
    pub fn from_toml_str(raw: &str, origin: &Path) -> Result<Self, ConfigError> {
        let file: RunConfigFile = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_file(file);
        cfg.validate().map_err(|msg| ConfigError::Invalid {
            path: origin.to_path_buf(),
            msg,
        })?;
        Ok(cfg)
    }

    fn from_file(file: RunConfigFile) -> Self {
        let defaults = Self::default();
        let model = file.model.unwrap_or_default();
        let data = file.data.unwrap_or_default();
        let loss = file.loss.unwrap_or_default();

        let base_model = defaults.model;
        let model = EmbeddingNetConfig {
            channels: model.channels.unwrap_or(base_model.channels),
            hidden: model.hidden.unwrap_or(base_model.hidden),
            embedding_dim: model.embedding_dim.unwrap_or(base_model.embedding_dim),
            dropout: model.dropout.unwrap_or(base_model.dropout),
            pooled: model.pooled.unwrap_or(base_model.pooled),
        };

        let base_data = defaults.data;
        let base_pre = base_data.preprocess;
        let crop = data.image_size.unwrap_or(base_pre.crop);
        let preprocess = PreprocessConfig {
            crop,
            resize: data.resize.or(data.image_size).unwrap_or(base_pre.resize),
            mean: data.mean.unwrap_or(base_pre.mean),
            std: data.std.unwrap_or(base_pre.std),
        };
        let data = DataSettings {
            preprocess,
            epoch_size: data.epoch_size.unwrap_or(base_data.epoch_size),
            workers: data.workers.unwrap_or(base_data.workers),
            prefetch: data.prefetch.unwrap_or(base_data.prefetch),
            seed: data.seed.or(base_data.seed),
            shuffle: data.shuffle.unwrap_or(base_data.shuffle),
        };

        RunConfig {
            model,
            data,
            embed_weight: loss.embed_weight.unwrap_or(defaults.embed_weight),
        }
    }

    fn validate(&self) -> Result<(), String> {
        let pre = &self.data.preprocess;
        if pre.crop == 0 {
            return Err("data.image_size must be positive".to_string());
        }
        if pre.resize < pre.crop {
            return Err(format!(
                "data.resize ({}) is smaller than data.image_size ({})",
                pre.resize, pre.crop
            ));
        }
        if pre.std.iter().any(|s| *s == 0.0) {
            return Err("data.std must not contain zero".to_string());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(format!(
                "model.dropout must be in [0, 1), got {}",
                self.model.dropout
            ));
        }
        if self.model.embedding_dim == 0 || self.model.hidden == 0 {
            return Err("model.embedding_dim and model.hidden must be positive".to_string());
        }
        Ok(())
    }

    fn warn_if_unusual(&self) {
        let min = self.model.min_input_size();
        if (self.data.preprocess.crop as usize) < min {
            eprintln!(
                "config: data.image_size {} is below the network's minimum input of {min}px",
                self.data.preprocess.crop
            );
        }
        if self.data.workers == 0 {
            eprintln!("config: data.workers = 0; using a single loader thread");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_keeps_defaults() {
        let cfg = RunConfig::from_toml_str("", Path::new("inline.toml")).unwrap();
        assert_eq!(cfg.model.embedding_dim, 128);
        assert_eq!(cfg.data, DataSettings::default());
        assert_eq!(cfg.embed_weight, DEFAULT_EMBED_WEIGHT);
    }

    #[test]
    fn sections_override_fields() {
        let raw = r#"
[model]
embedding_dim = 32
channels = [4, 8, 8, 8, 8]
pooled = 1

[data]
image_size = 96
workers = 3
seed = 9
shuffle = false
mean = [0.5, 0.5, 0.5]

[loss]
embed_weight = 0.01
"#;
        let cfg = RunConfig::from_toml_str(raw, Path::new("inline.toml")).unwrap();
        assert_eq!(cfg.model.embedding_dim, 32);
        assert_eq!(cfg.model.channels, [4, 8, 8, 8, 8]);
        assert_eq!(cfg.model.hidden, 4096);
        assert_eq!(cfg.data.preprocess.crop, 96);
        assert_eq!(cfg.data.preprocess.resize, 96);
        assert_eq!(cfg.data.preprocess.mean, [0.5; 3]);
        assert_eq!(cfg.data.workers, 3);
        assert_eq!(cfg.data.seed, Some(9));
        assert!(!cfg.data.shuffle);
        assert_eq!(cfg.embed_weight, 0.01);
    }

    #[test]
    fn resize_below_crop_is_invalid() {
        let raw = "[data]\nimage_size = 100\nresize = 80\n";
        let err = RunConfig::from_toml_str(raw, Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = RunConfig::from_toml_str("[model\nhidden = ", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn explicit_missing_file_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let err = RunConfig::load(Some(&tmp.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
