//! Checkpoint files: network weights plus epoch counter, and optimizer state.
//!
//! Layout under the save directory (Burn `BinBytesRecorder`, full precision):
//! - `new.bin`: [`CheckpointRecord`] (next epoch, wrapper record, network record)
//! - `new_optim.bin`: optimizer record (momentum buffers)
//!
//! Both files are overwritten in place at the end of every epoch.

use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Record, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use models::{EmbeddingNet, EmbeddingNetConfig, EmbeddingNetRecord, TripletNet, TripletNetRecord};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CHECKPOINT_STEM: &str = "new";
pub const OPTIMIZER_STEM: &str = "new_optim";
pub const CHECKPOINT_EXT: &str = "bin";

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint not found at {path}")]
    Missing { path: PathBuf },
    #[error("failed to load checkpoint {path}: {msg}")]
    Load { path: PathBuf, msg: String },
    #[error("checkpoint {path} does not match the configured network: {msg}")]
    Incompatible { path: PathBuf, msg: String },
    #[error("failed to save checkpoint {path}: {msg}")]
    Save { path: PathBuf, msg: String },
    #[error("checkpoint io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Record)]
pub struct CheckpointRecord<B: Backend> {
    /// Next epoch to run (completed epoch + 1).
    pub epoch: usize,
    pub tripletnet: TripletNetRecord<B>,
    pub embedding: EmbeddingNetRecord<B>,
}

/// Where the startup checkpoint is read from and where epoch checkpoints are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    load: PathBuf,
    save_dir: PathBuf,
}

impl CheckpointPaths {
    /// A directory (existing, or extension-less and not yet created) loads and saves `new.bin`
    /// inside it. An existing file, or a missing path with an extension, is loaded exactly as
    /// given and its parent receives the saves.
    pub fn resolve(arg: &Path) -> Self {
        let is_dir = arg.is_dir() || (!arg.exists() && arg.extension().is_none());
        if is_dir {
            return Self {
                load: arg.join(CHECKPOINT_STEM).with_extension(CHECKPOINT_EXT),
                save_dir: arg.to_path_buf(),
            };
        }
        let save_dir = match arg.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Self {
            load: arg.to_path_buf(),
            save_dir,
        }
    }

    pub fn load_file(&self) -> &Path {
        &self.load
    }

    pub fn save_dir(&self) -> &Path {
        &self.save_dir
    }

    pub fn model_file(&self) -> PathBuf {
        self.save_dir
            .join(CHECKPOINT_STEM)
            .with_extension(CHECKPOINT_EXT)
    }

    pub fn optimizer_file(&self) -> PathBuf {
        self.save_dir
            .join(OPTIMIZER_STEM)
            .with_extension(CHECKPOINT_EXT)
    }

    fn ensure_save_dir(&self) -> CheckpointResult<()> {
        fs::create_dir_all(&self.save_dir).map_err(|source| CheckpointError::Io {
            path: self.save_dir.clone(),
            source,
        })
    }
}

fn recorder() -> BinBytesRecorder<FullPrecisionSettings> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
}

fn write_record<B: Backend, R: Record<B>>(path: &Path, record: R) -> CheckpointResult<()> {
    let bytes = Recorder::<B>::record(&recorder(), record, ()).map_err(|e| {
        CheckpointError::Save {
            path: path.to_path_buf(),
            msg: e.to_string(),
        }
    })?;
    fs::write(path, bytes).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a record from exactly `path`; no extension is added or replaced.
fn read_record<B: Backend, R: Record<B>>(
    path: &Path,
    device: &B::Device,
) -> CheckpointResult<R> {
    if !path.is_file() {
        return Err(CheckpointError::Missing {
            path: path.to_path_buf(),
        });
    }
    let bytes = fs::read(path).map_err(|source| CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Recorder::<B>::load(&recorder(), bytes, device).map_err(|e| CheckpointError::Load {
        path: path.to_path_buf(),
        msg: e.to_string(),
    })
}

/// Write `new.bin` with both the wrapper and network snapshots.
pub fn save_checkpoint<B: Backend>(
    paths: &CheckpointPaths,
    next_epoch: usize,
    model: &TripletNet<B>,
) -> CheckpointResult<PathBuf> {
    paths.ensure_save_dir()?;
    let path = paths.model_file();
    let record = CheckpointRecord {
        epoch: next_epoch,
        tripletnet: model.clone().into_record(),
        embedding: model.embedding.clone().into_record(),
    };
    write_record::<B, _>(&path, record)?;
    Ok(path)
}

pub fn load_checkpoint<B: Backend>(
    path: &Path,
    device: &B::Device,
) -> CheckpointResult<CheckpointRecord<B>> {
    read_record::<B, _>(path, device)
}

/// Build a network from `cfg` and overwrite it with the checkpoint's network-level record.
///
/// Every layer's weight shape must match what `cfg` builds. Returns the network and the
/// stored next epoch.
pub fn load_embedding<B: Backend>(
    path: &Path,
    cfg: EmbeddingNetConfig,
    device: &B::Device,
) -> CheckpointResult<(EmbeddingNet<B>, usize)> {
    let record = load_checkpoint::<B>(path, device)?;
    let fresh = EmbeddingNet::<B>::new(cfg, device);
    let expected = fresh.layer_shapes();
    let net = fresh.load_record(record.embedding);
    for ((name, want), (_, got)) in expected.iter().zip(net.layer_shapes()) {
        if *want != got {
            return Err(CheckpointError::Incompatible {
                path: path.to_path_buf(),
                msg: format!("{name} weight is {got:?}, expected {want:?}"),
            });
        }
    }
    Ok((net, record.epoch))
}

pub fn save_optimizer<B, M, O>(paths: &CheckpointPaths, optim: &O) -> CheckpointResult<PathBuf>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    paths.ensure_save_dir()?;
    let path = paths.optimizer_file();
    write_record::<B, _>(&path, optim.to_record())?;
    Ok(path)
}

/// Restore optimizer state if `new_optim.bin` sits in the save directory.
///
/// Returns the optimizer and whether state was restored.
pub fn load_optimizer<B, M, O>(
    paths: &CheckpointPaths,
    optim: O,
    device: &B::Device,
) -> CheckpointResult<(O, bool)>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let path = paths.optimizer_file();
    if !path.is_file() {
        return Ok((optim, false));
    }
    let record = read_record::<B, O::Record>(&path, device)?;
    Ok((optim.load_record(record), true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_dir_loads_new_bin() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = CheckpointPaths::resolve(tmp.path());
        assert_eq!(paths.load_file(), tmp.path().join("new.bin"));
        assert_eq!(paths.save_dir(), tmp.path());
        assert_eq!(paths.model_file(), tmp.path().join("new.bin"));
        assert_eq!(paths.optimizer_file(), tmp.path().join("new_optim.bin"));
    }

    #[test]
    fn missing_extensionless_path_is_a_dir() {
        let paths = CheckpointPaths::resolve(Path::new("does/not/exist/checkpoints"));
        assert_eq!(paths.save_dir(), Path::new("does/not/exist/checkpoints"));
        assert_eq!(
            paths.load_file(),
            Path::new("does/not/exist/checkpoints/new.bin")
        );
    }

    #[test]
    fn file_path_saves_next_to_it() {
        let paths = CheckpointPaths::resolve(Path::new("runs/a/model.bin"));
        assert_eq!(paths.load_file(), Path::new("runs/a/model.bin"));
        assert_eq!(paths.save_dir(), Path::new("runs/a"));

        let bare = CheckpointPaths::resolve(Path::new("model.pth"));
        assert_eq!(bare.load_file(), Path::new("model.pth"));
        assert_eq!(bare.save_dir(), Path::new("."));
    }

    #[test]
    fn existing_extensionless_file_is_loaded_as_named() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("checkpoints");
        fs::write(&file, b"weights").unwrap();
        let paths = CheckpointPaths::resolve(&file);
        assert_eq!(paths.load_file(), file.as_path());
        assert_eq!(paths.save_dir(), tmp.path());
        assert_eq!(paths.model_file(), tmp.path().join("new.bin"));
    }

    #[test]
    fn renamed_checkpoint_file_loads_without_extension_rewrite() {
        type B = burn_ndarray::NdArray<f32>;
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let net = TripletNet::<B>::from_config(EmbeddingNetConfig::tiny(), &device);
        let saved = save_checkpoint(&CheckpointPaths::resolve(tmp.path()), 4, &net).unwrap();
        let renamed = tmp.path().join("run.ckpt");
        fs::rename(&saved, &renamed).unwrap();

        let paths = CheckpointPaths::resolve(&renamed);
        assert_eq!(paths.load_file(), renamed.as_path());
        let (_, epoch) =
            load_embedding::<B>(paths.load_file(), EmbeddingNetConfig::tiny(), &device).unwrap();
        assert_eq!(epoch, 4);
    }

    #[test]
    fn mismatched_network_config_is_rejected_at_load() {
        type B = burn_ndarray::NdArray<f32>;
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let net = TripletNet::<B>::from_config(EmbeddingNetConfig::tiny(), &device);
        let path = save_checkpoint(&CheckpointPaths::resolve(tmp.path()), 2, &net).unwrap();

        let wider = EmbeddingNetConfig {
            embedding_dim: 4,
            ..EmbeddingNetConfig::tiny()
        };
        let err = load_embedding::<B>(&path, wider, &device).err().unwrap();
        match err {
            CheckpointError::Incompatible { msg, .. } => assert!(msg.contains("fc2"), "{msg}"),
            other => panic!("unexpected error {other}"),
        }

        let channels = EmbeddingNetConfig {
            channels: [4, 8, 16, 8, 8],
            ..EmbeddingNetConfig::tiny()
        };
        let err = load_embedding::<B>(&path, channels, &device).err().unwrap();
        assert!(matches!(err, CheckpointError::Incompatible { .. }));
    }

    #[test]
    fn missing_checkpoint_is_typed() {
        let tmp = tempfile::tempdir().unwrap();
        let err = load_checkpoint::<burn_ndarray::NdArray<f32>>(
            &tmp.path().join("new.bin"),
            &Default::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, CheckpointError::Missing { .. }));
    }
}
