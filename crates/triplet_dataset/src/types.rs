//! Core types, error definitions, and data structures for triplet_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image file missing: {path}")]
    MissingImage { path: PathBuf },
    #[error("malformed triplet list {path} line {line}: {msg}")]
    TripletList {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("dataset at {root} cannot form triplets: {msg}")]
    EmptyDataset { root: PathBuf, msg: String },
    #[error("invalid image geometry for {path}: {msg}")]
    Shape { path: PathBuf, msg: String },
    #[error("loader worker failed: {0}")]
    Worker(String),
}

impl DatasetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DatasetError::Io {
            path: path.into(),
            source,
        }
    }
}

/// One training example: paths to anchor, positive and negative views.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triplet {
    pub anchor: PathBuf,
    pub positive: PathBuf,
    pub negative: PathBuf,
}

/// All views of a single place (one subdirectory of the dataset root).
#[derive(Debug, Clone)]
pub struct Place {
    pub dir: PathBuf,
    pub views: Vec<PathBuf>,
}

/// Preprocessed triplet batch on the host, CHW f32 per image, concatenated per branch.
#[derive(Debug, Clone)]
pub struct HostBatch {
    pub len: usize,
    pub side: usize,
    pub anchor: Vec<f32>,
    pub positive: Vec<f32>,
    pub negative: Vec<f32>,
}

impl HostBatch {
    pub fn with_capacity(len: usize, side: usize) -> Self {
        let elems = len * 3 * side * side;
        Self {
            len: 0,
            side,
            anchor: Vec::with_capacity(elems),
            positive: Vec::with_capacity(elems),
            negative: Vec::with_capacity(elems),
        }
    }

    pub fn push(&mut self, anchor: &[f32], positive: &[f32], negative: &[f32]) {
        self.anchor.extend_from_slice(anchor);
        self.positive.extend_from_slice(positive);
        self.negative.extend_from_slice(negative);
        self.len += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
