//! Embedding a list of images and printing their pairwise distances.

use crate::context::ExecutionContext;
use crate::events::{Event, Reporter};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use models::EmbeddingNet;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use triplet_dataset::{DatasetError, PreprocessConfig};

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to read image list {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image list {path} names no images")]
    EmptyList { path: PathBuf },
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("unexpected embedding output: {0}")]
    Tensor(String),
}

/// Newline-delimited image paths; lines are trimmed and blank lines skipped.
pub fn read_image_list(path: &Path) -> EvalResult<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).map_err(|source| EvalError::List {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Embed `paths` in batches of `batch_size`, one host vector per image in input order.
pub fn embed_images<B: Backend>(
    ctx: &ExecutionContext<B>,
    net: &EmbeddingNet<B>,
    paths: &[PathBuf],
    preprocess: &PreprocessConfig,
    batch_size: usize,
) -> EvalResult<Vec<Vec<f32>>> {
    let side = preprocess.side();
    let mut out = Vec::with_capacity(paths.len());
    for chunk in paths.chunks(batch_size.max(1)) {
        let images = chunk
            .par_iter()
            .map(|p| preprocess.load(p))
            .collect::<Result<Vec<_>, _>>()?;
        let flat: Vec<f32> = images.into_iter().flatten().collect();
        let input = Tensor::<B, 4>::from_data(
            TensorData::new(flat, [chunk.len(), 3, side, side]),
            ctx.device(),
        );
        let emb = net.forward(input);
        let [rows, dim] = emb.dims();
        let values = emb
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| EvalError::Tensor(format!("{e:?}")))?;
        if rows != chunk.len() || values.len() != rows * dim {
            return Err(EvalError::Tensor(format!(
                "expected {} rows, got [{rows}, {dim}] with {} values",
                chunk.len(),
                values.len()
            )));
        }
        out.extend(values.chunks(dim).map(<[f32]>::to_vec));
    }
    Ok(out)
}

pub fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Row-major `n x n` distances between the embeddings of `paths`.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    pub paths: Vec<PathBuf>,
    pub values: Vec<f32>,
}

impl DistanceMatrix {
    pub fn from_embeddings(paths: Vec<PathBuf>, embeddings: &[Vec<f32>]) -> Self {
        let n = embeddings.len();
        let mut values = Vec::with_capacity(n * n);
        for ei in embeddings {
            for ej in embeddings {
                values.push(euclidean(ej, ei));
            }
        }
        Self { paths, values }
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.values[i * self.len() + j]
    }

    pub fn row(&self, i: usize) -> &[f32] {
        let n = self.len();
        &self.values[i * n..(i + 1) * n]
    }
}

/// Embed every image listed in `list_path` and report all ordered pairwise distances.
pub fn evaluate<B: Backend>(
    ctx: &ExecutionContext<B>,
    net: &EmbeddingNet<B>,
    list_path: &Path,
    preprocess: &PreprocessConfig,
    batch_size: usize,
    reporter: &mut dyn Reporter,
) -> EvalResult<DistanceMatrix> {
    let paths = read_image_list(list_path)?;
    if paths.is_empty() {
        return Err(EvalError::EmptyList {
            path: list_path.to_path_buf(),
        });
    }
    let embeddings = embed_images(ctx, net, &paths, preprocess, batch_size)?;
    let matrix = DistanceMatrix::from_embeddings(paths, &embeddings);
    for i in 0..matrix.len() {
        reporter.report(&Event::EvalRow {
            i,
            path: matrix.paths[i].clone(),
        });
        for (j, distance) in matrix.row(i).iter().enumerate() {
            reporter.report(&Event::Distance {
                i,
                j,
                distance: *distance,
            });
        }
    }
    reporter.flush();
    Ok(matrix)
}
