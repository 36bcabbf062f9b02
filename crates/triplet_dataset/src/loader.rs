//! Background-prefetching triplet batch loader.

use crate::index::TripletSource;
use crate::preprocess::PreprocessConfig;
use crate::types::{DatasetError, DatasetResult, HostBatch, Triplet};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};
use crossbeam_channel::{bounded, Receiver};
use rand::SeedableRng;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Triplets drawn per epoch from place directories (ignored for triplet lists).
    pub epoch_size: usize,
    /// Shuffle list sources each epoch.
    pub shuffle: bool,
    /// Seed for reproducible sampling; epoch `e` uses `seed ^ e`.
    pub seed: Option<u64>,
    /// Threads used to decode/preprocess images.
    pub workers: usize,
    /// Host batches buffered ahead of the consumer.
    pub prefetch: usize,
    /// Drop the trailing partial batch.
    pub drop_last: bool,
    /// Emit per-batch timing lines on stderr.
    pub log_batches: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            epoch_size: 100_000,
            shuffle: true,
            seed: None,
            workers: 1,
            prefetch: 2,
            drop_last: false,
            log_batches: false,
        }
    }
}

/// One triplet batch on a device, each branch `[B, 3, side, side]`.
#[derive(Debug, Clone)]
pub struct TripletBatch<B: Backend> {
    pub anchor: Tensor<B, 4>,
    pub positive: Tensor<B, 4>,
    pub negative: Tensor<B, 4>,
}

impl<B: Backend> TripletBatch<B> {
    pub fn from_host(batch: HostBatch, device: &B::Device) -> Self {
        let shape = [batch.len, 3, batch.side, batch.side];
        let to_tensor =
            |buf: Vec<f32>| Tensor::<B, 4>::from_data(TensorData::new(buf, shape), device);
        Self {
            anchor: to_tensor(batch.anchor),
            positive: to_tensor(batch.positive),
            negative: to_tensor(batch.negative),
        }
    }

    pub fn len(&self) -> usize {
        self.anchor.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct TripletLoader {
    source: Arc<TripletSource>,
    preprocess: Arc<PreprocessConfig>,
    cfg: LoaderConfig,
    pool: Arc<rayon::ThreadPool>,
}

impl TripletLoader {
    pub fn new(
        source: TripletSource,
        preprocess: PreprocessConfig,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers.max(1))
            .thread_name(|i| format!("triplet-loader-{i}"))
            .build()
            .map_err(|e| DatasetError::Worker(e.to_string()))?;
        Ok(Self {
            source: Arc::new(source),
            preprocess: Arc::new(preprocess),
            cfg,
            pool: Arc::new(pool),
        })
    }

    pub fn from_root(
        root: &Path,
        preprocess: PreprocessConfig,
        cfg: LoaderConfig,
    ) -> DatasetResult<Self> {
        Self::new(TripletSource::from_root(root)?, preprocess, cfg)
    }

    pub fn source(&self) -> &TripletSource {
        &self.source
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    pub fn batches_per_epoch(&self) -> usize {
        let total = self.source.epoch_len(self.cfg.epoch_size);
        let bs = self.cfg.batch_size.max(1);
        if self.cfg.drop_last {
            total / bs
        } else {
            total.div_ceil(bs)
        }
    }

    /// Start producing batches for `epoch` on a background thread.
    pub fn epoch(&self, epoch: usize) -> EpochIter {
        let mut rng = match self.cfg.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed ^ epoch as u64),
            None => rand::rngs::StdRng::from_rng(&mut rand::rng()),
        };
        let triplets =
            self.source
                .epoch_triplets(self.cfg.epoch_size, self.cfg.shuffle, &mut rng);
        let expected = self.batches_per_epoch();

        let (tx, rx) = bounded(self.cfg.prefetch.max(1));
        let preprocess = self.preprocess.clone();
        let pool = self.pool.clone();
        let batch_size = self.cfg.batch_size.max(1);
        let drop_last = self.cfg.drop_last;
        thread::spawn(move || {
            for chunk in triplets.chunks(batch_size) {
                if drop_last && chunk.len() < batch_size {
                    break;
                }
                let res = pool.install(|| load_chunk(chunk, &preprocess));
                let failed = res.is_err();
                if tx.send(Some(res)).is_err() || failed {
                    return;
                }
            }
            let _ = tx.send(None);
        });

        EpochIter {
            rx,
            epoch,
            expected,
            batches: 0,
            samples: 0,
            ended: false,
            log_batches: self.cfg.log_batches,
            started: Instant::now(),
            total_wait: Duration::ZERO,
        }
    }
}

fn load_chunk(chunk: &[Triplet], preprocess: &PreprocessConfig) -> DatasetResult<HostBatch> {
    let loaded = chunk
        .par_iter()
        .map(|t| {
            Ok((
                preprocess.load(&t.anchor)?,
                preprocess.load(&t.positive)?,
                preprocess.load(&t.negative)?,
            ))
        })
        .collect::<DatasetResult<Vec<_>>>()?;
    let mut batch = HostBatch::with_capacity(chunk.len(), preprocess.side());
    for (a, p, n) in &loaded {
        batch.push(a, p, n);
    }
    Ok(batch)
}

/// Consumer side of one epoch. Batches arrive in triplet order.
pub struct EpochIter {
    rx: Receiver<Option<DatasetResult<HostBatch>>>,
    epoch: usize,
    expected: usize,
    batches: usize,
    samples: usize,
    ended: bool,
    log_batches: bool,
    started: Instant,
    total_wait: Duration,
}

impl EpochIter {
    pub fn next_host(&mut self) -> DatasetResult<Option<HostBatch>> {
        if self.ended {
            return Ok(None);
        }
        let t_wait = Instant::now();
        let msg = self.rx.recv();
        let waited = t_wait.elapsed();
        self.total_wait += waited;
        match msg {
            Ok(Some(Ok(batch))) => {
                self.batches += 1;
                self.samples += batch.len;
                if self.log_batches {
                    eprintln!(
                        "[loader] epoch={} batch={}/{} samples={} wait_ms={:.2}",
                        self.epoch,
                        self.batches,
                        self.expected,
                        batch.len,
                        waited.as_secs_f64() * 1000.0
                    );
                }
                Ok(Some(batch))
            }
            Ok(Some(Err(e))) => {
                self.ended = true;
                Err(e)
            }
            Ok(None) => {
                self.ended = true;
                if self.log_batches {
                    self.log_summary();
                }
                Ok(None)
            }
            Err(_) => {
                self.ended = true;
                Err(DatasetError::Worker(format!(
                    "producer for epoch {} exited after {} of {} batches",
                    self.epoch, self.batches, self.expected
                )))
            }
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<TripletBatch<B>>> {
        Ok(self
            .next_host()?
            .map(|batch| TripletBatch::from_host(batch, device)))
    }

    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    fn log_summary(&self) {
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        eprintln!(
            "[loader] epoch={} done batches={} samples={} elapsed={:.1}s rate={:.1} triplets/s total_wait_ms={:.1}",
            self.epoch,
            self.batches,
            self.samples,
            secs,
            self.samples as f32 / secs,
            self.total_wait.as_secs_f64() * 1000.0
        );
    }
}
