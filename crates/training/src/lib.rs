#![recursion_limit = "256"]

pub mod app;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod context;
pub mod eval;
pub mod events;
pub mod loss;
pub mod train;

pub use app::{run, startup_embedding};
pub use checkpoint::{
    load_checkpoint, load_embedding, save_checkpoint, CheckpointError, CheckpointPaths,
    CheckpointRecord,
};
pub use cli::{BackendKind, Mode, RunSettings, TripletArgs};
pub use config::{ConfigError, RunConfig};
pub use context::ExecutionContext;
pub use eval::{evaluate, DistanceMatrix, EvalError};
pub use events::{
    ConsoleReporter, Event, FanOut, JsonlReporter, MemoryReporter, NullReporter, Reporter,
};
pub use loss::{LossBreakdown, LossError, LossScalars, TripletLoss};
pub use models::{EmbeddingNet, EmbeddingNetConfig, TripletNet};
pub use train::{train, train_step, TrainOutcome};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
