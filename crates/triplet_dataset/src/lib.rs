//! Triplet dataset loading and Burn-compatible batching.
//!
//! This crate provides:
//! - Image preprocessing (shorter-side resize, center crop, CHW normalize)
//! - Indexing a dataset root into fixed triplet lists or place directories
//! - Seeded triplet sampling (anchor/positive from one place, negative from another)
//! - A loader that preprocesses batches on a worker pool ahead of the training loop

pub mod index;
pub mod loader;
pub mod preprocess;
pub mod types;

pub use index::{index_places, parse_triplet_list, sample_triplets, TripletSource, TRIPLET_LIST_NAME};
pub use loader::{EpochIter, LoaderConfig, TripletBatch, TripletLoader};
pub use preprocess::{resized_dims, PreprocessConfig};
pub use types::*;
