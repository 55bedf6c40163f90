// src/lib.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NUMA-aware parallel SGD training for a sparse linear SVM, plus an offline
//! block-permutation optimizer that reorders a dataset to reduce cross-group
//! feature overlap before training.

pub mod barrier;
pub mod constants;
pub mod dataset;
pub mod error;
pub mod model;
pub mod optimizer;
pub mod perm;
pub mod pool;
pub mod scheme;
pub mod sgd;
pub mod topology;

pub use dataset::{DataPoint, LocalDataset, ReplicatedDataset};
pub use error::{ConfigError, DataError, TrainError};
pub use pool::WorkerPool;
pub use scheme::{DataScheme, HogWild, HogWildPlusPlus, MyWild, SharedScheme};
pub use sgd::{Algorithm, ExperimentConfig, ExperimentResult};
pub use topology::Topology;
