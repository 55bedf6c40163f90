// src/error.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed error taxonomy shared by dataset loading, scheme construction and the
//! SGD engine.
//!
//! Errors are split along the fatal/non-fatal line the driver binaries care about:
//! anything in this module that escapes as `Err` is fatal (aborts the current
//! experiment, or the whole process for a missing input file). "The experiment
//! did not converge" is not an error at all — it is a field on `ExperimentResult`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DataError {
    #[error("cannot open dataset file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("permutation file {path} has {found} entries, expected {expected}")]
    PermutationSizeMismatch {
        path: String,
        found: usize,
        expected: usize,
    },

    #[error("permutation file {path} is not a valid permutation of [0, {size})")]
    NotAPermutation { path: String, size: usize },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{threads} physical threads is not divisible by cluster_size {cluster_size}")]
    ClusterSizeNotDivisor { threads: usize, cluster_size: usize },

    #[error("unknown algorithm {0:?}, expected HogWild, HogWild++ or MyWild")]
    UnknownAlgorithm(String),

    #[error("experiment command line {0:?} does not have 11 fields")]
    MalformedExperimentLine(String),

    #[error("field {field} could not be parsed from {value:?}: {source}")]
    BadField {
        field: &'static str,
        value: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{groups} groups exceeds the chain-search limit of {limit} (Held-Karp cost is exponential in the group count)")]
    TooManyGroups { groups: usize, limit: usize },
}

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("ring synchronization elected worker {worker} whose next cluster equals its own cluster {cluster}")]
    RingSyncSameCluster { worker: usize, cluster: usize },

    #[error("model weight diverged to a non-finite value at feature {feature}")]
    NonFiniteWeight { feature: usize },
}
