// src/sgd.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-epoch SGD orchestration and the experiment-command-line contract.
//! Grounded on `experiment.h` (`thread_task`, `run_experiment`) and
//! `run_configuration.h` (`experiment_configuration::from_string`,
//! `run_experiments_internal`).

use crate::barrier::{CyclicBarrier, Spin};
use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_MU, DEFAULT_STEP_DECAY, DEFAULT_STEP_SIZE, DEFAULT_TOLERANCE, DEFAULT_UPDATE_DELAY};
use crate::dataset::ReplicatedDataset;
use crate::error::ConfigError;
use crate::model::{model_update, MetricSummary};
use crate::perm::Permutation;
use crate::pool::WorkerPool;
use crate::scheme::{DataScheme, HogWild, HogWildPlusPlus, MyWild, SharedScheme};
use crate::topology::Topology;
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    HogWild,
    HogWildPlusPlus,
    MyWild,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Algorithm::HogWild => "HogWild",
            Algorithm::HogWildPlusPlus => "HogWild++",
            Algorithm::MyWild => "MyWild",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Algorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HogWild" => Ok(Algorithm::HogWild),
            "HogWild++" => Ok(Algorithm::HogWildPlusPlus),
            "MyWild" => Ok(Algorithm::MyWild),
            other => Err(ConfigError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// One parsed experiment-command line (spec's 11-token grammar).
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    pub algorithm: Algorithm,
    pub repeats: usize,
    pub threads: usize,
    pub cluster_size: usize,
    pub max_epochs: usize,
    pub update_delay: usize,
    pub target_score: f64,
    pub step_size: f64,
    pub step_decay: f64,
    pub block_size: usize,
    pub permutation_file: Option<PathBuf>,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::HogWild,
            repeats: 1,
            threads: 1,
            cluster_size: 1,
            max_epochs: 100,
            update_delay: DEFAULT_UPDATE_DELAY,
            target_score: 1.0,
            step_size: DEFAULT_STEP_SIZE,
            step_decay: DEFAULT_STEP_DECAY,
            block_size: DEFAULT_BLOCK_SIZE,
            permutation_file: None,
        }
    }
}

fn parse_field<T: FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value.parse().map_err(|e| ConfigError::BadField {
        field,
        value: value.to_string(),
        source: Box::new(e),
    })
}

impl ExperimentConfig {
    /// Parse the 11 positional tokens of one experiment-command line.
    pub fn from_line(line: &str) -> Result<Self, ConfigError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != 11 {
            return Err(ConfigError::MalformedExperimentLine(line.to_string()));
        }
        let algorithm: Algorithm = tokens[0].parse()?;
        let permutation_file = if tokens[10] == "none" {
            None
        } else {
            Some(PathBuf::from(tokens[10]))
        };
        Ok(Self {
            algorithm,
            repeats: parse_field("repeats", tokens[1])?,
            threads: parse_field("threads", tokens[2])?,
            cluster_size: parse_field("cluster_size", tokens[3])?,
            max_epochs: parse_field("max_epochs", tokens[4])?,
            update_delay: parse_field("update_delay", tokens[5])?,
            target_score: parse_field("target_score", tokens[6])?,
            step_size: parse_field("step_size", tokens[7])?,
            step_decay: parse_field("step_decay", tokens[8])?,
            block_size: parse_field("block_size", tokens[9])?,
            permutation_file,
        })
    }
}

/// Mirrors the sixteen-field CSV row exactly.
#[derive(Debug, Clone)]
pub struct ExperimentResult {
    pub algorithm: Algorithm,
    pub threads: usize,
    pub cluster_size: usize,
    pub success: bool,
    pub time_s: f64,
    pub train_score: f64,
    pub validate_score: f64,
    pub test_score: f64,
    pub avg_epochs: f64,
    pub epoch_time_s: f64,
    pub step_size: f64,
    pub step_decay: f64,
    pub update_delay: usize,
    pub target_score: f64,
    pub block_size: usize,
    pub permuted: bool,
}

impl ExperimentResult {
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{}",
            self.algorithm,
            self.threads,
            self.cluster_size,
            self.success as u8,
            self.time_s,
            self.train_score,
            self.validate_score,
            self.test_score,
            self.avg_epochs,
            self.epoch_time_s,
            self.step_size,
            self.step_decay,
            self.update_delay,
            self.target_score,
            self.block_size,
            self.permuted as u8,
        )
    }

    pub const CSV_HEADER: &'static str = "algorithm,threads,cluster_size,success,time,train_score,validate_score,test_score,avg_epochs,epoch_time,step_size,step_decay,update_delay,target_score,block_size,permuted";
}

fn build_scheme(config: &ExperimentConfig, train: &ReplicatedDataset) -> Result<SharedScheme, ConfigError> {
    let node0 = train.get(0);
    match config.algorithm {
        Algorithm::HogWild => Ok(Arc::new(HogWild::new(DEFAULT_MU, node0))),
        Algorithm::HogWildPlusPlus => Ok(Arc::new(HogWildPlusPlus::new(
            DEFAULT_MU,
            node0,
            config.threads,
            config.cluster_size,
            config.update_delay,
            DEFAULT_TOLERANCE,
        )?)),
        Algorithm::MyWild => Ok(Arc::new(MyWild::new(
            DEFAULT_MU,
            node0,
            config.threads,
            config.cluster_size,
            config.update_delay,
        )?)),
    }
}

struct BlockLayout {
    total_blocks: usize,
    blocks_per_thread: usize,
    block_size: usize,
    n: usize,
}

fn layout_for(n: usize, threads: usize, block_size_hint: usize) -> BlockLayout {
    let blocks_per_thread = (n / (block_size_hint.max(1) * threads.max(1))).max(1);
    let total_blocks = blocks_per_thread * threads.max(1);
    let block_size = (n / total_blocks.max(1)).max(1);
    BlockLayout {
        total_blocks,
        blocks_per_thread,
        block_size,
        n,
    }
}

/// One run of one experiment configuration: builds the scheme, dispatches one
/// task across the pool, and reports the per-worker epoch counts plus
/// success/timing.
pub fn run_experiment(
    pool: &WorkerPool,
    topology: &Topology,
    train: &Arc<ReplicatedDataset>,
    validate: &Arc<ReplicatedDataset>,
    config: &ExperimentConfig,
) -> Result<(bool, f64, Duration, SharedScheme), ConfigError> {
    let scheme = build_scheme(config, train)?;
    let threads = pool.size();
    let clusters = scheme.cluster_count();
    let threads_per_cluster = (threads / clusters.max(1)).max(1);

    let cluster_perm = Arc::new(Permutation::cluster_permutation(clusters.max(1)));
    let layout_n = train.get(0).len();
    let layout = Arc::new(layout_for(layout_n, threads, config.block_size));
    let block_anchor = Arc::new(Permutation::block_anchors(topology.numa_node_count(), layout.total_blocks));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_observed = stop.clone();
    let metric = Arc::new(MetricSummary::new());
    let barrier: Arc<dyn CyclicBarrier> = Arc::new(Spin::new(threads.max(1)));

    let max_epochs = config.max_epochs;
    let target_score = config.target_score;
    let step_size = config.step_size;
    let step_decay = config.step_decay;

    let train = train.clone();
    let validate = validate.clone();
    let topology = Arc::new(topology.clone());

    let start = Instant::now();
    let trained_scheme = scheme.clone();

    let epoch_counts: Vec<usize> = pool.execute(move |worker_id| {
        worker_epoch_loop(
            worker_id,
            threads,
            threads_per_cluster,
            &scheme,
            &topology,
            &train,
            &validate,
            &cluster_perm,
            &block_anchor,
            &barrier,
            &stop,
            &metric,
            max_epochs,
            target_score,
            step_size,
            step_decay,
        )
    });

    let elapsed = start.elapsed();
    let success = stop_observed.load(Ordering::Relaxed);
    let avg_epochs = epoch_counts.iter().sum::<usize>() as f64 / epoch_counts.len().max(1) as f64;

    Ok((success, avg_epochs, elapsed, trained_scheme))
}

#[allow(clippy::too_many_arguments)]
fn worker_epoch_loop(
    worker_id: usize,
    threads: usize,
    threads_per_cluster: usize,
    scheme: &Arc<dyn DataScheme>,
    topology: &Arc<Topology>,
    train: &Arc<ReplicatedDataset>,
    validate: &Arc<ReplicatedDataset>,
    cluster_perm: &Arc<Permutation>,
    block_anchor: &Arc<Permutation>,
    barrier: &Arc<dyn CyclicBarrier>,
    stop: &Arc<AtomicBool>,
    metric: &Arc<MetricSummary>,
    max_epochs: usize,
    target_score: f64,
    mut step: f64,
    step_decay: f64,
) -> usize {
    let node = topology.node_of_worker(worker_id);
    let local_train = train.get(node);
    let local_validate = validate.get(node);

    let w = scheme.model_vector(worker_id);
    let args = scheme.model_args(worker_id);
    let cluster_id = scheme.cluster_of(worker_id);
    let in_cluster_id = worker_id % threads_per_cluster;

    let mut cluster_perm_node = cluster_perm.get_basic_permutation(0).clone();
    let total_blocks = block_anchor.total_blocks();
    let blocks_per_cluster = total_blocks / scheme.cluster_count().max(1);
    let blocks_per_thread = (blocks_per_cluster / threads_per_cluster.max(1)).max(1);

    let valid_n = local_validate.len();
    let valid_block = valid_n / threads.max(1);
    let valid_start = worker_id * valid_block;
    let valid_end = if worker_id + 1 == threads {
        valid_n
    } else {
        (valid_start + valid_block).min(valid_n)
    };

    let block_size = (local_train.len() / total_blocks.max(1)).max(1);
    let block_range = |block: usize| -> (usize, usize) {
        let start = (block * block_size).min(local_train.len());
        let end = if block + 1 == total_blocks {
            local_train.len()
        } else {
            ((block + 1) * block_size).min(local_train.len())
        };
        (start, end)
    };

    for epoch in 0..max_epochs {
        if stop.load(Ordering::Relaxed) {
            return epoch;
        }

        let cluster_order = cluster_perm_node.order();
        let c = cluster_order[cluster_id % cluster_order.len()] as usize;
        let start_block = c * blocks_per_cluster + in_cluster_id * blocks_per_thread;

        let mut local_order: Vec<usize> = (0..blocks_per_thread).collect();
        local_order.shuffle(&mut thread_rng());

        for &local_idx in &local_order {
            let block = (start_block + local_idx) % total_blocks.max(1);
            let (start, end) = block_range(block);
            for i in start..end {
                let point = local_train.point(i);
                model_update(w, args, &point, step);
                scheme.post_update(worker_id, step);
            }
        }
        step *= step_decay;
        cluster_perm_node = cluster_perm_node.gen_next();

        metric.reset();
        barrier.wait();
        metric.accumulate_range(w, local_validate, valid_start, valid_end);
        barrier.wait();

        if metric.to_score() >= target_score {
            stop.store(true, Ordering::Relaxed);
            return epoch + 1;
        }
    }
    max_epochs
}

/// Run `config.repeats` independent restarts of the same configuration
/// against the same pool and datasets, averaging timings/epochs across the
/// successful ones (a failed repeat still gets its own CSV row upstream, but
/// is excluded from this average — see the driver for per-row emission).
pub struct RepeatSummary {
    pub rows: Vec<ExperimentResult>,
}

#[allow(clippy::too_many_arguments)]
pub fn run_experiment_repeats(
    pool: &WorkerPool,
    topology: &Topology,
    train: &Arc<ReplicatedDataset>,
    validate: &Arc<ReplicatedDataset>,
    test: &Arc<ReplicatedDataset>,
    config: &ExperimentConfig,
    permuted: bool,
) -> Result<RepeatSummary, ConfigError> {
    let mut rows = Vec::with_capacity(config.repeats);
    for _ in 0..config.repeats {
        let (success, avg_epochs, elapsed, scheme) = run_experiment(pool, topology, train, validate, config)?;

        let w_eval = scheme.model_vector(0);
        let train_score = MetricSummary::compute(w_eval, train.get(0)).to_score();
        let validate_score = MetricSummary::compute(w_eval, validate.get(0)).to_score();
        let test_score = MetricSummary::compute(w_eval, test.get(0)).to_score();

        rows.push(ExperimentResult {
            algorithm: config.algorithm,
            threads: config.threads,
            cluster_size: config.cluster_size,
            success,
            time_s: elapsed.as_secs_f64(),
            train_score,
            validate_score,
            test_score,
            avg_epochs,
            epoch_time_s: if avg_epochs > 0.0 {
                elapsed.as_secs_f64() / avg_epochs
            } else {
                0.0
            },
            step_size: config.step_size,
            step_decay: config.step_decay,
            update_delay: config.update_delay,
            target_score: config.target_score,
            block_size: config.block_size,
            permuted,
        });
    }
    Ok(RepeatSummary { rows })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_experiment_line() {
        let line = "HogWild++ 3 4 2 100 64 1 0.5 0.8 512 none";
        let cfg = ExperimentConfig::from_line(line).unwrap();
        assert_eq!(cfg.algorithm, Algorithm::HogWildPlusPlus);
        assert_eq!(cfg.repeats, 3);
        assert_eq!(cfg.threads, 4);
        assert_eq!(cfg.cluster_size, 2);
        assert_eq!(cfg.permutation_file, None);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(ExperimentConfig::from_line("HogWild 1 1").is_err());
    }

    #[test]
    fn rejects_unknown_algorithm() {
        let line = "Foo 1 1 1 100 64 1 0.5 0.8 512 none";
        assert!(ExperimentConfig::from_line(line).is_err());
    }

    #[test]
    fn csv_row_has_sixteen_comma_separated_fields() {
        let result = ExperimentResult {
            algorithm: Algorithm::HogWild,
            threads: 1,
            cluster_size: 1,
            success: true,
            time_s: 1.0,
            train_score: 1.0,
            validate_score: 1.0,
            test_score: 1.0,
            avg_epochs: 5.0,
            epoch_time_s: 0.2,
            step_size: 0.5,
            step_decay: 0.8,
            update_delay: 64,
            target_score: 1.0,
            block_size: 512,
            permuted: false,
        };
        assert_eq!(result.to_csv_row().split(',').count(), 16);
    }

    #[test]
    fn toy_single_thread_hogwild_converges() {
        let topology = Topology::single_node(1);
        let text = "+1 1:1\n+1 1:1\n-1 2:1\n-1 2:1\n";
        let train = Arc::new(ReplicatedDataset::from_path(&topology, write_tmp(text)).unwrap());
        let validate = train.clone();
        let test = train.clone();
        let pool = WorkerPool::new(Arc::new(topology.clone()), 1);

        let config = ExperimentConfig {
            algorithm: Algorithm::HogWild,
            repeats: 1,
            threads: 1,
            cluster_size: 1,
            max_epochs: 50,
            update_delay: 1,
            target_score: 1.0,
            step_size: 0.5,
            step_decay: 1.0,
            block_size: 1,
            permutation_file: None,
        };

        let summary = run_experiment_repeats(&pool, &topology, &train, &validate, &test, &config, false).unwrap();
        assert_eq!(summary.rows.len(), 1);
        assert!(summary.rows[0].success);
        assert_eq!(summary.rows[0].train_score, 1.0);
    }

    fn write_tmp(text: &str) -> std::path::PathBuf {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), text).unwrap();
        let (_, path) = file.keep().unwrap();
        path
    }
}
