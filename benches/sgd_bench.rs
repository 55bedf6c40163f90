// benches/sgd_bench.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throughput of one SGD epoch pass over a synthetic sparse dataset, across
//! thread counts, mirroring the structure of the teacher's own hand-rolled
//! throughput sweep (`streaming_throughput.rs`) but driven through criterion.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use parasvm::dataset::{LocalDataset, ReplicatedDataset};
use parasvm::sgd::{run_experiment_repeats, Algorithm, ExperimentConfig};
use parasvm::topology::Topology;
use parasvm::WorkerPool;
use std::sync::Arc;

fn synthetic_dataset(points: usize, features: usize) -> String {
    let mut text = String::with_capacity(points * 16);
    for i in 0..points {
        let label = if i % 2 == 0 { "+1" } else { "-1" };
        let f1 = 1 + (i % features);
        let f2 = 1 + ((i + 1) % features).max(f1);
        text.push_str(&format!("{label} {f1}:1.0 {f2}:0.5\n"));
    }
    text
}

fn bench_epoch_throughput(c: &mut Criterion) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(tmp.path(), synthetic_dataset(20_000, 256)).unwrap();
    let _ = LocalDataset::from_libsvm_path(tmp.path()).unwrap();

    let mut group = c.benchmark_group("sgd_epoch_throughput");
    for &threads in &[1usize, 2, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let topology = Topology::single_node(threads);
            let train = Arc::new(ReplicatedDataset::from_path(&topology, tmp.path()).unwrap());
            let validate = train.clone();
            let test = train.clone();
            let pool = WorkerPool::new(Arc::new(topology.clone()), threads);
            let config = ExperimentConfig {
                algorithm: Algorithm::HogWild,
                repeats: 1,
                threads,
                cluster_size: 1,
                max_epochs: 3,
                update_delay: 64,
                target_score: 2.0, // unreachable, so all 3 epochs always run
                step_size: 0.1,
                step_decay: 0.9,
                block_size: 256,
                permutation_file: None,
            };
            b.iter(|| run_experiment_repeats(&pool, &topology, &train, &validate, &test, &config, false).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_epoch_throughput);
criterion_main!(benches);
