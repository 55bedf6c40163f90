// benches/optimizer_bench.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Throughput of the two-phase block-permutation optimizer over synthetic
//! datasets of increasing size.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use parasvm::dataset::LocalDataset;
use parasvm::optimizer::phase_a::PhaseAConfig;
use parasvm::optimizer::phase_b::PhaseBConfig;
use parasvm::optimizer::{optimize, OptimizerConfig};

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

fn bench_optimize(c: &mut Criterion) {
    let mut group = c.benchmark_group("permutation_optimizer");
    for &points in &[500usize, 2_000] {
        let text = synthetic_dataset(points, 64);
        let dataset = LocalDataset::from_libsvm_str(&text).unwrap();
        let config = OptimizerConfig {
            splits: 2,
            groups: 4,
            phase_a: PhaseAConfig {
                fail_tries_threshold: 50,
                max_failed_epochs: 5,
            },
            phase_b: PhaseBConfig {
                max_score_increase: 50.0,
                epochs: 2,
            },
        };
        group.bench_with_input(BenchmarkId::from_parameter(points), &points, |b, _| {
            b.iter(|| optimize(&dataset, &config).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_optimize);
criterion_main!(benches);
