// src/model.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sparse dot-product/scale-and-add kernels, the hinge-loss SVM update rule,
//! per-feature degree counting, and the F1 validation metric.

use crate::dataset::{DataPoint, LocalDataset};
use rayon::prelude::*;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Dense weight vector, shared (racily, by design) across worker threads.
///
/// Writes inside the SGD hot loop go through `UnsafeCell` rather than atomics:
/// correctness here is statistical (HogWild-style), not linearizable, and the
/// reference implementation relies on the same plain-store race. Readers that
/// need a consistent snapshot (validation, ring sync) still only ever read
/// `f64`s that are written with ordinary aligned stores, so no torn reads are
/// possible on any platform this crate targets.
pub struct ModelVector {
    weights: Vec<UnsafeCell<f64>>,
}

unsafe impl Sync for ModelVector {}

impl ModelVector {
    pub fn zeros(features: usize) -> Self {
        Self {
            weights: (0..features).map(|_| UnsafeCell::new(0.0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    #[inline]
    pub fn get(&self, i: usize) -> f64 {
        unsafe { *self.weights[i].get() }
    }

    #[inline]
    pub fn set(&self, i: usize, v: f64) {
        unsafe { *self.weights[i].get() = v };
    }

    #[inline]
    pub fn add(&self, i: usize, delta: f64) {
        unsafe {
            let cell = self.weights[i].get();
            *cell += delta;
        }
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.weights.iter().map(|c| unsafe { *c.get() }).collect()
    }

    /// Copy another vector's values in (used to seed `W_old` snapshots).
    pub fn copy_from(&self, other: &ModelVector) {
        for i in 0..self.weights.len() {
            self.set(i, other.get(i));
        }
    }
}

/// SVM hyperparameters plus the per-feature degree table used to scale L2
/// shrinkage.
pub struct ModelArgs {
    pub mu: f64,
    degrees: Vec<u32>,
}

impl ModelArgs {
    pub fn new(mu: f64, dataset: &LocalDataset) -> Self {
        Self {
            mu,
            degrees: calc_degrees(dataset),
        }
    }

    #[inline]
    pub fn degree(&self, feature: usize) -> u32 {
        self.degrees[feature]
    }
}

/// Count, per feature, how many points in `dataset` reference it. Uses rayon
/// since this is a one-shot embarrassingly parallel pass over the whole
/// dataset at scheme-construction time.
fn calc_degrees(dataset: &LocalDataset) -> Vec<u32> {
    let features = dataset.features();
    let counters: Vec<AtomicU64> = (0..features).map(|_| AtomicU64::new(0)).collect();
    (0..dataset.len()).into_par_iter().for_each(|i| {
        let point = dataset.point(i);
        for &idx in point.indices {
            counters[idx as usize].fetch_add(1, Ordering::Relaxed);
        }
    });
    counters
        .into_iter()
        .map(|c| c.into_inner() as u32)
        .collect()
}

/// `w . x`, restricted to `x`'s non-zero coordinates.
#[inline]
pub fn dot(w: &ModelVector, point: &DataPoint<'_>) -> f64 {
    let mut acc = 0.0;
    for (&idx, &val) in point.indices.iter().zip(point.values) {
        acc += w.get(idx as usize) * val;
    }
    acc
}

/// `w[idx] += scale * x[idx]` for `x`'s non-zero coordinates.
#[inline]
pub fn scale_and_add(w: &ModelVector, point: &DataPoint<'_>, scale: f64) {
    for (&idx, &val) in point.indices.iter().zip(point.values) {
        w.add(idx as usize, scale * val);
    }
}

/// One hinge-loss SGD step against a single point.
///
/// `wxy = (w . x) * y`; if `wxy < 1` nudge `w` towards `x`'s label, then
/// shrink every touched coordinate by `step * mu / degree` (per-feature L2).
pub fn model_update(w: &ModelVector, args: &ModelArgs, point: &DataPoint<'_>, step: f64) {
    let wxy = dot(w, point) * point.label;
    if wxy < 1.0 {
        scale_and_add(w, point, step * point.label);
    }
    for &idx in point.indices {
        let idx = idx as usize;
        let degree = args.degree(idx).max(1) as f64;
        let shrink = 1.0 - step * args.mu / degree;
        w.set(idx, w.get(idx) * shrink);
    }
}

/// `true` if the prediction for `x` matches its sign convention.
#[inline]
fn classify(w: &ModelVector, point: &DataPoint<'_>) -> bool {
    dot(w, point) * point.label > 0.0
}

/// Atomic tp/tn/fp/fn confusion-matrix accumulator, safe to add into from
/// many workers concurrently between two barrier waits.
#[derive(Default)]
pub struct MetricSummary {
    tp: AtomicU64,
    tn: AtomicU64,
    fp: AtomicU64,
    fn_: AtomicU64,
}

impl MetricSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.tp.store(0, Ordering::Relaxed);
        self.tn.store(0, Ordering::Relaxed);
        self.fp.store(0, Ordering::Relaxed);
        self.fn_.store(0, Ordering::Relaxed);
    }

    /// Classify every point in `dataset[start..end)` against `w` and fold the
    /// result into this summary.
    pub fn accumulate_range(&self, w: &ModelVector, dataset: &LocalDataset, start: usize, end: usize) {
        let mut tp = 0u64;
        let mut tn = 0u64;
        let mut fp = 0u64;
        let mut fn_ = 0u64;
        for i in start..end {
            let point = dataset.point(i);
            let positive = point.label > 0.0;
            let correct = classify(w, &point);
            match (positive, correct) {
                (true, true) => tp += 1,
                (true, false) => fn_ += 1,
                (false, true) => tn += 1,
                (false, false) => fp += 1,
            }
        }
        self.tp.fetch_add(tp, Ordering::Relaxed);
        self.tn.fetch_add(tn, Ordering::Relaxed);
        self.fp.fetch_add(fp, Ordering::Relaxed);
        self.fn_.fetch_add(fn_, Ordering::Relaxed);
    }

    /// Single-threaded convenience wrapper for the whole dataset.
    pub fn compute(w: &ModelVector, dataset: &LocalDataset) -> Self {
        let summary = Self::new();
        summary.accumulate_range(w, dataset, 0, dataset.len());
        summary
    }

    pub fn total(&self) -> u64 {
        self.tp.load(Ordering::Relaxed)
            + self.tn.load(Ordering::Relaxed)
            + self.fp.load(Ordering::Relaxed)
            + self.fn_.load(Ordering::Relaxed)
    }

    /// F1 score. Returns `0.0` when precision or recall is undefined
    /// (matches the reference behavior of treating an empty denominator as
    /// zero score rather than propagating NaN).
    pub fn to_score(&self) -> f64 {
        let tp = self.tp.load(Ordering::Relaxed) as f64;
        let fp = self.fp.load(Ordering::Relaxed) as f64;
        let fn_ = self.fn_.load(Ordering::Relaxed) as f64;
        let precision_denom = tp + fp;
        let recall_denom = tp + fn_;
        if precision_denom == 0.0 || recall_denom == 0.0 {
            return 0.0;
        }
        let precision = tp / precision_denom;
        let recall = tp / recall_denom;
        if precision + recall == 0.0 {
            return 0.0;
        }
        2.0 * precision * recall / (precision + recall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::LocalDataset;

    fn toy_dataset() -> LocalDataset {
        // Linearly separable: feature 0 -> positive, feature 1 -> negative.
        let text = "+1 1:1\n+1 1:1\n-1 2:1\n-1 2:1\n";
        LocalDataset::from_libsvm_str(text).unwrap()
    }

    #[test]
    fn model_update_drives_separable_data_to_perfect_f1() {
        let dataset = toy_dataset();
        let args = ModelArgs::new(1.0, &dataset);
        let w = ModelVector::zeros(dataset.features());
        let mut step = 0.5;
        for _ in 0..50 {
            for i in 0..dataset.len() {
                let point = dataset.point(i);
                model_update(&w, &args, &point, step);
            }
            step *= 1.0; // no decay needed for this toy case
        }
        let summary = MetricSummary::compute(&w, &dataset);
        assert_eq!(summary.to_score(), 1.0);
    }

    #[test]
    fn f1_is_zero_on_empty_summary() {
        let summary = MetricSummary::new();
        assert_eq!(summary.to_score(), 0.0);
    }
}
