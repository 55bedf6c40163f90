// src/dataset.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sparse dataset loading, in-memory layout, and NUMA replication.
//!
//! `LocalDataset` stores points in a flat CSR-like arena (one big indices
//! buffer, one big values buffer, and an offset table) rather than literal
//! packed bytes with raw pointer casts — the same "contiguous buffer plus
//! pointer table" locality the reference implementation gets from its packed
//! byte buffer, expressed without unsafe reinterpretation of memory.

use crate::error::DataError;
use crate::topology::Topology;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// A borrowed view of one sparse training example.
#[derive(Debug, Clone, Copy)]
pub struct DataPoint<'a> {
    pub label: f64,
    pub indices: &'a [u32],
    pub values: &'a [f64],
}

/// One NUMA-local copy of the full dataset.
#[derive(Debug)]
pub struct LocalDataset {
    labels: Vec<f64>,
    indices_arena: Vec<u32>,
    values_arena: Vec<f64>,
    /// `offsets[i]..offsets[i+1]` is point `i`'s range into the two arenas.
    offsets: Vec<u32>,
    features: usize,
}

impl LocalDataset {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn features(&self) -> usize {
        self.features
    }

    #[inline]
    pub fn point(&self, i: usize) -> DataPoint<'_> {
        let start = self.offsets[i] as usize;
        let end = self.offsets[i + 1] as usize;
        DataPoint {
            label: self.labels[i],
            indices: &self.indices_arena[start..end],
            values: &self.values_arena[start..end],
        }
    }

    /// Parse a libsvm-style dataset from an in-memory string, shuffling the
    /// point order once (matching the reference loader's shuffle-at-load).
    pub fn from_libsvm_str(text: &str) -> Result<Self, DataError> {
        let mut rows: Vec<(f64, Vec<u32>, Vec<f64>)> = Vec::new();
        let mut features = 0usize;

        for (line_no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let label_tok = match tokens.next() {
                Some(t) => t,
                None => continue,
            };
            let raw_label: f64 = match label_tok.parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(line = line_no + 1, "unparsable label, skipping line");
                    continue;
                }
            };
            let label = if raw_label == 1.0 { 1.0 } else { -1.0 };

            let mut indices = Vec::new();
            let mut values = Vec::new();
            let mut last_index: i64 = -1;
            for tok in tokens {
                let (idx_str, val_str) = match tok.split_once(':') {
                    Some(pair) => pair,
                    None => {
                        tracing::warn!(line = line_no + 1, token = tok, "malformed feature token, skipping");
                        continue;
                    }
                };
                let one_based: i64 = match idx_str.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        tracing::warn!(line = line_no + 1, token = tok, "non-numeric feature index, skipping");
                        continue;
                    }
                };
                let value: f64 = match val_str.parse() {
                    Ok(v) => v,
                    Err(_) => {
                        tracing::warn!(line = line_no + 1, token = tok, "non-numeric feature value, skipping");
                        continue;
                    }
                };
                if value == 0.0 {
                    tracing::warn!(line = line_no + 1, token = tok, "zero-valued feature, skipping");
                    continue;
                }
                let zero_based = one_based - 1;
                if zero_based <= last_index {
                    tracing::warn!(
                        line = line_no + 1,
                        token = tok,
                        "feature index not strictly ascending, skipping"
                    );
                    continue;
                }
                last_index = zero_based;
                let idx = zero_based as u32;
                features = features.max(idx as usize + 1);
                indices.push(idx);
                values.push(value);
            }
            rows.push((label, indices, values));
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(rand::random());
        rows.shuffle(&mut rng);

        Self::from_rows(rows, features)
    }

    pub fn from_libsvm_path(path: impl AsRef<Path>) -> Result<Self, DataError> {
        let path_ref = path.as_ref();
        let text = fs::read_to_string(path_ref).map_err(|source| DataError::Open {
            path: path_ref.display().to_string(),
            source,
        })?;
        Self::from_libsvm_str(&text)
    }

    fn from_rows(rows: Vec<(f64, Vec<u32>, Vec<f64>)>, features: usize) -> Result<Self, DataError> {
        let mut labels = Vec::with_capacity(rows.len());
        let mut indices_arena = Vec::new();
        let mut values_arena = Vec::new();
        let mut offsets = Vec::with_capacity(rows.len() + 1);
        offsets.push(0u32);
        for (label, indices, values) in rows {
            labels.push(label);
            indices_arena.extend_from_slice(&indices);
            values_arena.extend_from_slice(&values);
            offsets.push(indices_arena.len() as u32);
        }
        Ok(Self {
            labels,
            indices_arena,
            values_arena,
            offsets,
            features,
        })
    }

    /// Rebuild a dataset from `other` reordered by `inverse_permutation`:
    /// the i-th point of the result is `other[inverse_permutation[i]]`.
    pub fn reordered(other: &LocalDataset, inverse_permutation: &[u32]) -> Result<Self, DataError> {
        if inverse_permutation.len() != other.len() {
            return Err(DataError::PermutationSizeMismatch {
                path: "<in-memory>".to_string(),
                found: inverse_permutation.len(),
                expected: other.len(),
            });
        }
        let rows: Vec<(f64, Vec<u32>, Vec<f64>)> = inverse_permutation
            .iter()
            .map(|&src| {
                let p = other.point(src as usize);
                (p.label, p.indices.to_vec(), p.values.to_vec())
            })
            .collect();
        Self::from_rows(rows, other.features)
    }

    /// Extract `[start, end)` as a standalone dataset, preserving point order.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let rows: Vec<(f64, Vec<u32>, Vec<f64>)> = (start..end)
            .map(|i| {
                let p = self.point(i);
                (p.label, p.indices.to_vec(), p.values.to_vec())
            })
            .collect();
        Self::from_rows(rows, self.features).expect("slicing an in-memory dataset cannot fail")
    }

    /// Deep-clone this dataset's bytes; used to build per-NUMA-node replicas.
    fn deep_clone(&self) -> Self {
        Self {
            labels: self.labels.clone(),
            indices_arena: self.indices_arena.clone(),
            values_arena: self.values_arena.clone(),
            offsets: self.offsets.clone(),
            features: self.features,
        }
    }
}

/// One `LocalDataset` replicated across every detected NUMA node.
pub struct ReplicatedDataset {
    replicas: Vec<Arc<LocalDataset>>,
}

impl ReplicatedDataset {
    pub fn from_path(topology: &Topology, path: impl AsRef<Path>) -> Result<Self, DataError> {
        let base = LocalDataset::from_libsvm_path(path)?;
        Ok(Self::replicate(topology, base))
    }

    /// Build the first replica from `other` reordered by `inverse_permutation`
    /// and copy it to the remaining nodes (used to apply the offline
    /// optimizer's permutation before training).
    pub fn reordered(
        topology: &Topology,
        other: &ReplicatedDataset,
        inverse_permutation: &[u32],
    ) -> Result<Self, DataError> {
        let base = LocalDataset::reordered(other.get(0), inverse_permutation)?;
        Ok(Self::replicate(topology, base))
    }

    fn replicate(topology: &Topology, base: LocalDataset) -> Self {
        let nodes = topology.numa_node_count().max(1);
        tracing::info!(nodes, points = base.len(), "replicating dataset across NUMA nodes");
        let base = Arc::new(base);
        let replicas: Vec<Arc<LocalDataset>> = (0..nodes)
            .map(|node| {
                if node == 0 {
                    base.clone()
                } else {
                    // First-touch: clone the bytes on a thread pinned to the
                    // target node so its pages are faulted in locally.
                    let source = base.clone();
                    let topology = topology.clone();
                    std::thread::Builder::new()
                        .name(format!("dataset-replica-{node}"))
                        .spawn(move || {
                            let anchor_worker = topology
                                .cores_for_node(node)
                                .first()
                                .copied()
                                .unwrap_or(0);
                            topology.pin_current_thread(anchor_worker);
                            Arc::new(source.deep_clone())
                        })
                        .expect("failed to spawn dataset replication thread")
                        .join()
                        .expect("dataset replication thread panicked")
                }
            })
            .collect();
        Self { replicas }
    }

    pub fn get(&self, node: usize) -> &LocalDataset {
        &self.replicas[node % self.replicas.len()]
    }

    pub fn len(&self) -> usize {
        self.get(0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.get(0).is_empty()
    }

    pub fn features(&self) -> usize {
        self.get(0).features()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_libsvm_text_and_converts_to_zero_based_ascending_indices() {
        let text = "+1 1:1.0 3:2.0\n-1 2:5.0\n";
        let ds = LocalDataset::from_libsvm_str(text).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.features(), 3);
        let labels: Vec<f64> = (0..ds.len()).map(|i| ds.point(i).label).collect();
        assert!(labels.contains(&1.0));
        assert!(labels.contains(&-1.0));
    }

    #[test]
    fn non_one_label_maps_to_negative_one() {
        let text = "2 1:1.0\n";
        let ds = LocalDataset::from_libsvm_str(text).unwrap();
        assert_eq!(ds.point(0).label, -1.0);
    }

    #[test]
    fn skips_non_ascending_or_zero_valued_features() {
        let text = "+1 2:1.0 1:1.0 3:0.0 4:2.0\n";
        let ds = LocalDataset::from_libsvm_str(text).unwrap();
        let p = ds.point(0);
        assert_eq!(p.indices, &[1, 3]); // 0-based: feature 2 and feature 4
        assert_eq!(p.values, &[1.0, 2.0]);
    }

    #[test]
    fn reordered_is_identity_under_identity_permutation() {
        let text = "+1 1:1.0\n-1 2:1.0\n+1 1:1.0 2:1.0\n";
        let original = LocalDataset::from_libsvm_str(text).unwrap();
        let identity: Vec<u32> = (0..original.len() as u32).collect();
        let reordered = LocalDataset::reordered(&original, &identity).unwrap();
        for i in 0..original.len() {
            let a = original.point(i);
            let b = reordered.point(i);
            assert_eq!(a.label, b.label);
            assert_eq!(a.indices, b.indices);
            assert_eq!(a.values, b.values);
        }
    }

    #[test]
    fn replicated_dataset_nodes_agree_with_node_zero() {
        let topology = Topology::single_node(2);
        let text = "+1 1:1.0\n-1 2:1.0\n";
        let tmp = tempfile::NamedTempFile::new().unwrap();
        fs::write(tmp.path(), text).unwrap();
        let replicated = ReplicatedDataset::from_path(&topology, tmp.path()).unwrap();
        for node in 0..topology.numa_node_count() {
            for i in 0..replicated.len() {
                assert_eq!(replicated.get(node).point(i).label, replicated.get(0).point(i).label);
            }
        }
    }
}
