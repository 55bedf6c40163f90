// src/optimizer/mod.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Offline block-permutation optimizer: splits the dataset into independent
//! chunks, runs Phase A then Phase B on each, sorts each group by affinity,
//! and concatenates the per-split permutations (each offset by its split's
//! starting position) into one permutation of `[0, N)`.
//!
//! Grounded on `analysis.cpp`'s `main` (splits/groups driver loop,
//! per-split independent optimization, concatenation with offsets).

pub mod objective;
pub mod phase_a;
pub mod phase_b;

use crate::constants::MAX_PHASE_B_GROUPS;
use crate::dataset::LocalDataset;
use crate::error::{ConfigError, DataError};
use objective::Objective;
use phase_a::PhaseAConfig;
use phase_b::PhaseBConfig;
use rand::thread_rng;
use rayon::prelude::*;
use std::fs;
use std::io::Write;
use std::path::Path;

pub struct OptimizerConfig {
    pub splits: usize,
    pub groups: usize,
    pub phase_a: PhaseAConfig,
    pub phase_b: PhaseBConfig,
}

/// Run the full two-phase optimization independently on each split and
/// return the permutation of `[0, dataset.len())` that, applied to the
/// dataset, yields the reordered layout.
///
/// Rejects `config.groups > MAX_PHASE_B_GROUPS` up front: Phase B's chain
/// search allocates tables sized `2^groups`, so an unbounded group count is a
/// memory-exhaustion/hang risk on otherwise valid input, not just a slow path.
pub fn optimize(dataset: &LocalDataset, config: &OptimizerConfig) -> Result<Vec<u32>, ConfigError> {
    if config.groups > MAX_PHASE_B_GROUPS {
        return Err(ConfigError::TooManyGroups {
            groups: config.groups,
            limit: MAX_PHASE_B_GROUPS,
        });
    }

    let n = dataset.len();
    let splits = config.splits.max(1);
    let split_size = (n / splits).max(1);

    let ranges: Vec<(usize, usize)> = (0..splits)
        .map(|s| {
            let start = s * split_size;
            let end = if s + 1 == splits { n } else { (start + split_size).min(n) };
            (start, end)
        })
        .filter(|(start, end)| end > start)
        .collect();

    let per_split: Vec<Vec<u32>> = ranges
        .par_iter()
        .map(|&(start, end)| {
            let local_order = optimize_split(dataset, start, end, config);
            local_order.into_iter().map(|i| (i + start) as u32).collect()
        })
        .collect();

    Ok(per_split.into_iter().flatten().collect())
}

fn optimize_split(dataset: &LocalDataset, start: usize, end: usize, config: &OptimizerConfig) -> Vec<usize> {
    let local = dataset.slice(start, end);
    let local_n = local.len();
    let groups = config.groups.max(1).min(local_n.max(1));
    let assignment: Vec<usize> = (0..local_n).map(|i| i * groups / local_n.max(1)).collect();

    let mut objective = Objective::new(&local, groups, assignment);

    let mut rng = thread_rng();
    phase_a::run(&mut objective, &local, &config.phase_a, &mut rng);
    phase_b::run(&mut objective, &local, &config.phase_b);

    let order: Vec<usize> = (0..local_n).collect();
    phase_b::sort_in_groups(&objective, &local, &order)
}

/// Write a permutation (one decimal index per line) to `path`.
pub fn write_permutation(path: impl AsRef<Path>, permutation: &[u32]) -> Result<(), DataError> {
    let path_ref = path.as_ref();
    let mut file = fs::File::create(path_ref).map_err(|source| DataError::Open {
        path: path_ref.display().to_string(),
        source,
    })?;
    let mut buf = String::with_capacity(permutation.len() * 7);
    for &p in permutation {
        buf.push_str(&p.to_string());
        buf.push('\n');
    }
    file.write_all(buf.as_bytes()).map_err(|source| DataError::Open {
        path: path_ref.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Read a permutation file back and validate it is a bijection of `[0, size)`.
pub fn read_permutation(path: impl AsRef<Path>, size: usize) -> Result<Vec<u32>, DataError> {
    let path_ref = path.as_ref();
    let text = fs::read_to_string(path_ref).map_err(|source| DataError::Open {
        path: path_ref.display().to_string(),
        source,
    })?;
    let values: Vec<u32> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| l.trim().parse().ok())
        .collect();
    if values.len() != size {
        return Err(DataError::PermutationSizeMismatch {
            path: path_ref.display().to_string(),
            found: values.len(),
            expected: size,
        });
    }
    let mut seen = vec![false; size];
    for &v in &values {
        if v as usize >= size || seen[v as usize] {
            return Err(DataError::NotAPermutation {
                path: path_ref.display().to_string(),
                size,
            });
        }
        seen[v as usize] = true;
    }
    Ok(values)
}

/// Invert a permutation: `inverse[permutation[i]] = i`.
pub fn invert(permutation: &[u32]) -> Vec<u32> {
    let mut inverse = vec![0u32; permutation.len()];
    for (i, &p) in permutation.iter().enumerate() {
        inverse[p as usize] = i as u32;
    }
    inverse
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimize_produces_a_permutation_of_the_whole_dataset() {
        let text = "+1 1:1 2:1\n-1 1:1 3:1\n+1 1:1 4:1\n-1 1:1 5:1\n+1 1:1 2:1\n-1 1:1 3:1\n";
        let ds = LocalDataset::from_libsvm_str(text).unwrap();
        let config = OptimizerConfig {
            splits: 2,
            groups: 2,
            phase_a: PhaseAConfig {
                fail_tries_threshold: 10,
                max_failed_epochs: 2,
            },
            phase_b: PhaseBConfig {
                max_score_increase: 50.0,
                epochs: 1,
            },
        };
        let perm = optimize(&ds, &config).unwrap();
        assert_eq!(perm.len(), ds.len());
        let mut sorted = perm.clone();
        sorted.sort();
        assert_eq!(sorted, (0..ds.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn invert_round_trips_with_identity() {
        let identity: Vec<u32> = (0..10).collect();
        assert_eq!(invert(&identity), identity);
    }

    #[test]
    fn rejects_group_counts_above_the_chain_search_limit() {
        let ds = LocalDataset::from_libsvm_str("+1 1:1\n-1 2:1\n").unwrap();
        let config = OptimizerConfig {
            splits: 1,
            groups: MAX_PHASE_B_GROUPS + 1,
            phase_a: PhaseAConfig::default(),
            phase_b: PhaseBConfig::default(),
        };
        assert!(optimize(&ds, &config).is_err());
    }

    #[test]
    fn write_then_read_permutation_round_trips() {
        let perm: Vec<u32> = vec![2, 0, 1, 3];
        let tmp = tempfile::NamedTempFile::new().unwrap();
        write_permutation(tmp.path(), &perm).unwrap();
        let read_back = read_permutation(tmp.path(), perm.len()).unwrap();
        assert_eq!(read_back, perm);
    }
}
