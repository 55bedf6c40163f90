// src/optimizer/objective.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cross-group feature-overlap objective and its incremental
//! maintenance. Grounded on `analysis.cpp`'s `get_score`/`move_element`
//! (`group_count[group][feature]` bookkeeping), but with the incremental
//! update folded directly into `move_point` rather than the original's
//! deferred `apply_swaps` queue (see DESIGN.md open question #1).

use crate::dataset::LocalDataset;

/// Tracks, for every `(group, feature)` pair, how many points in that group
/// reference that feature, plus the running objective value.
pub struct Objective {
    groups: usize,
    features: usize,
    /// `count[group * features + feature]`
    count: Vec<u32>,
    /// which group each point currently belongs to
    assignment: Vec<usize>,
    value: f64,
}

impl Objective {
    /// Build from an initial grouping (`assignment[i]` = group of point i,
    /// all entries in `[0, groups)`).
    pub fn new(dataset: &LocalDataset, groups: usize, assignment: Vec<usize>) -> Self {
        let features = dataset.features();
        let mut count = vec![0u32; groups * features];
        for (i, &g) in assignment.iter().enumerate() {
            let point = dataset.point(i);
            for &idx in point.indices {
                count[g * features + idx as usize] += 1;
            }
        }
        let mut obj = Self {
            groups,
            features,
            count,
            assignment,
            value: 0.0,
        };
        obj.value = obj.recompute_from_scratch();
        obj
    }

    #[inline]
    fn count_at(&self, group: usize, feature: usize) -> u32 {
        self.count[group * self.features + feature]
    }

    #[inline]
    fn count_at_mut(&mut self, group: usize, feature: usize) -> &mut u32 {
        &mut self.count[group * self.features + feature]
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn group_of(&self, point: usize) -> usize {
        self.assignment[point]
    }

    /// Full from-scratch recomputation, used only to cross-check the
    /// incrementally maintained value in tests.
    pub fn recompute_from_scratch(&self) -> f64 {
        let mut total = 0.0;
        for f in 0..self.features {
            for g1 in 0..self.groups {
                let c1 = self.count_at(g1, f);
                if c1 == 0 {
                    continue;
                }
                for g2 in (g1 + 1)..self.groups {
                    let c2 = self.count_at(g2, f);
                    total += c1.min(c2) as f64;
                }
            }
        }
        total
    }

    /// Objective contribution of a single feature across all group pairs.
    fn feature_contribution(&self, feature: usize) -> f64 {
        let mut total = 0.0;
        for g1 in 0..self.groups {
            let c1 = self.count_at(g1, feature);
            if c1 == 0 {
                continue;
            }
            for g2 in (g1 + 1)..self.groups {
                total += c1.min(self.count_at(g2, feature)) as f64;
            }
        }
        total
    }

    /// What the objective would become if `point` moved from its current
    /// group to `to`, without committing the move.
    pub fn delta_if_moved(&self, dataset: &LocalDataset, point: usize, to: usize) -> f64 {
        let from = self.assignment[point];
        if from == to {
            return 0.0;
        }
        let p = dataset.point(point);
        let mut delta = 0.0;
        for &idx in p.indices {
            let feature = idx as usize;
            let before = self.feature_contribution(feature);
            // simulate
            let from_count = self.count_at(from, feature);
            let to_count = self.count_at(to, feature);
            let after = self.feature_contribution_simulated(feature, from, from_count - 1, to, to_count + 1);
            delta += after - before;
        }
        delta
    }

    fn feature_contribution_simulated(
        &self,
        feature: usize,
        changed_a: usize,
        value_a: u32,
        changed_b: usize,
        value_b: u32,
    ) -> f64 {
        let mut total = 0.0;
        for g1 in 0..self.groups {
            let c1 = self.simulated_count(feature, g1, changed_a, value_a, changed_b, value_b);
            if c1 == 0 {
                continue;
            }
            for g2 in (g1 + 1)..self.groups {
                let c2 = self.simulated_count(feature, g2, changed_a, value_a, changed_b, value_b);
                total += c1.min(c2) as f64;
            }
        }
        total
    }

    #[inline]
    fn simulated_count(
        &self,
        feature: usize,
        group: usize,
        changed_a: usize,
        value_a: u32,
        changed_b: usize,
        value_b: u32,
    ) -> u32 {
        if group == changed_a {
            value_a
        } else if group == changed_b {
            value_b
        } else {
            self.count_at(group, feature)
        }
    }

    /// Commit a move of `point` into group `to`, updating both the per
    /// `(group, feature)` counts and the running objective value.
    pub fn move_point(&mut self, dataset: &LocalDataset, point: usize, to: usize) {
        let from = self.assignment[point];
        if from == to {
            return;
        }
        let p = dataset.point(point);
        for &idx in p.indices {
            let feature = idx as usize;
            let before = self.feature_contribution(feature);
            *self.count_at_mut(from, feature) -= 1;
            *self.count_at_mut(to, feature) += 1;
            let after = self.feature_contribution(feature);
            self.value += after - before;
        }
        self.assignment[point] = to;
    }

    pub fn groups(&self) -> usize {
        self.groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_dataset() -> LocalDataset {
        // feature 0 present in every point: moving points changes overlap.
        LocalDataset::from_libsvm_str(
            "+1 1:1 2:1\n+1 1:1 3:1\n-1 1:1 4:1\n-1 1:1 5:1\n",
        )
        .unwrap()
    }

    #[test]
    fn incremental_objective_matches_recompute_from_scratch() {
        let ds = toy_dataset();
        let mut obj = Objective::new(&ds, 2, vec![0, 0, 1, 1]);
        assert!((obj.value() - obj.recompute_from_scratch()).abs() < 1e-9);

        obj.move_point(&ds, 0, 1);
        assert!((obj.value() - obj.recompute_from_scratch()).abs() < 1e-9);

        obj.move_point(&ds, 2, 0);
        assert!((obj.value() - obj.recompute_from_scratch()).abs() < 1e-9);
    }

    #[test]
    fn delta_if_moved_predicts_the_committed_change() {
        let ds = toy_dataset();
        let mut obj = Objective::new(&ds, 2, vec![0, 0, 1, 1]);
        let before = obj.value();
        let predicted = obj.delta_if_moved(&ds, 0, 1);
        obj.move_point(&ds, 0, 1);
        assert!((obj.value() - (before + predicted)).abs() < 1e-9);
    }
}
