// src/perm.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lock-free block-permutation source.
//!
//! A `PermNode` holds one shuffled permutation of `[0, size)` and an atomic,
//! append-only link to the next node. `gen_next()` lets any number of workers
//! race to extend the chain by exactly one node; all but the winner simply
//! observe the winner's node. This gives every worker a shared, lock-free
//! view of "the permutation for epoch e" without ever blocking.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

fn fresh_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let counter = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    nanos ^ counter.wrapping_mul(0x9E3779B97F4A7C15)
}

/// One node of the lock-free permutation chain.
pub struct PermNode {
    size: usize,
    order: Vec<u32>,
    next: AtomicPtr<PermNode>,
}

impl PermNode {
    /// Build a freshly shuffled node of `size` elements.
    pub fn new(size: usize) -> Arc<Self> {
        let mut order: Vec<u32> = (0..size as u32).collect();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(fresh_seed());
        order.shuffle(&mut rng);
        Arc::new(Self {
            size,
            order,
            next: AtomicPtr::new(std::ptr::null_mut()),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Read this node's permutation.
    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// Return the next node in the chain, lazily creating and CAS-installing
    /// it if it does not exist yet. Concurrent callers racing to extend the
    /// same node converge on a single winner's node.
    pub fn gen_next(self: &Arc<Self>) -> Arc<PermNode> {
        if let Some(existing) = self.load_next() {
            return existing;
        }

        let candidate = PermNode::new(self.size);
        // Leak one strong reference into the raw pointer installed via CAS;
        // `load_next` reconstructs an `Arc` from the raw pointer on every
        // read, so the chain holds exactly one owning reference per node
        // and `Drop` below reclaims it.
        let candidate_ptr = Arc::into_raw(candidate.clone()) as *mut PermNode;

        match self.next.compare_exchange(
            std::ptr::null_mut(),
            candidate_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => candidate,
            Err(_) => {
                // Lost the race: drop our unused allocation and follow the winner.
                unsafe { drop(Arc::from_raw(candidate_ptr as *const PermNode)) };
                self.load_next().expect("next was just installed by a racer")
            }
        }
    }

    fn load_next(&self) -> Option<Arc<PermNode>> {
        let ptr = self.next.load(Ordering::Acquire);
        if ptr.is_null() {
            return None;
        }
        // Bump the refcount: the chain itself keeps one permanent reference,
        // readers get a cloned temporary one.
        let borrowed = unsafe { Arc::from_raw(ptr) };
        let cloned = borrowed.clone();
        std::mem::forget(borrowed);
        Some(cloned)
    }
}

impl Drop for PermNode {
    fn drop(&mut self) {
        let ptr = *self.next.get_mut();
        if !ptr.is_null() {
            unsafe { drop(Arc::from_raw(ptr)) };
        }
    }
}

/// Owns one or more anchor `PermNode`s. Used both for the cluster-level
/// permutation (one anchor, size = cluster count) and for per-NUMA-node
/// block-iteration-order anchors (one anchor per node, size = total blocks).
pub struct Permutation {
    roots: Vec<Arc<PermNode>>,
    total_blocks: usize,
}

impl Permutation {
    /// A single anchor of size `clusters`, used for cluster-order shuffling.
    pub fn cluster_permutation(clusters: usize) -> Self {
        Self {
            roots: vec![PermNode::new(clusters)],
            total_blocks: clusters,
        }
    }

    /// One anchor per NUMA node, each of size `total_blocks`.
    pub fn block_anchors(nodes: usize, total_blocks: usize) -> Self {
        let roots = (0..nodes).map(|_| PermNode::new(total_blocks)).collect();
        Self { roots, total_blocks }
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    pub fn get_basic_permutation(&self, node: usize) -> &Arc<PermNode> {
        &self.roots[node % self.roots.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn is_permutation(order: &[u32], n: usize) -> bool {
        let set: HashSet<_> = order.iter().copied().collect();
        set.len() == n && order.iter().all(|&v| (v as usize) < n)
    }

    #[test]
    fn node_is_a_bijection() {
        let node = PermNode::new(64);
        assert!(is_permutation(node.order(), 64));
    }

    #[test]
    fn chain_extends_lazily_and_stays_a_bijection() {
        let root = PermNode::new(32);
        let a = root.gen_next();
        let b = root.gen_next();
        // Second call observes the same installed node.
        assert!(std::ptr::eq(a.as_ref(), b.as_ref()));
        assert!(is_permutation(a.order(), 32));

        let c = a.gen_next();
        assert!(is_permutation(c.order(), 32));
        assert!(!std::ptr::eq(a.as_ref(), c.as_ref()));
    }

    #[test]
    fn concurrent_gen_next_converges_on_one_winner() {
        use std::thread;
        let root = PermNode::new(16);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let root = root.clone();
                thread::spawn(move || root.gen_next())
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for r in &results[1..] {
            assert!(std::ptr::eq(r.as_ref(), results[0].as_ref()));
        }
    }

    #[test]
    fn cluster_permutation_anchor_matches_size() {
        let perm = Permutation::cluster_permutation(4);
        assert_eq!(perm.total_blocks(), 4);
        assert_eq!(perm.get_basic_permutation(0).size(), 4);
    }

    #[test]
    fn block_anchors_one_per_node() {
        let perm = Permutation::block_anchors(2, 128);
        assert_eq!(perm.get_basic_permutation(0).size(), 128);
        assert_eq!(perm.get_basic_permutation(1).size(), 128);
    }
}
