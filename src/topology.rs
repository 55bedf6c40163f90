// src/topology.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! NUMA topology discovery, worker-id-to-core mapping, and thread pinning.
//!
//! Worker ids are dense `[0, T)`. The mapping assigns contiguous runs of worker
//! ids to a NUMA node's physical cores before spilling onto the next node, so
//! that a cluster of consecutive workers (see `scheme`) shares a node whenever
//! `cluster_size` does not exceed that node's core count.

use anyhow::Result;

#[cfg(feature = "numa")]
use hwlocality::{object::types::ObjectType, Topology as HwTopology};

/// A single NUMA node's physical cores.
#[derive(Debug, Clone)]
pub struct NumaNode {
    pub node_id: usize,
    pub cores: Vec<usize>,
}

/// System NUMA topology plus the worker->core assignment derived from it.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NumaNode>,
    /// `worker_cores[worker_id] = (node_id, core_id)`
    worker_cores: Vec<(usize, usize)>,
}

impl Topology {
    /// Detect the system's NUMA layout and build a worker assignment for
    /// `workers` logical worker ids.
    pub fn detect(workers: usize) -> Result<Self> {
        let nodes = detect_nodes()?;
        tracing::info!(num_nodes = nodes.len(), "detected NUMA topology");
        let worker_cores = assign_workers(&nodes, workers);
        Ok(Self {
            nodes,
            worker_cores,
        })
    }

    /// Build a topology over a single flat node with `workers` cores — used in
    /// tests and on machines where NUMA detection is unavailable.
    pub fn single_node(workers: usize) -> Self {
        let cores: Vec<usize> = (0..workers.max(1)).collect();
        let nodes = vec![NumaNode {
            node_id: 0,
            cores: cores.clone(),
        }];
        let worker_cores = (0..workers).map(|w| (0, cores[w % cores.len()])).collect();
        Self {
            nodes,
            worker_cores,
        }
    }

    pub fn numa_node_count(&self) -> usize {
        self.nodes.len()
    }

    /// NUMA node a given worker's memory should be allocated on / pinned to.
    pub fn node_of_worker(&self, worker_id: usize) -> usize {
        self.worker_cores[worker_id % self.worker_cores.len()].0
    }

    /// Pin the calling OS thread to the physical core assigned to `worker_id`.
    /// A no-op (logged at debug) when the `thread-pinning` feature is disabled.
    pub fn pin_current_thread(&self, worker_id: usize) {
        let (_node, core) = self.worker_cores[worker_id % self.worker_cores.len()];
        pin_to_core(core, worker_id);
    }

    pub fn cores_for_node(&self, node_id: usize) -> &[usize] {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .map(|n| n.cores.as_slice())
            .unwrap_or(&[])
    }
}

#[cfg(feature = "thread-pinning")]
fn pin_to_core(core: usize, worker_id: usize) {
    let ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(id) = ids.get(core).copied() {
        if !core_affinity::set_for_current(id) {
            tracing::warn!(worker_id, core, "failed to pin worker thread to core");
        }
    } else {
        tracing::warn!(worker_id, core, "core id out of range, thread not pinned");
    }
}

#[cfg(not(feature = "thread-pinning"))]
fn pin_to_core(core: usize, worker_id: usize) {
    tracing::debug!(worker_id, core, "thread pinning disabled, no-op");
}

#[cfg(feature = "numa")]
fn detect_nodes() -> Result<Vec<NumaNode>> {
    let topology = HwTopology::new()?;
    let numa_nodes: Vec<_> = topology.objects_with_type(ObjectType::NUMANode).collect();
    let pu_count = topology.objects_with_type(ObjectType::PU).count();

    if numa_nodes.is_empty() {
        tracing::debug!("no NUMA nodes reported, treating machine as single node");
        return Ok(vec![NumaNode {
            node_id: 0,
            cores: (0..num_cpus::get_physical().max(1)).collect(),
        }]);
    }

    let mut nodes: Vec<NumaNode> = numa_nodes
        .iter()
        .filter_map(|node| {
            let node_id = node.os_index()?;
            let cpuset = node.cpuset()?;
            let cores: Vec<usize> = (0..pu_count).filter(|&cpu| cpuset.is_set(cpu)).collect();
            Some(NumaNode { node_id, cores })
        })
        .collect();
    nodes.sort_by_key(|n| n.node_id);
    Ok(nodes)
}

#[cfg(not(feature = "numa"))]
fn detect_nodes() -> Result<Vec<NumaNode>> {
    Ok(vec![NumaNode {
        node_id: 0,
        cores: (0..num_cpus::get_physical().max(1)).collect(),
    }])
}

/// Round-robin chunks of worker ids across nodes, filling a node's physical
/// core count before spilling to the next node. Workers beyond the total core
/// count wrap back onto node 0's cores (hyperthread / oversubscription case).
fn assign_workers(nodes: &[NumaNode], workers: usize) -> Vec<(usize, usize)> {
    let mut assignment = Vec::with_capacity(workers);
    if workers == 0 {
        return assignment;
    }
    'outer: loop {
        let mut made_progress = false;
        for node in nodes {
            for &core in &node.cores {
                if assignment.len() >= workers {
                    break 'outer;
                }
                assignment.push((node.node_id, core));
                made_progress = true;
            }
        }
        if !made_progress {
            // no cores reported anywhere: degenerate single-slot fallback
            assignment.push((0, 0));
        }
    }
    assignment
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_node_wraps_cores() {
        let topo = Topology::single_node(4);
        assert_eq!(topo.numa_node_count(), 1);
        for w in 0..4 {
            assert_eq!(topo.node_of_worker(w), 0);
        }
    }

    #[test]
    fn detect_produces_at_least_one_node() {
        if let Ok(topo) = Topology::detect(8) {
            assert!(topo.numa_node_count() >= 1);
            assert_eq!(topo.worker_cores.len(), 8);
        }
    }
}
