// src/pool.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-size pinned worker pool.
//!
//! Mirrors the reference `thread_pool`: `size` OS threads are spawned once,
//! each pinned to a core via `topology::Topology::pin_current_thread`, and
//! then loop forever waiting on a `ready` barrier, running whatever task was
//! published by `execute`, and signaling a `finished` barrier. There is no
//! work stealing and no dynamic resizing — this is deliberately not a rayon
//! pool, since the SGD engine needs "run this exact closure on every pinned
//! worker and collect one result per worker", not scheduled chunked work.

use crate::barrier::{Blocking, CyclicBarrier};
use crate::topology::Topology;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

type Task = Arc<dyn Fn(usize) -> Box<dyn std::any::Any + Send> + Send + Sync>;

struct Shared {
    ready: Blocking,
    finished: Blocking,
    task: Mutex<Option<Task>>,
    results: Mutex<Vec<Option<Box<dyn std::any::Any + Send>>>>,
    stop: AtomicBool,
    epoch: AtomicUsize,
}

/// A fixed pool of pinned worker threads executing one published task at a
/// time, in lockstep.
pub struct WorkerPool {
    shared: Arc<Shared>,
    handles: Vec<JoinHandle<()>>,
    size: usize,
}

impl WorkerPool {
    pub fn new(topology: Arc<Topology>, size: usize) -> Self {
        assert!(size > 0, "worker pool must have at least one worker");
        let shared = Arc::new(Shared {
            ready: Blocking::new(size + 1),
            finished: Blocking::new(size + 1),
            task: Mutex::new(None),
            results: Mutex::new((0..size).map(|_| None).collect()),
            stop: AtomicBool::new(false),
            epoch: AtomicUsize::new(0),
        });

        let handles = (0..size)
            .map(|worker_id| {
                let shared = shared.clone();
                let topology = topology.clone();
                std::thread::Builder::new()
                    .name(format!("sgd-worker-{worker_id}"))
                    .spawn(move || worker_loop(worker_id, topology, shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            handles,
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `f` once on every worker (receiving its worker id), blocking until
    /// all have completed, and return each worker's typed result in order.
    ///
    /// Panics inside a worker are treated as fatal per the error-handling
    /// design: a panicking worker aborts the process rather than leaving
    /// aliased shared model state in an unknown partial-update condition.
    pub fn execute<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(usize) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        let boxed: Task = Arc::new(move |worker_id| Box::new(f(worker_id)));
        *self.shared.task.lock().unwrap() = Some(boxed);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);

        self.shared.ready.wait();
        self.shared.finished.wait();

        let mut results = self.shared.results.lock().unwrap();
        (0..self.size)
            .map(|i| {
                *results[i]
                    .take()
                    .expect("worker did not publish a result")
                    .downcast::<R>()
                    .expect("worker result type mismatch")
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.ready.wait();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(worker_id: usize, topology: Arc<Topology>, shared: Arc<Shared>) {
    topology.pin_current_thread(worker_id);
    loop {
        shared.ready.wait();
        if shared.stop.load(Ordering::SeqCst) {
            return;
        }
        let task = shared
            .task
            .lock()
            .unwrap()
            .clone()
            .expect("ready barrier tripped without a published task");

        let result = panic::catch_unwind(AssertUnwindSafe(|| task(worker_id)));
        match result {
            Ok(value) => {
                shared.results.lock().unwrap()[worker_id] = Some(value);
            }
            Err(payload) => {
                tracing::error!(worker_id, "worker panicked, aborting process");
                drop(payload);
                std::process::abort();
            }
        }
        shared.finished.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runs_task_on_every_worker_and_collects_results() {
        let topology = Arc::new(Topology::single_node(4));
        let pool = WorkerPool::new(topology, 4);
        let results = pool.execute(|worker_id| worker_id * 2);
        assert_eq!(results, vec![0, 2, 4, 6]);
    }

    #[test]
    fn supports_repeated_execution() {
        let topology = Arc::new(Topology::single_node(3));
        let pool = WorkerPool::new(topology, 3);
        for epoch in 0..5 {
            let results = pool.execute(move |worker_id| worker_id + epoch);
            assert_eq!(results, vec![epoch, 1 + epoch, 2 + epoch]);
        }
    }
}
