// src/barrier.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reusable (cyclic) barriers. Two implementations share one trait so the
//! worker pool and SGD engine can be generic over the choice: a blocking
//! variant (mutex + condvar) for the pool's task-dispatch rendezvous, and a
//! spin variant (single atomic counter) for the SGD engine's short per-epoch
//! synchronization points.

use crossbeam_utils::CachePadded;
use std::sync::{Condvar, Mutex};

/// A barrier that admits exactly `total` arrivals per epoch and never lets a
/// caller pass through early.
pub trait CyclicBarrier: Send + Sync {
    fn wait(&self);
    fn total(&self) -> usize;
}

/// Mutex/condvar barrier. Used for the worker pool's `ready`/`finished`
/// rendezvous, where task dispatch is not latency-critical.
pub struct Blocking {
    total: usize,
    state: Mutex<BlockingState>,
    condvar: Condvar,
}

struct BlockingState {
    count: usize,
    epoch: u64,
}

impl Blocking {
    pub fn new(total: usize) -> Self {
        assert!(total > 0, "barrier must admit at least one participant");
        Self {
            total,
            state: Mutex::new(BlockingState { count: 0, epoch: 0 }),
            condvar: Condvar::new(),
        }
    }
}

impl CyclicBarrier for Blocking {
    fn wait(&self) {
        let mut state = self.state.lock().unwrap();
        let my_epoch = state.epoch;
        state.count += 1;
        if state.count == self.total {
            state.count = 0;
            state.epoch = state.epoch.wrapping_add(1);
            self.condvar.notify_all();
        } else {
            while state.epoch == my_epoch {
                state = self.condvar.wait(state).unwrap();
            }
        }
    }

    fn total(&self) -> usize {
        self.total
    }
}

/// Single-atomic spin barrier. Matches the reference `spin_barrier`: arrivals
/// are tracked by a monotonically increasing counter; the epoch an arrival
/// belongs to is `counter_before_increment / total`, and the last arriver of
/// an epoch returns immediately while everyone else busy-waits for the
/// counter to cross the next multiple of `total`.
pub struct Spin {
    total: usize,
    counter: CachePadded<std::sync::atomic::AtomicUsize>,
}

impl Spin {
    pub fn new(total: usize) -> Self {
        assert!(total > 0, "barrier must admit at least one participant");
        Self {
            total,
            counter: CachePadded::new(std::sync::atomic::AtomicUsize::new(0)),
        }
    }
}

impl CyclicBarrier for Spin {
    fn wait(&self) {
        use std::sync::atomic::Ordering;
        let value = self.counter.fetch_add(1, Ordering::AcqRel);
        let start_epoch = value / self.total;
        let threshold = (start_epoch + 1) * self.total;
        if value + 1 == threshold {
            return;
        }
        while self.counter.load(Ordering::Acquire) < threshold {
            std::hint::spin_loop();
        }
    }

    fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    fn stress<B: CyclicBarrier + 'static>(barrier: Arc<B>, workers: usize, rounds: usize) {
        let round_counter = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for _ in 0..workers {
            let barrier = barrier.clone();
            let round_counter = round_counter.clone();
            handles.push(thread::spawn(move || {
                for r in 0..rounds {
                    barrier.wait();
                    // every worker should observe the same round number here
                    let observed = round_counter.load(Ordering::SeqCst);
                    assert_eq!(observed, r);
                    barrier.wait();
                    round_counter.fetch_max(r + 1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn blocking_barrier_admits_exactly_total_per_epoch() {
        stress(Arc::new(Blocking::new(8)), 8, 200);
    }

    #[test]
    fn spin_barrier_admits_exactly_total_per_epoch() {
        stress(Arc::new(Spin::new(8)), 8, 200);
    }
}
