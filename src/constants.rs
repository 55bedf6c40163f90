// src/constants.rs
//
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tunable defaults, mirrored from the reference configuration and optimizer.

/// Default per-experiment block-size hint.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Default SGD step size.
pub const DEFAULT_STEP_SIZE: f64 = 0.5;

/// Default per-epoch step decay multiplier.
pub const DEFAULT_STEP_DECAY: f64 = 0.8;

/// Default L2 regularization coefficient.
pub const DEFAULT_MU: f64 = 1.0;

/// Default HogWild++/MyWild ring-sync tolerance.
pub const DEFAULT_TOLERANCE: f64 = 0.01;

/// Default ring-sync base delay (scaled by physical thread count).
pub const DEFAULT_UPDATE_DELAY: usize = 64;

/// Bisection tolerance used to solve `beta^c + beta - 1 = 0`.
pub const BETA_BISECTION_TOLERANCE: f64 = 1e-3;

/// Bisection search interval for beta.
pub const BETA_BISECTION_LOW: f64 = 0.6;
pub const BETA_BISECTION_HIGH: f64 = 1.0;

/// Phase A: consecutive rejected proposals before counting one failed epoch.
pub const DEFAULT_FAIL_TRIES_THRESHOLD: usize = 300;

/// Phase A: consecutive failed epochs before stopping local search.
pub const DEFAULT_MAX_FAILED_EPOCHS: usize = 25;

/// Phase B: chain moves may be accepted even if a single hop increases the
/// score by less than this, as long as the whole cycle's total is negative.
pub const DEFAULT_MAX_SCORE_INCREASE: f64 = 50.0;

/// Phase B: number of greedy chain-swap passes per split.
pub const DEFAULT_PHASE_B_EPOCHS: usize = 3;

/// Phase B's chain search is a Held-Karp Hamiltonian-cycle DP over the group
/// set, `O(2^groups * groups^2)` in both time and its `dp`/`parent` table
/// memory. This bounds `groups` to what that table can hold comfortably
/// (`2^20 * 20 * 8` bytes is on the order of tens of megabytes); above it the
/// search is rejected rather than left to exhaust memory or hang.
pub const MAX_PHASE_B_GROUPS: usize = 20;
