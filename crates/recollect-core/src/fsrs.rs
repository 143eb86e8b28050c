//! FSRS-derived retrievability kernel (C1).
//!
//! Reference: https://github.com/open-spaced-repetition/fsrs4anki
//!
//! This is the simplified single-factor curve from spec section 4.1, not
//! the full 21-parameter FSRS-6 model — just `R(t, S) = (1 + FACTOR*t/S)^DECAY`
//! plus a stability/difficulty update that satisfies the required
//! monotonicity contracts without pinning an exact formula.

use serde::{Deserialize, Serialize};

/// `19/81`, the FSRS forgetting-curve factor.
pub const FSRS_FACTOR: f64 = 19.0 / 81.0;
/// Power-law decay exponent.
pub const FSRS_DECAY: f64 = -0.5;
pub const DEFAULT_STABILITY: f64 = 1.0;
pub const DEFAULT_DIFFICULTY: f64 = 5.0;
pub const TARGET_RETRIEVABILITY: f64 = 0.9;
pub const MIN_STABILITY: f64 = 0.01;
pub const MAX_DIFFICULTY: f64 = 10.0;
pub const MIN_DIFFICULTY: f64 = 1.0;
/// Stability cap enforced only by the consolidation STRENGTHEN step.
pub const STRENGTHEN_STABILITY_CAP: f64 = 365.0;

/// Review grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Grade {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

/// Retrievability `R(t, S)`: predicted probability of successful recall.
///
/// Contracts (spec 4.1 / 8):
/// - `R(0, S) == 1` exactly.
/// - Monotonically non-increasing in `t` for `S > 0`.
/// - Clamped to `[0, 1]`.
/// - Negative `t` is treated as 0; non-positive or NaN `S` falls back to
///   `DEFAULT_STABILITY`; NaN `t` is treated as 0.
pub fn retrievability(t_days: f64, stability: f64) -> f64 {
    let t = if t_days.is_nan() { 0.0 } else { t_days.max(0.0) };
    let s = if stability.is_nan() || stability <= 0.0 {
        DEFAULT_STABILITY
    } else {
        stability
    };

    if t == 0.0 {
        return 1.0;
    }

    let r = (1.0 + FSRS_FACTOR * t / s).powf(FSRS_DECAY);
    r.clamp(0.0, 1.0)
}

/// Solve `R(t, S) = target` for `t`. Returns a positive real; at
/// `target = TARGET_RETRIEVABILITY` this is approximately `S`.
pub fn optimal_interval(stability: f64, target: f64) -> f64 {
    let s = if stability.is_nan() || stability <= 0.0 {
        DEFAULT_STABILITY
    } else {
        stability
    };
    let target = target.clamp(0.0001, 0.9999);
    // R = (1 + F*t/S)^D  =>  t = S/F * (R^(1/D) - 1)
    (s / FSRS_FACTOR) * (target.powf(1.0 / FSRS_DECAY) - 1.0)
}

/// Update stability after a review with the given grade.
///
/// Exact formula is left to the implementer (spec open question); only
/// the sign/monotonicity contracts are required:
/// 1. `update(S, D, R, GOOD) > S` for `R >= 0.5`.
/// 2. `update(S, D, R, AGAIN) < S`.
/// 3. For fixed `S, R, GOOD`: easier difficulty grows stability more than
///    harder difficulty.
pub fn next_stability(stability: f64, difficulty: f64, retrievability: f64, grade: Grade) -> f64 {
    let s = stability.max(MIN_STABILITY);
    let d = difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY);
    // Normalize difficulty to (0, 1], easier -> larger factor.
    let ease = (MAX_DIFFICULTY + 1.0 - d) / MAX_DIFFICULTY;
    let r = retrievability.clamp(0.0, 1.0);

    let next = match grade {
        Grade::Again => s * (0.3 + 0.3 * ease),
        Grade::Hard => s * (1.0 + 0.15 * ease),
        Grade::Good => s * (1.0 + (1.5 + r) * ease),
        Grade::Easy => s * (1.0 + (2.5 + r) * ease * 1.3),
    };

    next.max(MIN_STABILITY)
}

/// Update difficulty after a review. EASY decreases `D`, AGAIN increases
/// it; always clamped to `[1, 10]`.
pub fn next_difficulty(difficulty: f64, grade: Grade) -> f64 {
    let delta = match grade {
        Grade::Again => 1.0,
        Grade::Hard => 0.3,
        Grade::Good => 0.0,
        Grade::Easy => -1.0,
    };
    (difficulty + delta).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}
