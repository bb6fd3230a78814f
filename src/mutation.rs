//! Mutation primitives for layer parameters.
//!
//! These are the low-level randomized perturbations every layer kind builds
//! its `mutate()` out of. All of them are pure with respect to their inputs
//! (they return new values, callers assign) and take an injected random
//! source so search runs are reproducible.
//!
//! Values never leave the `[min, max]` bounds: a step that would cross a
//! boundary is clamped, not wrapped.
//!
//! # Examples
//!
//! ```
//! use blocknas::mutation::{mutate_int, MutationOp};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let filters = mutate_int(16, 1, 128, MutationOp::Step, &mut rng);
//! assert!(filters == 15 || filters == 17);
//! ```

use rand::Rng;

/// Policy selector for integer and tuple mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOp {
    /// Move by ±1, clamped to bounds.
    Step,
    /// Move every tuple element by the same ±1 delta (square kernels,
    /// uniform strides). Equivalent to `Step` for scalars.
    SyncStep,
    /// Re-draw uniformly within bounds.
    Random,
}

/// Mutate an integer parameter within `[min, max]`.
///
/// `Step`/`SyncStep` move the value by one in a random direction; a value
/// already on a boundary steps away from it. `Random` re-draws uniformly.
pub fn mutate_int<R: Rng>(value: usize, min: usize, max: usize, op: MutationOp, rng: &mut R) -> usize {
    debug_assert!(min <= max);
    match op {
        MutationOp::Step | MutationOp::SyncStep => {
            let up = if value <= min {
                true
            } else if value >= max {
                false
            } else {
                rng.gen_bool(0.5)
            };
            if up {
                (value + 1).min(max)
            } else {
                value.saturating_sub(1).max(min)
            }
        }
        MutationOp::Random => rng.gen_range(min..=max),
    }
}

/// Mutate a 2-tuple parameter element-wise within `[min, max]`.
///
/// With `SyncStep` both elements move by the same delta; with `Step` each
/// element moves independently; with `Random` both are re-drawn.
///
/// # Examples
///
/// ```
/// use blocknas::mutation::{mutate_tuple, MutationOp};
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(1);
/// let (kx, ky) = mutate_tuple((3, 3), 1, 7, MutationOp::SyncStep, &mut rng);
/// assert_eq!(kx, ky); // synced kernels stay square
/// ```
pub fn mutate_tuple<R: Rng>(
    value: (usize, usize),
    min: usize,
    max: usize,
    op: MutationOp,
    rng: &mut R,
) -> (usize, usize) {
    match op {
        MutationOp::SyncStep => {
            // One coin flip drives both elements; per-element clamping still
            // applies when the pair is not on the same value.
            let up = if value.0 <= min || value.1 <= min {
                true
            } else if value.0 >= max || value.1 >= max {
                false
            } else {
                rng.gen_bool(0.5)
            };
            let step = |v: usize| {
                if up {
                    (v + 1).min(max)
                } else {
                    v.saturating_sub(1).max(min)
                }
            };
            (step(value.0), step(value.1))
        }
        MutationOp::Step => (
            mutate_int(value.0, min, max, MutationOp::Step, rng),
            mutate_int(value.1, min, max, MutationOp::Step, rng),
        ),
        MutationOp::Random => (rng.gen_range(min..=max), rng.gen_range(min..=max)),
    }
}

/// Mutate a bounded float parameter, clamped to `[min, max]`.
///
/// Applies a uniform perturbation of at most ±0.1, which keeps dropout-style
/// rates moving in small increments.
pub fn mutate_unit_interval<R: Rng>(value: f64, min: f64, max: f64, rng: &mut R) -> f64 {
    debug_assert!(min <= max);
    let delta = rng.gen_range(-0.1..=0.1);
    (value + delta).clamp(min, max)
}

/// Pick a uniformly random member of `variants` different from `current`.
///
/// Falls back to `current` when the table has a single entry. This is the
/// closed-set analogue of mutating an enumeration field.
pub fn mutate_choice<T: Copy + PartialEq, R: Rng>(current: T, variants: &[T], rng: &mut R) -> T {
    debug_assert!(!variants.is_empty());
    if variants.len() == 1 {
        return variants[0];
    }
    loop {
        let pick = variants[rng.gen_range(0..variants.len())];
        if pick != current {
            return pick;
        }
    }
}
