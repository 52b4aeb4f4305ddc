//! Workload kernel
//!
//! The pure function every computation runs. Its cost grows linearly with the
//! workload, and each step goes through `black_box` so the loop survives
//! optimization instead of collapsing into the closed form.

use std::hint::black_box;

/// Workload parameter. Unsigned, so a reduced workload is never negative.
pub type Workload = u64;

/// Modulus applied to the first step's result before the second step
pub const CHAIN_MODULUS: i64 = 100;

/// Modulus applied to the second step's result before the third step
pub const COMPLEX_CHAIN_MODULUS: i64 = 50;

/// Accumulate `i * 31 + (i & 1)` for every `i` below `workload`.
///
/// Arithmetic wraps, so arbitrarily large workloads stay well-defined.
#[inline(never)]
pub fn compute(workload: Workload) -> i64 {
    let mut acc: i64 = 0;
    for i in 0..workload {
        let i = i as i64;
        let term = black_box(i.wrapping_mul(31).wrapping_add(i & 1));
        acc = black_box(acc.wrapping_add(term));
    }
    acc
}

/// Reduce a step result into the next step's workload.
pub fn reduce(value: i64, modulus: i64) -> Workload {
    value.rem_euclid(modulus) as Workload
}

/// What `compute` returns, without the loop.
///
/// Agrees with `compute` for every workload: the triangular sum is taken
/// exactly in `u128`, then wrapped the same way the loop wraps.
pub fn closed_form(workload: Workload) -> i64 {
    let n = u128::from(workload);
    let triangle = (n * n.saturating_sub(1) / 2) as u64 as i64;
    triangle
        .wrapping_mul(31)
        .wrapping_add((workload / 2) as i64)
}
