//! Chaining combinators - suspension variant
//!
//! Each chain is itself a Task whose body starts one Task per step and feeds
//! each step's reduced result into the next. Three styles, same results:
//! - awaiting: the body awaits each step
//! - blocking: the body pulls each step with `get`, through `Task::resolve`
//! - elided: the caller hands in the already-started first step
//!
//! A step's error becomes the chain's error, unchanged.

use super::error::TaskResult;
use super::profile::{Capture, Guarded};
use super::task::Task;
use super::workload::{compute, reduce, Workload, CHAIN_MODULUS, COMPLEX_CHAIN_MODULUS};

/// Start the workload kernel as a Task
pub fn compute_task<C: Capture>(workload: Workload) -> Task<i64, C> {
    Task::start(async move { compute(workload) })
}

/// Two dependent steps, awaited: `f(x) + f(f(x) mod 100)`
pub fn chain<C: Capture>(x: Workload) -> Task<i64, C> {
    chain_from(compute_task::<C>(x))
}

/// Three dependent steps, awaited
pub fn complex_chain<C: Capture>(x: Workload) -> Task<i64, C> {
    complex_chain_from(compute_task::<C>(x))
}

/// Continue a chain from an already-started first step
pub fn chain_from<C: Capture>(first: Task<i64, C>) -> Task<i64, C> {
    Task::try_start(async move {
        let v1 = first.await?;
        let v2 = compute_task::<C>(reduce(v1, CHAIN_MODULUS)).await?;
        Ok(v1.wrapping_add(v2))
    })
}

/// Continue a complex chain from an already-started first step
pub fn complex_chain_from<C: Capture>(first: Task<i64, C>) -> Task<i64, C> {
    Task::try_start(async move {
        let v1 = first.await?;
        let v2 = compute_task::<C>(reduce(v1, CHAIN_MODULUS)).await?;
        let v3 = compute_task::<C>(reduce(v2, COMPLEX_CHAIN_MODULUS)).await?;
        Ok(v1.wrapping_add(v2).wrapping_add(v3))
    })
}

/// Two dependent steps, each pulled with a blocking `get`.
///
/// A step the executor can't finish yet suspends the chain instead of
/// failing it.
pub fn chain_blocking<C: Capture>(x: Workload) -> Task<i64, C> {
    Task::try_start(async move {
        let r1 = compute_task::<C>(x);
        let v1 = r1.resolve().await?;

        let r2 = compute_task::<C>(reduce(v1, CHAIN_MODULUS));
        let v2 = r2.resolve().await?;

        Ok(v1.wrapping_add(v2))
    })
}

/// Three dependent steps, each pulled with a blocking `get`
pub fn complex_chain_blocking<C: Capture>(x: Workload) -> Task<i64, C> {
    Task::try_start(async move {
        let r1 = compute_task::<C>(x);
        let v1 = r1.resolve().await?;

        let r2 = compute_task::<C>(reduce(v1, CHAIN_MODULUS));
        let v2 = r2.resolve().await?;

        let r3 = compute_task::<C>(reduce(v2, COMPLEX_CHAIN_MODULUS));
        let v3 = r3.resolve().await?;

        Ok(v1.wrapping_add(v2).wrapping_add(v3))
    })
}

/// `f(x) + f(f(x) mod 100)` without any Task machinery
pub fn chain_direct(x: Workload) -> i64 {
    let v1 = compute(x);
    v1.wrapping_add(compute(reduce(v1, CHAIN_MODULUS)))
}

/// The three-step sum without any Task machinery
pub fn complex_chain_direct(x: Workload) -> i64 {
    let v1 = compute(x);
    let v2 = compute(reduce(v1, CHAIN_MODULUS));
    let v3 = compute(reduce(v2, COMPLEX_CHAIN_MODULUS));
    v1.wrapping_add(v2).wrapping_add(v3)
}

/// Default-profile shorthand for `chain(x).get()`
pub fn run_chain(x: Workload) -> TaskResult<i64> {
    chain::<Guarded>(x).get()
}

/// Default-profile shorthand for `complex_chain(x).get()`
pub fn run_complex_chain(x: Workload) -> TaskResult<i64> {
    complex_chain::<Guarded>(x).get()
}
