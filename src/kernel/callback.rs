//! Chaining combinators - continuation-passing variant
//!
//! The producer calls the consumer's continuation as soon as its result
//! exists. There is no cell and no state machine, just closures, each
//! capturing by value the intermediates the next step needs.
//!
//! `Deferred` expresses the same pipelines as a flat `then` chain instead of a
//! pyramid of closures. Execution order is identical.

use super::workload::{compute, reduce, Workload, CHAIN_MODULUS, COMPLEX_CHAIN_MODULUS};

/// A boxed continuation
pub type Callback<T> = Box<dyn FnOnce(T)>;

/// Run the kernel and hand its result to `callback`
pub fn start_with_callback<F>(workload: Workload, callback: F)
where
    F: FnOnce(i64),
{
    callback(compute(workload));
}

/// Two dependent steps as nested continuations
pub fn chain_with_callback<F>(x: Workload, final_callback: F)
where
    F: FnOnce(i64),
{
    start_with_callback(x, move |v1| {
        start_with_callback(reduce(v1, CHAIN_MODULUS), move |v2| {
            final_callback(v1.wrapping_add(v2));
        });
    });
}

/// Three dependent steps as nested continuations
pub fn complex_chain_with_callback<F>(x: Workload, final_callback: F)
where
    F: FnOnce(i64),
{
    start_with_callback(x, move |v1| {
        start_with_callback(reduce(v1, CHAIN_MODULUS), move |v2| {
            start_with_callback(reduce(v2, COMPLEX_CHAIN_MODULUS), move |v3| {
                final_callback(v1.wrapping_add(v2).wrapping_add(v3));
            });
        });
    });
}

/// A computation that delivers its result to whatever continuation it is
/// finally given.
///
/// Nothing runs until `finish`; then every stage runs in order, each handing
/// its value straight to the next.
#[must_use = "a Deferred does nothing until finished"]
pub struct Deferred<T> {
    run: Box<dyn FnOnce(Callback<T>)>,
}

impl<T: 'static> Deferred<T> {
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce(Callback<T>) + 'static,
    {
        Self { run: Box::new(run) }
    }

    /// A stage that delivers `value` as-is
    pub fn ready(value: T) -> Self {
        Self::new(move |done| done(value))
    }

    /// Feed this stage's value into the stage `next` builds
    pub fn then<U, F>(self, next: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(T) -> Deferred<U> + 'static,
    {
        Deferred::new(move |done: Callback<U>| {
            (self.run)(Box::new(move |value| next(value).finish_boxed(done)))
        })
    }

    /// Transform this stage's value
    pub fn map<U, F>(self, f: F) -> Deferred<U>
    where
        U: 'static,
        F: FnOnce(T) -> U + 'static,
    {
        Deferred::new(move |done: Callback<U>| (self.run)(Box::new(move |value| done(f(value)))))
    }

    /// Run the pipeline, delivering the final value to `callback`
    pub fn finish<F>(self, callback: F)
    where
        F: FnOnce(T) + 'static,
    {
        self.finish_boxed(Box::new(callback));
    }

    fn finish_boxed(self, callback: Callback<T>) {
        (self.run)(callback)
    }
}

impl Deferred<i64> {
    /// The kernel as a pipeline stage
    pub fn compute(workload: Workload) -> Self {
        Self::new(move |done| start_with_callback(workload, done))
    }
}

impl<T> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

/// Two dependent steps as a `then` pipeline
pub fn chain_deferred(x: Workload) -> Deferred<i64> {
    Deferred::compute(x).then(|v1| {
        Deferred::compute(reduce(v1, CHAIN_MODULUS)).map(move |v2| v1.wrapping_add(v2))
    })
}

/// Three dependent steps as a `then` pipeline
pub fn complex_chain_deferred(x: Workload) -> Deferred<i64> {
    Deferred::compute(x)
        .then(|v1| Deferred::compute(reduce(v1, CHAIN_MODULUS)).map(move |v2| (v1, v2)))
        .then(|(v1, v2)| {
            Deferred::compute(reduce(v2, COMPLEX_CHAIN_MODULUS))
                .map(move |v3| v1.wrapping_add(v2).wrapping_add(v3))
        })
}
