//! sequent - eager single-threaded Tasks and two ways of chaining them
//!
//! Design principles:
//! - Eager: a Task's body starts running the moment it is created
//! - Owned: one Task, one computation, one completion cell; move-only
//! - Tractable: no threads, no timers, no I/O; a small cooperative queue
//!   resumes suspended bodies
//!
//! The `kernel` module holds the primitive and the chaining combinators, in a
//! suspension variant (Tasks awaiting Tasks) and a continuation-passing
//! variant (callbacks). The `driver` runs every variant over the same
//! workloads and reports how long each takes.

pub mod driver;
pub mod kernel;

pub use driver::{DriverConfig, DriverError, Report, Shape, Variant};
pub use kernel::{Fault, Task, TaskError, TaskResult};
