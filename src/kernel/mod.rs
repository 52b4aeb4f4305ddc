//! The kernel - the Task primitive and the two ways of sequencing it
//!
//! Leaves first:
//! - `workload`: the pure function every computation runs
//! - `cell`: single-write storage for an outcome
//! - `task`: the owned, eagerly started computation, resumed by `executor`
//! - `chain` and `callback`: dependent sequences, by suspension and by
//!   continuation-passing
//!
//! Single-threaded throughout. Nothing here blocks the thread or spawns one.

pub mod callback;
pub mod cell;
pub mod chain;
pub mod error;
pub mod executor;
pub mod profile;
pub mod task;
pub mod workload;

pub use callback::{Callback, Deferred};
pub use cell::{Completion, CompletionCell};
pub use error::{Fault, TaskError, TaskResult};
pub use executor::{run_until_idle, yield_now, FrameId};
pub use profile::{Capture, Guarded, Unguarded};
pub use task::{Awaiter, Task, TaskState};
pub use workload::{compute, reduce, Workload};
