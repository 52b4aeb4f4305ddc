//! Task error types

use std::any::Any;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Task result type
pub type TaskResult<T> = Result<T, TaskError>;

/// Everything that can go wrong when observing a computation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The computation failed; the fault was captured into its cell
    #[error("kernel fault: {0}")]
    KernelFault(Fault),
    /// The task holds no computation (moved-from or never started)
    #[error("invalid task: no computation attached")]
    InvalidTask,
    /// The computation finished without producing a value or a fault
    #[error("computation finished without a value")]
    NoValue,
    /// A completion cell was written twice
    #[error("completion cell already written")]
    DoubleWrite,
    /// The computation is suspended and nothing left on this thread can resume it
    #[error("computation not ready")]
    NotReady,
}

/// A failure captured from a computation body.
///
/// Cheap to clone: every observation of a failed task hands out the same
/// message.
#[derive(Clone, PartialEq, Eq)]
pub struct Fault {
    message: Rc<str>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Rc::from(message.into()),
        }
    }

    /// Build a fault from a panic payload caught while polling a body.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        if let Some(msg) = payload.downcast_ref::<&'static str>() {
            Self::new(*msg)
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            Self::new(msg.as_str())
        } else {
            Self::new("computation panicked")
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Fault").field(&self.message()).finish()
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Fault {}

/// A fault raised by a body becomes that body's `KernelFault`
impl From<Fault> for TaskError {
    fn from(fault: Fault) -> Self {
        TaskError::KernelFault(fault)
    }
}
