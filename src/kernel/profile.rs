//! Capture profiles
//!
//! A profile decides what a panicking body turns into. `Guarded` catches the
//! panic and stores it as the task's failure; `Unguarded` lets it unwind out
//! of whoever resumed the frame.

use super::error::{Fault, TaskError, TaskResult};
use futures::future::LocalBoxFuture;
use pin_project_lite::pin_project;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

/// How a task body is stored and what happens when it panics
pub trait Capture: 'static {
    /// Short name for logs and reports
    const NAME: &'static str;

    /// Box a body for storage in a frame
    fn wrap<T, F>(body: F) -> LocalBoxFuture<'static, TaskResult<T>>
    where
        T: 'static,
        F: Future<Output = TaskResult<T>> + 'static;
}

/// Panics are captured into the completion cell as failures
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guarded;

/// Panics propagate; the frame ends up done without a value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unguarded;

impl Capture for Guarded {
    const NAME: &'static str = "guarded";

    fn wrap<T, F>(body: F) -> LocalBoxFuture<'static, TaskResult<T>>
    where
        T: 'static,
        F: Future<Output = TaskResult<T>> + 'static,
    {
        Box::pin(CatchUnwind { body })
    }
}

impl Capture for Unguarded {
    const NAME: &'static str = "unguarded";

    fn wrap<T, F>(body: F) -> LocalBoxFuture<'static, TaskResult<T>>
    where
        T: 'static,
        F: Future<Output = TaskResult<T>> + 'static,
    {
        Box::pin(body)
    }
}

pin_project! {
    /// Polls a body, turning a panic into a `KernelFault`
    #[must_use = "futures do nothing unless polled"]
    pub struct CatchUnwind<F> {
        #[pin]
        body: F,
    }
}

impl<F> CatchUnwind<F> {
    pub fn new(body: F) -> Self {
        Self { body }
    }
}

impl<T, F> Future for CatchUnwind<F>
where
    F: Future<Output = TaskResult<T>>,
{
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let body = self.project().body;
        match panic::catch_unwind(AssertUnwindSafe(|| body.poll(cx))) {
            Ok(poll) => poll,
            Err(payload) => {
                Poll::Ready(Err(TaskError::KernelFault(Fault::from_panic(payload))))
            }
        }
    }
}
