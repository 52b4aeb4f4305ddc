//! Task abstraction
//!
//! A Task is the exclusive owner of one computation and its completion cell.
//! Starting a Task runs its body right away, up to its first suspension; a
//! body that never suspends is finished before `start` returns.
//!
//! Two ways to observe the outcome, backed by the same cell:
//! - `get` pulls synchronously, driving the executor if the body is suspended
//! - awaiting the Task (or its `Awaiter`) from another body suspends that body
//!   until this one completes
//!
//! Dropping a Task drops its body and discards any outcome nobody observed,
//! failures included.

use super::cell::{Completion, CompletionCell};
use super::error::{TaskError, TaskResult};
use super::executor::{self, FrameId, Resume, Resumed};
use super::profile::{Capture, Guarded};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::future::{Future, IntoFuture};
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use tracing::trace;

/// Task execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// No computation attached
    Empty,
    /// Registered, not yet resumed
    Created,
    /// Body is being polled
    Running,
    /// Body returned Pending; waiting for its waker
    Suspended,
    /// Finished; the cell holds the outcome (or the body unwound)
    Done,
}

/// The unit of deferred computation: a body plus the cell it completes
struct Frame<T> {
    id: FrameId,
    state: Cell<TaskState>,
    /// Dropped as soon as the body returns
    body: RefCell<Option<LocalBoxFuture<'static, TaskResult<T>>>>,
    cell: RefCell<CompletionCell<T>>,
    /// Frames awaiting this one
    waiters: RefCell<Vec<Waker>>,
}

impl<T> Frame<T> {
    fn new(id: FrameId, body: LocalBoxFuture<'static, TaskResult<T>>) -> Self {
        Self {
            id,
            state: Cell::new(TaskState::Created),
            body: RefCell::new(Some(body)),
            cell: RefCell::new(CompletionCell::new()),
            waiters: RefCell::new(Vec::new()),
        }
    }

    fn is_settled(&self) -> bool {
        self.state.get() == TaskState::Done
    }

    fn is_ready(&self) -> bool {
        self.cell.borrow().is_ready()
    }

    fn observe(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        let cell = self.cell.borrow();
        if !cell.is_ready() && self.is_settled() {
            return Err(TaskError::NoValue);
        }
        cell.read()
    }

    fn add_waiter(&self, waker: &Waker) {
        let mut waiters = self.waiters.borrow_mut();
        if !waiters.iter().any(|w| w.will_wake(waker)) {
            waiters.push(waker.clone());
        }
    }

    fn wake_waiters(&self) {
        for waker in self.waiters.take() {
            waker.wake();
        }
    }

    fn complete(&self, outcome: TaskResult<T>) {
        if let Err(err) = self.cell.borrow_mut().write(outcome) {
            panic!("{}: {}", self.id, err);
        }
        self.state.set(TaskState::Done);
        trace!(frame = self.id.0, "done");
        self.wake_waiters();
    }
}

/// Marks a frame done if its body unwinds, so awaiting frames still wake up
struct SettleOnUnwind<'a, T>(&'a Frame<T>);

impl<T> Drop for SettleOnUnwind<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.state.set(TaskState::Done);
            self.0.wake_waiters();
        }
    }
}

impl<T> Resume for Frame<T> {
    fn resume(&self) -> Resumed {
        if self.is_settled() {
            return Resumed::Done;
        }
        let Ok(mut slot) = self.body.try_borrow_mut() else {
            return Resumed::Busy;
        };
        let Some(body) = slot.as_mut() else {
            return Resumed::Done;
        };

        self.state.set(TaskState::Running);
        let waker = executor::waker(self.id);
        let mut cx = Context::from_waker(&waker);

        let poll = {
            let _guard = SettleOnUnwind(self);
            body.as_mut().poll(&mut cx)
        };

        match poll {
            Poll::Pending => {
                self.state.set(TaskState::Suspended);
                trace!(frame = self.id.0, "suspended");
                Resumed::Suspended
            }
            Poll::Ready(outcome) => {
                // Release the body before anyone can observe the outcome
                *slot = None;
                drop(slot);
                self.complete(outcome);
                Resumed::Done
            }
        }
    }
}

impl<T> Drop for Frame<T> {
    fn drop(&mut self) {
        executor::release(self.id);
        trace!(frame = self.id.0, "released");
    }
}

/// Owned handle to one eagerly started computation.
///
/// Move-only. `take` moves the computation out and leaves an empty Task
/// behind; observing an empty Task fails with `InvalidTask`.
pub struct Task<T, C: Capture = Guarded> {
    frame: Option<Rc<Frame<T>>>,
    _capture: PhantomData<fn() -> C>,
}

impl<T: 'static, C: Capture> Task<T, C> {
    /// Start a body that cannot fail on its own
    pub fn start<F>(body: F) -> Self
    where
        F: Future<Output = T> + 'static,
    {
        Self::try_start(body.map(Ok::<T, TaskError>))
    }

    /// Start a body that may fail.
    ///
    /// The body runs immediately until it first suspends or finishes. Whatever
    /// error it returns is stored as-is, so a step's error forwarded with `?`
    /// reaches this Task's observers unchanged.
    pub fn try_start<F>(body: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + 'static,
    {
        let frame = Rc::new_cyclic(|weak: &Weak<Frame<T>>| {
            let weak: Weak<dyn Resume> = weak.clone();
            Frame::new(executor::register(weak), C::wrap(body))
        });
        trace!(frame = frame.id.0, profile = C::NAME, "start");

        frame.resume();

        Self {
            frame: Some(frame),
            _capture: PhantomData,
        }
    }

    /// A Task with no computation attached
    pub fn empty() -> Self {
        Self {
            frame: None,
            _capture: PhantomData,
        }
    }

    /// Move the computation out, leaving this Task empty
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_none()
    }

    pub fn id(&self) -> Option<FrameId> {
        self.frame.as_ref().map(|frame| frame.id)
    }

    pub fn state(&self) -> TaskState {
        self.frame
            .as_ref()
            .map_or(TaskState::Empty, |frame| frame.state.get())
    }

    /// True once the completion cell holds a value or a failure
    pub fn is_ready(&self) -> bool {
        self.frame.as_ref().is_some_and(|frame| frame.is_ready())
    }

    /// Snapshot of the completion cell
    pub fn completion(&self) -> Option<Completion<T>>
    where
        T: Clone,
    {
        self.frame
            .as_ref()
            .map(|frame| frame.cell.borrow().completion().clone())
    }

    /// Observe the outcome, driving the executor while the body is suspended.
    ///
    /// Repeatable: every call returns the same value or re-raises the same
    /// fault. Returns `NotReady` if the body is suspended and nothing left on
    /// the ready queue can finish it.
    pub fn get(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        let frame = self.frame.as_ref().ok_or(TaskError::InvalidTask)?;
        if !frame.is_settled() {
            executor::drive_until(|| frame.is_settled());
        }
        frame.observe()
    }

    /// `get` for use inside another body.
    ///
    /// Pulls the outcome synchronously when the executor can produce it;
    /// otherwise suspends the calling body until this computation settles,
    /// instead of handing it a `NotReady` it can only give up on.
    pub async fn resolve(self) -> TaskResult<T>
    where
        T: Clone,
    {
        let outcome = self.get();
        match outcome {
            Err(TaskError::NotReady) => self.await,
            outcome => outcome,
        }
    }

    /// Suspension-based accessor, for use inside another body
    pub fn awaitable(self) -> Awaiter<T, C> {
        Awaiter { task: self }
    }
}

impl<T, C: Capture> Default for Task<T, C> {
    fn default() -> Self {
        Self {
            frame: None,
            _capture: PhantomData,
        }
    }
}

impl<T, C: Capture> fmt::Debug for Task<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Task");
        match &self.frame {
            Some(frame) => s.field("id", &frame.id).field("state", &frame.state.get()),
            None => s.field("state", &TaskState::Empty),
        };
        s.field("profile", &C::NAME).finish()
    }
}

impl<T: Clone + 'static, C: Capture> IntoFuture for Task<T, C> {
    type Output = TaskResult<T>;
    type IntoFuture = Awaiter<T, C>;

    fn into_future(self) -> Self::IntoFuture {
        self.awaitable()
    }
}

/// Awaits a Task from inside another body.
///
/// If the Task is not done yet, the awaiting frame registers its waker with
/// the Task's frame and is resumed once that frame completes.
#[must_use = "futures do nothing unless awaited"]
pub struct Awaiter<T, C: Capture = Guarded> {
    task: Task<T, C>,
}

impl<T: 'static, C: Capture> Awaiter<T, C> {
    /// True once the completion cell holds a value or a failure, exactly
    /// like `Task::is_ready`
    pub fn ready(&self) -> bool {
        self.task.is_ready()
    }

    /// The stored outcome, with `get`'s semantics but without driving anything
    pub fn resume_value(&self) -> TaskResult<T>
    where
        T: Clone,
    {
        self.task
            .frame
            .as_ref()
            .ok_or(TaskError::InvalidTask)?
            .observe()
    }

    pub fn into_task(self) -> Task<T, C> {
        self.task
    }
}

impl<T: Clone + 'static, C: Capture> Future for Awaiter<T, C> {
    type Output = TaskResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let Some(frame) = self.task.frame.as_ref() else {
            return Poll::Ready(Err(TaskError::InvalidTask));
        };
        if frame.is_settled() {
            return Poll::Ready(frame.observe());
        }
        frame.add_waiter(cx.waker());
        Poll::Pending
    }
}

impl<T, C: Capture> fmt::Debug for Awaiter<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Awaiter").field("task", &self.task).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::error::Fault;
    use crate::kernel::executor::{frame_count, ready_count, run_until_idle, yield_now};
    use crate::kernel::profile::Unguarded;
    use std::panic::{self, AssertUnwindSafe};

    /// Sets its flag when dropped
    struct DropFlag(Rc<Cell<bool>>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.set(true);
        }
    }

    #[test]
    fn test_start_runs_eagerly() {
        let ran = Rc::new(Cell::new(false));
        let ran_clone = ran.clone();

        let task: Task<i64> = Task::start(async move {
            ran_clone.set(true);
            7
        });

        // Body already ran, before anyone observed the task
        assert!(ran.get());
        assert_eq!(task.state(), TaskState::Done);
        assert!(task.is_ready());
        assert_eq!(task.get(), Ok(7));
    }

    #[test]
    fn test_get_is_idempotent() {
        let runs = Rc::new(Cell::new(0));
        let runs_clone = runs.clone();

        let task: Task<i64> = Task::start(async move {
            runs_clone.set(runs_clone.get() + 1);
            188
        });

        assert_eq!(task.get(), Ok(188));
        assert_eq!(task.get(), Ok(188));
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_empty_task_is_invalid() {
        let task: Task<i64> = Task::empty();
        assert!(task.is_empty());
        assert_eq!(task.state(), TaskState::Empty);
        assert!(!task.is_ready());
        assert_eq!(task.get(), Err(TaskError::InvalidTask));

        let task: Task<i64> = Task::default();
        assert_eq!(task.get(), Err(TaskError::InvalidTask));
    }

    #[test]
    fn test_take_moves_computation() {
        let mut source: Task<i64> = Task::start(async { 32 });
        let id = source.id();

        let dest = source.take();

        assert!(source.is_empty());
        assert_eq!(source.get(), Err(TaskError::InvalidTask));
        assert_eq!(dest.id(), id);
        assert_eq!(dest.get(), Ok(32));
    }

    #[test]
    fn test_assign_over_drops_previous() {
        let dropped = Rc::new(Cell::new(false));
        let flag = DropFlag(dropped.clone());

        let mut task: Task<i64> = Task::start(async move {
            let _flag = flag;
            futures::pending!();
            1
        });
        assert_eq!(task.state(), TaskState::Suspended);
        assert!(!dropped.get());

        task = Task::start(async { 2 });

        assert!(dropped.get());
        assert_eq!(task.get(), Ok(2));
    }

    #[test]
    fn test_drop_releases_frame() {
        let before = frame_count();
        let task: Task<i64> = Task::start(async { 1 });
        assert_eq!(frame_count(), before + 1);

        drop(task);
        assert_eq!(frame_count(), before);
    }

    #[test]
    fn test_fault_is_captured() {
        let task: Task<i64> = Task::start(async {
            if true {
                panic!("kernel exploded");
            }
            0
        });

        assert_eq!(task.state(), TaskState::Done);
        let expected = TaskError::KernelFault(Fault::new("kernel exploded"));
        assert_eq!(task.get(), Err(expected.clone()));
        // Re-raised on every observation
        assert_eq!(task.get(), Err(expected));
    }

    #[test]
    fn test_try_start_reports_fault() {
        let task: Task<i64> = Task::try_start(async { Err(Fault::new("rejected").into()) });
        assert_eq!(
            task.completion(),
            Some(Completion::Failure(TaskError::KernelFault(Fault::new(
                "rejected"
            ))))
        );
    }

    #[test]
    fn test_unobserved_failure_is_discarded() {
        let task: Task<i64> = Task::start(async {
            if true {
                panic!("never seen");
            }
            0
        });
        // Dropping must not panic or surface the fault
        drop(task);
    }

    #[test]
    fn test_suspended_body_completes_on_get() {
        let task: Task<i64> = Task::start(async {
            yield_now().await;
            99
        });

        assert_eq!(task.state(), TaskState::Suspended);
        assert!(!task.is_ready());

        assert_eq!(task.get(), Ok(99));
        assert_eq!(task.state(), TaskState::Done);
    }

    #[test]
    fn test_stalled_body_is_not_ready() {
        let task: Task<i64> = Task::start(async {
            // Never wakes itself
            futures::pending!();
            1
        });

        assert_eq!(task.get(), Err(TaskError::NotReady));
        assert_eq!(task.state(), TaskState::Suspended);
    }

    #[test]
    fn test_await_completed_task() {
        let outer: Task<i64> = Task::try_start(async {
            let inner: Task<i64> = Task::start(async { 5 });
            let v = inner.await?;
            Ok(v * 2)
        });

        assert_eq!(outer.state(), TaskState::Done);
        assert_eq!(outer.get(), Ok(10));
    }

    #[test]
    fn test_await_suspended_task() {
        let inner: Task<i64> = Task::start(async {
            yield_now().await;
            yield_now().await;
            40
        });

        let outer: Task<i64> = Task::try_start(async move {
            let v = inner.await?;
            Ok(v + 2)
        });

        // Outer is waiting on inner, inner is waiting on the executor
        assert_eq!(outer.state(), TaskState::Suspended);

        run_until_idle();
        assert_eq!(outer.state(), TaskState::Done);
        assert_eq!(outer.get(), Ok(42));
    }

    #[test]
    fn test_fault_propagates_through_await() {
        let outer: Task<i64> = Task::try_start(async {
            let inner: Task<i64> = Task::start(async {
                yield_now().await;
                if true {
                    panic!("inner failed");
                }
                0
            });
            let v = inner.await?;
            Ok(v + 1)
        });

        assert_eq!(
            outer.get(),
            Err(TaskError::KernelFault(Fault::new("inner failed")))
        );
    }

    #[test]
    fn test_awaiter_accessors() {
        let task: Task<i64> = Task::start(async { 3 });
        let awaiter = task.awaitable();
        assert!(awaiter.ready());
        assert_eq!(awaiter.resume_value(), Ok(3));
        assert_eq!(awaiter.resume_value(), Ok(3));

        let task = awaiter.into_task();
        assert_eq!(task.get(), Ok(3));
    }

    #[test]
    fn test_awaiter_on_suspended_task() {
        let task: Task<i64> = Task::start(async {
            futures::pending!();
            3
        });
        let awaiter = task.awaitable();
        assert!(!awaiter.ready());
        assert_eq!(awaiter.resume_value(), Err(TaskError::NotReady));
    }

    #[test]
    fn test_awaiter_on_empty_task() {
        let mut awaiter = Task::<i64>::empty().awaitable();
        assert!(!awaiter.ready());
        assert_eq!(awaiter.resume_value(), Err(TaskError::InvalidTask));

        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        assert_eq!(
            Pin::new(&mut awaiter).poll(&mut cx),
            Poll::Ready(Err(TaskError::InvalidTask))
        );
    }

    #[test]
    fn test_blocking_get_inside_body() {
        let outer: Task<i64> = Task::try_start(async {
            let inner: Task<i64> = Task::start(async {
                yield_now().await;
                8
            });
            // Drives the executor from inside this frame
            let v = inner.get()?;
            Ok(v + 1)
        });

        assert_eq!(outer.state(), TaskState::Done);
        assert_eq!(outer.get(), Ok(9));
    }

    #[test]
    fn test_reentrant_resume_is_deferred() {
        let outer: Task<i64> = Task::try_start(async {
            // Queue this frame while it is still running
            futures::future::poll_fn(|cx| {
                cx.waker().wake_by_ref();
                Poll::Ready(())
            })
            .await;

            let inner: Task<i64> = Task::start(async {
                yield_now().await;
                4
            });
            let v = inner.get()?;
            Ok(v)
        });

        assert_eq!(outer.get(), Ok(4));
        // The deferred wake-up went back on the queue
        assert_eq!(ready_count(), 1);
        run_until_idle();
        assert_eq!(ready_count(), 0);
        assert_eq!(outer.get(), Ok(4));
    }

    #[test]
    fn test_unguarded_panic_unwinds_and_leaves_no_value() {
        let task: Task<i64, Unguarded> = Task::start(async {
            yield_now().await;
            if true {
                panic!("unguarded");
            }
            0
        });
        assert_eq!(task.state(), TaskState::Suspended);

        let caught = panic::catch_unwind(AssertUnwindSafe(|| task.get()));
        assert!(caught.is_err());

        assert_eq!(task.state(), TaskState::Done);
        assert_eq!(task.get(), Err(TaskError::NoValue));

        // Both accessors see the same empty cell
        assert!(!task.is_ready());
        let awaiter = task.awaitable();
        assert!(!awaiter.ready());
        assert_eq!(awaiter.resume_value(), Err(TaskError::NoValue));
    }

    #[test]
    fn test_awaiting_unwound_task_yields_no_value() {
        let inner: Task<i64, Unguarded> = Task::start(async {
            yield_now().await;
            if true {
                panic!("unguarded");
            }
            0
        });
        let outer: Task<i64, Unguarded> = Task::try_start(async move { inner.await });
        assert_eq!(outer.state(), TaskState::Suspended);

        let caught = panic::catch_unwind(AssertUnwindSafe(run_until_idle));
        assert!(caught.is_err());
        run_until_idle();

        assert_eq!(outer.get(), Err(TaskError::NoValue));
    }

    #[test]
    fn test_step_errors_pass_through_unchanged() {
        let outer: Task<i64> = Task::try_start(async {
            let v = Task::<i64>::empty().await?;
            Ok(v)
        });
        assert_eq!(outer.get(), Err(TaskError::InvalidTask));
        assert_eq!(
            outer.completion(),
            Some(Completion::Failure(TaskError::InvalidTask))
        );
    }

    #[test]
    fn test_resolve_suspends_instead_of_failing() {
        let release = Rc::new(Cell::new(false));
        let parked: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));

        let inner: Task<i64> = Task::start({
            let release = release.clone();
            let parked = parked.clone();
            async move {
                futures::future::poll_fn(|cx| {
                    if release.get() {
                        Poll::Ready(())
                    } else {
                        *parked.borrow_mut() = Some(cx.waker().clone());
                        Poll::Pending
                    }
                })
                .await;
                5
            }
        });

        let outer: Task<i64> = Task::try_start(async move {
            let v = inner.resolve().await?;
            Ok(v + 1)
        });

        // Nothing can finish inner yet; outer waits rather than settling
        assert_eq!(outer.state(), TaskState::Suspended);
        assert_eq!(outer.get(), Err(TaskError::NotReady));
        assert!(!outer.is_ready());

        release.set(true);
        if let Some(waker) = parked.borrow_mut().take() {
            waker.wake();
        }
        assert_eq!(outer.get(), Ok(6));
    }

    #[test]
    fn test_stalled_get_error_is_kept_as_is() {
        let outer: Task<i64> = Task::try_start(async {
            let inner: Task<i64> = Task::start(async {
                futures::pending!();
                1
            });
            let v = inner.get()?;
            Ok(v)
        });

        assert_eq!(outer.state(), TaskState::Done);
        assert_eq!(outer.get(), Err(TaskError::NotReady));
        assert_eq!(
            outer.completion(),
            Some(Completion::Failure(TaskError::NotReady))
        );
    }

    #[test]
    fn test_resolve_ready_task() {
        let outer: Task<i64> = Task::try_start(async {
            let v = Task::<i64>::start(async { 20 }).resolve().await?;
            Ok(v + 1)
        });
        assert_eq!(outer.state(), TaskState::Done);
        assert_eq!(outer.get(), Ok(21));
    }

    #[test]
    fn test_unguarded_values_are_unchanged() {
        let task: Task<i64, Unguarded> = Task::start(async { 11 });
        assert_eq!(task.get(), Ok(11));
    }

    #[test]
    fn test_debug_output() {
        let task: Task<i64> = Task::empty();
        let text = format!("{:?}", task);
        assert!(text.contains("Empty"));
        assert!(text.contains("guarded"));
    }
}
