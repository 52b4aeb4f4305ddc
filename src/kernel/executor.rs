//! Resumption queue for suspended frames
//!
//! Single-threaded and cooperative:
//! - Frames register a weak handle when they are created
//! - A frame's waker pushes its id onto the ready queue
//! - Whoever needs progress drives the queue: a blocking `get` until its own
//!   frame settles, or `run_until_idle` until nothing is ready
//!
//! Nothing here ever blocks the thread. When the queue is empty there is no
//! one left to make progress, and callers are told so.

use slab::Slab;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use tracing::trace;

/// Identifier of a registered frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId(pub usize);

impl std::fmt::Display for FrameId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({})", self.0)
    }
}

/// What happened when a frame was resumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resumed {
    /// The body returned Pending
    Suspended,
    /// The frame is terminal (now or already)
    Done,
    /// The frame is already on the stack; try again later
    Busy,
}

/// A frame the executor can re-enter
pub(crate) trait Resume {
    fn resume(&self) -> Resumed;
}

/// The executor - owns the registry and the ready queue
struct Executor {
    /// Registered frames, keyed by FrameId
    frames: Slab<Weak<dyn Resume>>,

    /// Frames whose waker fired, in wake order
    ready: VecDeque<FrameId>,
}

impl Executor {
    fn new() -> Self {
        Self {
            frames: Slab::new(),
            ready: VecDeque::new(),
        }
    }

    /// Pop the next ready frame that is still alive
    fn next_ready(&mut self) -> Option<(FrameId, Rc<dyn Resume>)> {
        while let Some(id) = self.ready.pop_front() {
            if let Some(frame) = self.frames.get(id.0).and_then(Weak::upgrade) {
                return Some((id, frame));
            }
        }
        None
    }
}

thread_local! {
    static EXECUTOR: RefCell<Executor> = RefCell::new(Executor::new());
}

// Every borrow of EXECUTOR is short and never calls into a frame, so frames
// may register, release and wake from inside `resume`.

/// Register a frame, returning its id
pub(crate) fn register(frame: Weak<dyn Resume>) -> FrameId {
    EXECUTOR.with(|e| FrameId(e.borrow_mut().frames.insert(frame)))
}

/// Forget a frame. Ids left in the ready queue are skipped when popped.
pub(crate) fn release(id: FrameId) {
    // The registry may already be gone during thread teardown
    let _ = EXECUTOR.try_with(|e| {
        let mut exec = e.borrow_mut();
        if exec.frames.contains(id.0) {
            exec.frames.remove(id.0);
        }
    });
}

/// Mark a frame as ready to be resumed
pub(crate) fn wake(id: FrameId) {
    let _ = EXECUTOR.try_with(|e| e.borrow_mut().ready.push_back(id));
}

fn next_ready() -> Option<(FrameId, Rc<dyn Resume>)> {
    EXECUTOR.with(|e| e.borrow_mut().next_ready())
}

/// Frames found already on the stack while driving.
///
/// Goes back on the ready queue when dropped, including when a resumed
/// frame unwinds through the driving loop.
struct Requeue(Vec<FrameId>);

impl Drop for Requeue {
    fn drop(&mut self) {
        if self.0.is_empty() {
            return;
        }
        let busy = std::mem::take(&mut self.0);
        let _ = EXECUTOR.try_with(|e| e.borrow_mut().ready.extend(busy));
    }
}

/// Resume ready frames until `settled` holds or the queue runs dry.
///
/// Returns whether `settled` holds. Frames that turn out to be on the stack
/// already are put back on the queue once driving stops.
pub(crate) fn drive_until(mut settled: impl FnMut() -> bool) -> bool {
    let mut busy = Requeue(Vec::new());
    loop {
        if settled() {
            return true;
        }
        let Some((id, frame)) = next_ready() else {
            return false;
        };
        if frame.resume() == Resumed::Busy {
            busy.0.push(id);
        }
    }
}

/// Resume frames until nothing is ready.
///
/// Returns the number of resumes performed.
pub fn run_until_idle() -> usize {
    let mut resumed = 0;
    let mut busy = Requeue(Vec::new());
    while let Some((id, frame)) = next_ready() {
        match frame.resume() {
            Resumed::Busy => busy.0.push(id),
            _ => resumed += 1,
        }
    }
    drop(busy);
    trace!(resumed, "executor idle");
    resumed
}

/// Number of wake-ups waiting to be processed
pub fn ready_count() -> usize {
    EXECUTOR.with(|e| e.borrow().ready.len())
}

/// Number of live registered frames
pub fn frame_count() -> usize {
    EXECUTOR.with(|e| e.borrow().frames.len())
}

/// Create a waker that marks a frame as ready
pub(crate) fn waker(id: FrameId) -> Waker {
    let raw = RawWaker::new(id.0 as *const (), &WAKER_VTABLE);
    // SAFETY: the data pointer is a plain integer id and every vtable entry
    // treats it as one; nothing is ever dereferenced.
    unsafe { Waker::from_raw(raw) }
}

// Waker implementation: the data pointer carries the FrameId itself, so
// clones are free and a waker outliving its frame is harmless.

const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

unsafe fn waker_clone(ptr: *const ()) -> RawWaker {
    RawWaker::new(ptr, &WAKER_VTABLE)
}

unsafe fn waker_wake(ptr: *const ()) {
    wake(FrameId(ptr as usize));
}

unsafe fn waker_wake_by_ref(ptr: *const ()) {
    wake(FrameId(ptr as usize));
}

unsafe fn waker_drop(_ptr: *const ()) {}

/// Future that suspends once, waking itself first.
///
/// The enclosing frame goes back on the ready queue, so its completion is
/// deferred until someone drives the executor.
#[derive(Debug, Default)]
#[must_use = "futures do nothing unless awaited"]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Suspend the current frame once
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}
