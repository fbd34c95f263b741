#![forbid(unsafe_code)]

//! Two-phase, frame-batched task scheduler.
//!
//! # Design
//!
//! [`FrameScheduler`] accepts "read" and "write" work items tagged by an
//! arbitrary string key or by a [`NodeId`] identity, defers execution to
//! the host's next tick, runs all reads before all writes, and keeps only
//! the last task registered per key/identity for the pending frame.
//!
//! A task that measures layout (read) must never observe a mutation
//! (write) from the same frame that has not happened yet in program order.
//! Separating the phases yields consistent, thrash-free measurement
//! semantics — the same rationale as double-buffered rendering.
//!
//! Controllers call the scheduler on every state change; without
//! collapsing, N changes in one frame would re-render N times. Only the
//! most recently registered task per key survives, matching last-write-wins
//! semantics for idempotent render functions.
//!
//! # Invariants
//!
//! 1. Within one flush, every key/identity appears at most once per phase.
//! 2. The read phase runs to completion before any write begins.
//! 3. At most one flush is in flight; re-entrant [`run_frame`] calls are
//!    rejected.
//! 4. A task registered during a flush — in either phase — is deferred to
//!    a subsequent flush, never the one currently executing. Both phase
//!    snapshots are taken, and the pending collections cleared, before any
//!    task runs.
//! 5. Re-registering a pending key replaces the task in place: the latest
//!    task wins while the key keeps its original queue position.
//!
//! # Failure Modes
//!
//! - **Task panics during a flush**: remaining tasks in the flush still
//!   run. The first panic is re-raised to the caller of `run_frame` after
//!   both phases complete. Pending work for the next frame is unaffected
//!   (it was never part of the snapshot).
//! - **Task never returns**: stalls the entire pipeline. No watchdog is
//!   provided.
//! - **Node leak**: the identity side-tables are only cleaned by
//!   [`cancel_node`](FrameScheduler::cancel_node) or a flush; hosts must
//!   cancel on node teardown.
//!
//! [`run_frame`]: FrameScheduler::run_frame

use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::Rc;
use tracing::{debug, info_span, warn};
use web_time::Instant;

use crate::node::NodeId;

/// A deferred unit of work. Runs at most once.
type Task = Box<dyn FnOnce()>;

type FrameRequester = Rc<dyn Fn()>;

/// Key-addressed pending entry. The vector keeps insertion order; replacing
/// a key's task keeps its position.
struct KeyedTask {
    key: String,
    task: Task,
}

fn insert_keyed(entries: &mut Vec<KeyedTask>, key: String, task: Task) {
    if let Some(entry) = entries.iter_mut().find(|entry| entry.key == key) {
        entry.task = task;
    } else {
        entries.push(KeyedTask { key, task });
    }
}

fn run_phase(tasks: Vec<Task>, first_panic: &mut Option<Box<dyn std::any::Any + Send>>) {
    for task in tasks {
        let result = catch_unwind(AssertUnwindSafe(task));
        if let Err(payload) = result
            && first_panic.is_none()
        {
            *first_panic = Some(payload);
        }
    }
}

/// Counts of tasks executed by one flush.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Read tasks executed (key-addressed plus identity-addressed).
    pub reads: usize,
    /// Write tasks executed (key-addressed plus identity-addressed).
    pub writes: usize,
}

/// Completion signal returned by [`FrameScheduler::await_flush`].
///
/// Becomes complete after the next flush has fully run (read phase, then
/// write phase). A signal requested while a flush is executing completes at
/// the end of the *next* flush, consistent with task registration during a
/// flush.
pub struct FlushSignal {
    done: Rc<Cell<bool>>,
}

impl FlushSignal {
    /// Whether the awaited flush has fully run.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.done.get()
    }
}

impl std::fmt::Debug for FlushSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushSignal")
            .field("complete", &self.done.get())
            .finish()
    }
}

struct SchedulerInner {
    reads_keyed: Vec<KeyedTask>,
    writes_keyed: Vec<KeyedTask>,
    reads_by_node: AHashMap<NodeId, Task>,
    writes_by_node: AHashMap<NodeId, Task>,
    /// Whether a flush has been requested and not yet run.
    scheduled: bool,
    /// Re-entrancy latch: true while `run_frame` is executing tasks.
    flushing: bool,
    waiters: Vec<Rc<Cell<bool>>>,
    frame_requester: Option<FrameRequester>,
    frames_flushed: u64,
    tasks_executed: u64,
}

/// Frame-batched read/write task scheduler.
///
/// Cloning a `FrameScheduler` creates a new handle to the **same** pending
/// state; an application creates one instance and hands clones to its
/// controllers. Handles are deliberately `!Send`: everything runs on one
/// logical thread, driven by the host's per-frame callback.
pub struct FrameScheduler {
    inner: Rc<RefCell<SchedulerInner>>,
}

// Manual Clone: shares the same Rc.
impl Clone for FrameScheduler {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("FrameScheduler")
                .field(
                    "pending_reads",
                    &(inner.reads_keyed.len() + inner.reads_by_node.len()),
                )
                .field(
                    "pending_writes",
                    &(inner.writes_keyed.len() + inner.writes_by_node.len()),
                )
                .field("scheduled", &inner.scheduled)
                .finish(),
            Err(_) => f.write_str("FrameScheduler { <flushing> }"),
        }
    }
}

impl FrameScheduler {
    /// Create an idle scheduler with no pending work.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SchedulerInner {
                reads_keyed: Vec::new(),
                writes_keyed: Vec::new(),
                reads_by_node: AHashMap::new(),
                writes_by_node: AHashMap::new(),
                scheduled: false,
                flushing: false,
                waiters: Vec::new(),
                frame_requester: None,
                frames_flushed: 0,
                tasks_executed: 0,
            })),
        }
    }

    /// Register `task` for the read phase of the next flush, keyed by
    /// `key`. Overwrites any read task pending under the same key.
    pub fn schedule_read(&self, key: impl Into<String>, task: impl FnOnce() + 'static) {
        {
            let mut inner = self.inner.borrow_mut();
            insert_keyed(&mut inner.reads_keyed, key.into(), Box::new(task));
        }
        self.note_scheduled();
    }

    /// Register `task` for the write phase of the next flush, keyed by
    /// `key`. Overwrites any write task pending under the same key.
    pub fn schedule_write(&self, key: impl Into<String>, task: impl FnOnce() + 'static) {
        {
            let mut inner = self.inner.borrow_mut();
            insert_keyed(&mut inner.writes_keyed, key.into(), Box::new(task));
        }
        self.note_scheduled();
    }

    /// Identity-addressed variant of [`schedule_read`](Self::schedule_read).
    pub fn schedule_read_for(&self, node: NodeId, task: impl FnOnce() + 'static) {
        self.inner
            .borrow_mut()
            .reads_by_node
            .insert(node, Box::new(task));
        self.note_scheduled();
    }

    /// Identity-addressed variant of [`schedule_write`](Self::schedule_write).
    pub fn schedule_write_for(&self, node: NodeId, task: impl FnOnce() + 'static) {
        self.inner
            .borrow_mut()
            .writes_by_node
            .insert(node, Box::new(task));
        self.note_scheduled();
    }

    /// Remove any pending read and write task under `key`. No-op when
    /// nothing is pending. Has no effect on a flush snapshot already taken.
    pub fn cancel(&self, key: &str) {
        let mut inner = self.inner.borrow_mut();
        inner.reads_keyed.retain(|entry| entry.key != key);
        inner.writes_keyed.retain(|entry| entry.key != key);
    }

    /// Remove any pending read and write task for `node`. Hosts call this
    /// on node teardown; the scheduler never observes destruction itself.
    pub fn cancel_node(&self, node: NodeId) {
        let mut inner = self.inner.borrow_mut();
        inner.reads_by_node.remove(&node);
        inner.writes_by_node.remove(&node);
    }

    /// Request a flush and return a signal that completes once that flush
    /// has fully run.
    pub fn await_flush(&self) -> FlushSignal {
        let done = Rc::new(Cell::new(false));
        self.inner.borrow_mut().waiters.push(Rc::clone(&done));
        self.note_scheduled();
        FlushSignal { done }
    }

    /// Whether a flush has been requested and not yet run. The host checks
    /// this (or relies on the frame requester) to decide whether to call
    /// [`run_frame`](Self::run_frame) on its next tick.
    #[must_use]
    pub fn needs_frame(&self) -> bool {
        self.inner.borrow().scheduled
    }

    /// Install the host callback invoked whenever the scheduler transitions
    /// from idle to scheduled. If work is already pending, the callback
    /// fires immediately so the cue is not lost.
    pub fn set_frame_requester(&self, requester: impl Fn() + 'static) {
        let fire = {
            let mut inner = self.inner.borrow_mut();
            inner.frame_requester = Some(Rc::new(requester));
            inner.scheduled
        };
        if fire {
            let requester = self.inner.borrow().frame_requester.clone();
            if let Some(requester) = requester {
                requester();
            }
        }
    }

    /// Pending read tasks (key-addressed plus identity-addressed).
    #[must_use]
    pub fn pending_reads(&self) -> usize {
        let inner = self.inner.borrow();
        inner.reads_keyed.len() + inner.reads_by_node.len()
    }

    /// Pending write tasks (key-addressed plus identity-addressed).
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        let inner = self.inner.borrow();
        inner.writes_keyed.len() + inner.writes_by_node.len()
    }

    /// Flushes performed since construction (monotonic).
    #[must_use]
    pub fn frames_flushed(&self) -> u64 {
        self.inner.borrow().frames_flushed
    }

    /// Tasks executed across all flushes (monotonic).
    #[must_use]
    pub fn tasks_executed(&self) -> u64 {
        self.inner.borrow().tasks_executed
    }

    /// Drop all pending work, waiters, and the scheduled flag.
    ///
    /// Teardown entry point for tests and host shutdown. Outstanding
    /// [`FlushSignal`]s will never complete.
    pub fn reset(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.reads_keyed.clear();
        inner.writes_keyed.clear();
        inner.reads_by_node.clear();
        inner.writes_by_node.clear();
        inner.waiters.clear();
        inner.scheduled = false;
    }

    /// Execute one flush: the host's paint-opportunity tick.
    ///
    /// Clears the scheduled flag first (so tasks may request a future
    /// tick), snapshots and clears every pending collection, then runs
    /// key-addressed reads in insertion order, identity-addressed reads,
    /// key-addressed writes in insertion order, and identity-addressed
    /// writes. Tasks registered while the flush executes land in fresh
    /// collections and run in a later flush.
    ///
    /// # Panics
    ///
    /// Re-raises the first panic from a task after both phases complete.
    pub fn run_frame(&self) -> FlushStats {
        let (reads, writes, waiters) = {
            let mut inner = self.inner.borrow_mut();
            if inner.flushing {
                warn!(
                    target: "weft.frame",
                    "run_frame called during an active flush; ignoring"
                );
                return FlushStats::default();
            }
            inner.flushing = true;
            inner.scheduled = false;

            let mut reads: Vec<Task> = inner.reads_keyed.drain(..).map(|e| e.task).collect();
            reads.extend(inner.reads_by_node.drain().map(|(_, task)| task));
            let mut writes: Vec<Task> = inner.writes_keyed.drain(..).map(|e| e.task).collect();
            writes.extend(inner.writes_by_node.drain().map(|(_, task)| task));
            let waiters = std::mem::take(&mut inner.waiters);
            (reads, writes, waiters)
        };

        if reads.is_empty() && writes.is_empty() && waiters.is_empty() {
            self.inner.borrow_mut().flushing = false;
            return FlushStats::default();
        }

        let stats = FlushStats {
            reads: reads.len(),
            writes: writes.len(),
        };
        let start = Instant::now();
        let _span = info_span!(
            "frame.flush",
            reads = stats.reads as u64,
            writes = stats.writes as u64,
            duration_us = tracing::field::Empty
        )
        .entered();

        let mut first_panic: Option<Box<dyn std::any::Any + Send>> = None;
        run_phase(reads, &mut first_panic);
        run_phase(writes, &mut first_panic);

        {
            let mut inner = self.inner.borrow_mut();
            inner.flushing = false;
            inner.frames_flushed += 1;
            inner.tasks_executed += (stats.reads + stats.writes) as u64;
        }
        for waiter in waiters {
            waiter.set(true);
        }

        let duration_us = start.elapsed().as_micros() as u64;
        tracing::Span::current().record("duration_us", duration_us);
        debug!(
            target: "weft.frame",
            reads = stats.reads,
            writes = stats.writes,
            duration_us,
            "frame flush"
        );

        if let Some(payload) = first_panic {
            resume_unwind(payload);
        }
        stats
    }

    /// Flip the scheduled flag and cue the host exactly once per
    /// idle-to-scheduled transition.
    fn note_scheduled(&self) {
        let requester = {
            let mut inner = self.inner.borrow_mut();
            if inner.scheduled {
                None
            } else {
                inner.scheduled = true;
                inner.frame_requester.clone()
            }
        };
        if let Some(requester) = requester {
            requester();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
