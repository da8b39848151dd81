//! In-order command queue backing a context.
//!
//! Dispatches are validated synchronously on the caller's thread, then
//! executed FIFO on a dedicated worker thread; the work-groups of one
//! dispatch run in parallel on the rayon pool. Completion is tracked by a
//! monotonically advancing timeline: ticket `n` retired means dispatches
//! `1..=n` are fully complete, which is what gives `barrier()` its
//! program-order guarantee.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rayon::prelude::*;
use snafu::ensure;
use tracing::{debug, error};

use veld_device::TimelineSignal;

use crate::error::{CancelledSnafu, FaultSnafu, InvalidGridSnafu, OverlappingWritesSnafu, Result};
use crate::grid::{Grid, ResolvedGrid};
use crate::kernel::{Args, GroupCtx, KernelRoutine, WriteSpan};

/// How long a blocking wait sleeps between checks of the cancel and fault
/// flags.
const WAIT_SLICE: Duration = Duration::from_millis(2);

struct Dispatch {
    routine: Arc<dyn KernelRoutine>,
    args: Args,
    grid: ResolvedGrid,
    ticket: u64,
}

/// State shared between the caller side and the worker thread.
struct QueueShared {
    /// Highest retired ticket; FIFO execution makes this a watermark.
    completed: TimelineSignal,
    /// First device fault observed; set once, never cleared.
    fault: Mutex<Option<String>>,
    poisoned: AtomicBool,
    cancelled: AtomicBool,
    /// Declared write spans of every not-yet-retired dispatch.
    inflight: Mutex<Vec<(u64, Vec<WriteSpan>)>>,
}

impl QueueShared {
    fn retire(&self, ticket: u64) {
        self.inflight.lock().retain(|(t, _)| *t != ticket);
        self.completed.advance_to(ticket);
    }

    fn poison(&self, message: String) {
        error!(%message, "device fault, queue poisoned");
        let mut fault = self.fault.lock();
        if fault.is_none() {
            *fault = Some(message);
        }
        self.poisoned.store(true, Ordering::Release);
    }

    fn fault_message(&self) -> Option<String> {
        self.fault.lock().clone()
    }
}

/// An in-order dispatch queue bound to one device context.
pub struct CommandQueue {
    sender: Option<mpsc::Sender<Dispatch>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<QueueShared>,
    submitted: AtomicU64,
}

impl CommandQueue {
    pub(crate) fn new() -> Self {
        let shared = Arc::new(QueueShared {
            completed: TimelineSignal::default(),
            fault: Mutex::new(None),
            poisoned: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            inflight: Mutex::new(Vec::new()),
        });

        let (sender, receiver) = mpsc::channel::<Dispatch>();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("veld-queue".into())
            .spawn(move || worker_loop(receiver, worker_shared))
            .expect("spawn queue worker");

        Self { sender: Some(sender), worker: Some(worker), shared, submitted: AtomicU64::new(0) }
    }

    /// Enqueue one kernel dispatch over `grid`.
    ///
    /// Validation (grid, grouping, write-span overlap) happens here on the
    /// caller's thread; a validation failure enqueues nothing. The call
    /// returns as soon as the dispatch is enqueued.
    pub fn dispatch(
        &self,
        routine: Arc<dyn KernelRoutine>,
        args: Args,
        grid: Grid,
    ) -> Result<()> {
        self.check_health()?;

        let resolved = grid.resolve()?;
        if routine.requires_uniform_groups() {
            ensure!(
                resolved.explicit_grouping,
                InvalidGridSnafu {
                    reason: format!("kernel '{}' requires an explicit group size", routine.name()),
                }
            );
            ensure!(
                resolved.group_size.is_power_of_two(),
                InvalidGridSnafu {
                    reason: format!(
                        "kernel '{}' requires a power-of-two group size, got {}",
                        routine.name(),
                        resolved.group_size
                    ),
                }
            );
        }

        let spans = args.write_spans();
        let ticket = {
            let mut inflight = self.shared.inflight.lock();
            for span in &spans {
                for (_, pending) in inflight.iter() {
                    if let Some(hit) = pending.iter().find(|p| p.overlaps(span)) {
                        return OverlappingWritesSnafu { start: hit.start, end: hit.end }.fail();
                    }
                }
            }
            let ticket = self.submitted.fetch_add(1, Ordering::AcqRel) + 1;
            inflight.push((ticket, spans));
            ticket
        };

        debug!(kernel = routine.name(), ticket, extent = resolved.extent, groups = resolved.group_count, "dispatch");

        let send = self
            .sender
            .as_ref()
            .expect("queue sender lives as long as the queue")
            .send(Dispatch { routine, args, grid: resolved, ticket });
        if send.is_err() {
            // Worker gone; nothing will retire the ticket.
            self.shared.retire(ticket);
            self.shared.poison("queue worker terminated".to_owned());
            return FaultSnafu { message: "queue worker terminated" }.fail();
        }
        Ok(())
    }

    /// Block until every dispatch enqueued before this call has completed.
    ///
    /// Returns the first device fault if one occurred, or `Cancelled` if
    /// `cancel()` was called while waiting.
    pub fn barrier(&self) -> Result<()> {
        let target = self.submitted.load(Ordering::Acquire);
        loop {
            ensure!(!self.shared.cancelled.load(Ordering::Acquire), CancelledSnafu);
            let reached = self.shared.completed.wait_timeout(target, WAIT_SLICE);
            // The fault check must come after the wait: a dispatch can
            // poison the queue and retire inside the same slice, and that
            // fault still belongs to this barrier.
            if let Some(message) = self.shared.fault_message() {
                return FaultSnafu { message }.fail();
            }
            if reached {
                return Ok(());
            }
        }
    }

    /// Abandon outstanding work: queued dispatches are skipped and every
    /// blocked synchronization call returns `Cancelled` promptly.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    fn check_health(&self) -> Result<()> {
        if let Some(message) = self.shared.fault_message() {
            return FaultSnafu { message }.fail();
        }
        ensure!(!self.shared.cancelled.load(Ordering::Acquire), CancelledSnafu);
        Ok(())
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("submitted", &self.submitted.load(Ordering::Relaxed))
            .field("completed", &self.shared.completed.value())
            .field("poisoned", &self.shared.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

fn worker_loop(receiver: mpsc::Receiver<Dispatch>, shared: Arc<QueueShared>) {
    while let Ok(dispatch) = receiver.recv() {
        let skip = shared.poisoned.load(Ordering::Acquire)
            || shared.cancelled.load(Ordering::Acquire);
        if !skip {
            let Dispatch { ref routine, ref args, grid, .. } = dispatch;
            // A panicking routine must not take the worker thread down;
            // the ticket below still has to retire or barriers hang.
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (0..grid.group_count).into_par_iter().try_for_each(|gid| {
                    let mut group = GroupCtx::new(args, grid, gid);
                    routine.run_group(&mut group)
                })
            }));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => shared.poison(err.to_string()),
                Err(payload) => shared.poison(panic_message(routine.name(), payload)),
            }
        }
        // Retire even when skipped or faulted so waiters unblock and see
        // the flag instead of hanging.
        shared.retire(dispatch.ticket);
    }
}

fn panic_message(kernel: &str, payload: Box<dyn std::any::Any + Send>) -> String {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    };
    format!("kernel '{kernel}' panicked: {detail}")
}
