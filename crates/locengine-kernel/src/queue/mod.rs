//! Single-worker command queue.
//!
//! A [`CommandQueue`] owns a piece of state `S` on one dedicated thread and
//! executes submitted [`Command`]s against it strictly in submission order.
//! Any thread may enqueue; only the worker ever touches `S`, so the state
//! needs no lock of its own.
//!
//! ```rust,ignore
//! let queue = CommandQueue::spawn("loc-engine", Vec::<u32>::new(), Handle::current())?;
//! let handle = queue.handle();
//! handle.enqueue(Command::new("push", |v: &mut Vec<u32>, _| v.push(1)))?;
//! assert_eq!(handle.query(|v| v.len())?, 1);
//! let state = queue.shutdown()?;
//! ```
//!
//! Delayed commands are timed on a tokio runtime and then enqueued like any
//! other. There is no cancellation. A command that may go stale captures an
//! [`EpochTicket`] at enqueue time and is skipped if the epoch moved on.

mod metrics;

pub use metrics::{QueueCounters, QueueMetrics};

use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

/// Errors returned by queue operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QueueError {
    #[error("command queue is closed")]
    Closed,

    /// A blocking call was made from the worker thread, which would deadlock.
    #[error("blocking queue call made from the worker thread")]
    Reentrant,

    #[error("failed to spawn queue thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("queue worker panicked")]
    WorkerPanicked,
}

type Job<S> = Box<dyn FnOnce(&mut S, &QueueHandle<S>) + Send>;

/// A unit of work plus a diagnostic description.
pub struct Command<S> {
    description: String,
    guard: Option<EpochTicket>,
    run: Job<S>,
}

impl<S> Command<S> {
    pub fn new<F>(description: impl Into<String>, run: F) -> Self
    where
        F: FnOnce(&mut S, &QueueHandle<S>) + Send + 'static,
    {
        Self {
            description: description.into(),
            guard: None,
            run: Box::new(run),
        }
    }

    /// Builds a command that is skipped if `ticket` is stale when it runs.
    pub fn guarded<F>(description: impl Into<String>, ticket: EpochTicket, run: F) -> Self
    where
        F: FnOnce(&mut S, &QueueHandle<S>) + Send + 'static,
    {
        Self {
            description: description.into(),
            guard: Some(ticket),
            run: Box::new(run),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl<S> fmt::Debug for Command<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("description", &self.description)
            .field("guarded", &self.guard.is_some())
            .finish()
    }
}

enum Envelope<S> {
    Run(Command<S>),
    Stop,
}

// ----------------------------------------------------------------------------
// Staleness
// ----------------------------------------------------------------------------

/// Monotonic generation counter. Advancing it makes every outstanding
/// ticket stale.
#[derive(Debug, Clone, Default)]
pub struct Epoch(Arc<AtomicU64>);

impl Epoch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> EpochTicket {
        EpochTicket {
            epoch: Arc::clone(&self.0),
            captured: self.0.load(Ordering::Acquire),
        }
    }

    pub fn advance(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }
}

/// Snapshot of an [`Epoch`] taken at enqueue time.
#[derive(Debug, Clone)]
pub struct EpochTicket {
    epoch: Arc<AtomicU64>,
    captured: u64,
}

impl EpochTicket {
    pub fn is_current(&self) -> bool {
        self.epoch.load(Ordering::Acquire) == self.captured
    }
}

// ----------------------------------------------------------------------------
// Handle
// ----------------------------------------------------------------------------

struct Shared {
    name: String,
    worker: OnceLock<ThreadId>,
    closed: AtomicBool,
    counters: QueueCounters,
    timers: Handle,
}

/// Cloneable submission side of a [`CommandQueue`].
pub struct QueueHandle<S> {
    tx: Sender<Envelope<S>>,
    shared: Arc<Shared>,
}

impl<S> Clone for QueueHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S> fmt::Debug for QueueHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueHandle")
            .field("name", &self.shared.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S> QueueHandle<S> {
    pub fn on_worker(&self) -> bool {
        self.shared.worker.get() == Some(&thread::current().id())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> QueueMetrics {
        self.shared.counters.snapshot()
    }
}

impl<S: Send + 'static> QueueHandle<S> {
    /// Hands `command` to the worker without blocking.
    pub fn enqueue(&self, command: Command<S>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.tx
            .send(Envelope::Run(command))
            .map_err(|_| QueueError::Closed)?;
        self.shared.counters.inc_enqueued();
        Ok(())
    }

    /// Enqueues `command` once `delay` has elapsed, without blocking the
    /// caller or the worker. The timer runs on the queue's tokio runtime.
    pub fn enqueue_after(&self, delay: Duration, command: Command<S>) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        let handle = self.clone();
        self.shared.timers.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = handle.enqueue(command) {
                debug!(error = %err, "delayed command dropped");
            }
        });
        Ok(())
    }

    /// Runs `f` on the worker and blocks until it returns.
    ///
    /// Every command enqueued before this call has completed by the time it
    /// returns. Calling it from the worker thread is refused.
    pub fn query<R, F>(&self, f: F) -> Result<R, QueueError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.on_worker() {
            return Err(QueueError::Reentrant);
        }
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.enqueue(Command::new("query", move |state: &mut S, _| {
            let _ = reply_tx.send(f(state));
        }))?;
        reply_rx.recv().map_err(|_| QueueError::Closed)
    }

    /// Blocks until every previously enqueued command has run.
    pub fn flush(&self) -> Result<(), QueueError> {
        self.query(|_| ())
    }
}

// ----------------------------------------------------------------------------
// Queue
// ----------------------------------------------------------------------------

/// Owner of the worker thread.
pub struct CommandQueue<S: Send + 'static> {
    handle: QueueHandle<S>,
    worker: Option<JoinHandle<S>>,
}

impl<S: Send + 'static> CommandQueue<S> {
    /// Starts the worker thread named `name`, moving `state` onto it.
    ///
    /// Delayed commands are timed on `timers`.
    pub fn spawn(name: &str, state: S, timers: Handle) -> Result<Self, QueueError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            name: name.to_string(),
            worker: OnceLock::new(),
            closed: AtomicBool::new(false),
            counters: QueueCounters::new(),
            timers,
        });
        let handle = QueueHandle { tx, shared };

        let worker_handle = handle.clone();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(state, rx, worker_handle))
            .map_err(QueueError::Spawn)?;

        debug!(queue = name, "command queue started");
        Ok(Self {
            handle,
            worker: Some(worker),
        })
    }

    pub fn handle(&self) -> QueueHandle<S> {
        self.handle.clone()
    }

    /// Runs what is already queued, stops the worker and returns the state.
    ///
    /// Commands enqueued after this call are refused with
    /// [`QueueError::Closed`].
    pub fn shutdown(mut self) -> Result<S, QueueError> {
        self.stop_and_join().ok_or(QueueError::Reentrant)?
    }

    fn stop_and_join(&mut self) -> Option<Result<S, QueueError>> {
        let worker = self.worker.take()?;
        self.handle.shared.closed.store(true, Ordering::Release);
        let _ = self.handle.tx.send(Envelope::Stop);
        if self.handle.on_worker() {
            // Joining would deadlock; the worker stops after this command.
            warn!(queue = %self.handle.shared.name, "queue dropped on its own worker");
            return None;
        }
        Some(worker.join().map_err(|_| QueueError::WorkerPanicked))
    }
}

impl<S: Send + 'static> Drop for CommandQueue<S> {
    fn drop(&mut self) {
        let _ = self.stop_and_join();
    }
}

fn run_worker<S: Send + 'static>(
    mut state: S,
    rx: Receiver<Envelope<S>>,
    handle: QueueHandle<S>,
) -> S {
    let _ = handle.shared.worker.set(thread::current().id());

    while let Ok(envelope) = rx.recv() {
        let command = match envelope {
            Envelope::Run(command) => command,
            Envelope::Stop => break,
        };
        if let Some(ticket) = &command.guard {
            if !ticket.is_current() {
                trace!(command = %command.description, "skipping stale command");
                handle.shared.counters.inc_skipped_stale();
                continue;
            }
        }
        trace!(command = %command.description, "executing");
        handle.shared.counters.inc_executed();
        (command.run)(&mut state, &handle);
    }

    // Anything that raced past the closed flag is dropped, releasing blocked
    // query callers.
    let dropped = rx.try_iter().count();
    debug!(queue = %handle.shared.name, dropped, "command queue stopped");
    state
}
