//! # Runtime events emitted by the pool, the worker supervisors and command workers.
//!
//! [`EventKind`] classifies events in four groups:
//! - **Subscriber events**: fan-out health (overflow, panics)
//! - **Pool events**: startup sequence, progress, shutdown drain
//! - **Worker lifecycle**: starting, ready, stopped, failed, restarts
//! - **Command events**: per-command outcome on a command worker
//!
//! ## Ordering guarantees
//! Each event has a process-wide sequence number (`seq`) that increases monotonically.
//! Events from different processes are not ordered against each other.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_worker("command_processor_0")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_secs(1));
//!
//! assert_eq!(ev.worker.as_deref(), Some("command_processor_0"));
//! assert_eq!(ev.delay_ms, Some(1000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked while handling an event.
    ///
    /// Sets: `worker` (subscriber name), `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or closed).
    ///
    /// Sets: `worker` (subscriber name), `reason`.
    SubscriberOverflow,

    // === Pool events ===
    /// The pool is about to prepare its workers.
    ///
    /// Sets: `attempt` (number of descriptions).
    WorkersStarting,

    /// Every description was prepared; the "all started" callback runs next.
    AllStarted,

    /// A worker instance finished; lists what finished and what keeps working.
    ///
    /// Sets: `worker` (finished instance), `reason` (`finished=[..] working=[..]`),
    /// `attempt` (completion counter).
    PoolProgress,

    /// Shutdown was observed by the pool.
    ShutdownRequested,

    /// All workers stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; daemon workers were terminated.
    ///
    /// Sets: `reason` (stuck worker names).
    GraceExceeded,

    // === Worker lifecycle ===
    /// A worker instance is being spawned.
    ///
    /// Sets: `worker`, `attempt` (1-based start counter of this description).
    WorkerStarting,

    /// The instance signalled readiness.
    ///
    /// Sets: `worker`, `attempt`.
    WorkerReady,

    /// The instance failed before signalling readiness; a new start is scheduled.
    ///
    /// Sets: `worker`, `attempt`, `reason`, `delay_ms`.
    StartupFailed,

    /// The instance finished cleanly or on a shutdown request.
    ///
    /// Sets: `worker`, `attempt`.
    WorkerStopped,

    /// The running instance finished with an error.
    ///
    /// Sets: `worker`, `attempt`, `reason`.
    WorkerFailed,

    /// The description will be started again after `delay_ms`.
    ///
    /// Sets: `worker`, `attempt` (finished attempt), `delay_ms`.
    RestartScheduled,

    /// The description will not be started again.
    ///
    /// Sets: `worker`, `attempt` (last attempt), `reason`.
    WorkerRetired,

    // === Command events ===
    /// A command finished and its result was published.
    ///
    /// Sets: `worker`, `command`, `call_id` (if any), `elapsed_ms`.
    CommandHandled,

    /// A command finished with an error.
    ///
    /// Sets: `worker`, `command`, `call_id` (if any), `elapsed_ms`, `reason`.
    CommandFailed,

    /// A middleware stopped a command before execution.
    ///
    /// Sets: `worker`, `command`, `call_id` (if any), `reason` (middleware name).
    CommandRejected,
}

/// Runtime event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Monotonic process-wide sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Worker (or subscriber/channel) name.
    pub worker: Option<Arc<str>>,
    /// Attempt or counter, see [`EventKind`].
    pub attempt: Option<u32>,
    /// Delay before the next start in milliseconds.
    pub delay_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Command kind.
    pub command: Option<Arc<str>>,
    /// Correlation id of a command call.
    pub call_id: Option<Arc<str>>,
    /// Command execution time in milliseconds.
    pub elapsed_ms: Option<u32>,
}

impl Event {
    /// Creates an event of the given kind stamped with the current time and the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            worker: None,
            attempt: None,
            delay_ms: None,
            reason: None,
            command: None,
            call_id: None,
            elapsed_ms: None,
        }
    }

    #[inline]
    pub fn with_worker(mut self, worker: impl Into<Arc<str>>) -> Self {
        self.worker = Some(worker.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(clamp_ms(d));
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_command(mut self, kind: impl Into<Arc<str>>) -> Self {
        self.command = Some(kind.into());
        self
    }

    /// Attaches a call id; `None` (fire-and-forget) leaves the field empty.
    #[inline]
    pub fn with_call_id(mut self, call_id: Option<impl ToString>) -> Self {
        self.call_id = call_id.map(|id| Arc::from(id.to_string()));
        self
    }

    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(clamp_ms(d));
        self
    }

    /// Creates a subscriber overflow event.
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_worker(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_worker(subscriber)
            .with_reason(info)
    }
}

fn clamp_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
