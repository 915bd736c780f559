//! Per-instance context handed to [`Worker::run`](crate::Worker::run).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::events::Bus;
use crate::shutdown::ShutdownSignal;

/// What a running worker instance can see of its supervisor.
#[derive(Clone)]
pub struct WorkerContext {
    name: Arc<str>,
    attempt: u32,
    shutdown: ShutdownSignal,
    ready: ReadySignal,
    events: Bus,
}

impl WorkerContext {
    pub(crate) fn new(
        name: Arc<str>,
        attempt: u32,
        shutdown: ShutdownSignal,
        ready: ReadySignal,
        events: Bus,
    ) -> Self {
        Self {
            name,
            attempt,
            shutdown,
            ready,
            events,
        }
    }

    /// Worker name as declared in its description.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 1-based start counter of this description.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The process tree's shutdown signal.
    pub fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Readiness notification; call once startup is complete.
    pub fn ready(&self) -> &ReadySignal {
        &self.ready
    }

    /// The event bus of the process hosting this instance.
    pub fn events(&self) -> &Bus {
        &self.events
    }
}

/// One-shot "started" notification of a worker instance.
///
/// The first [`notify`](ReadySignal::notify) is forwarded to the supervisor,
/// locally for threads or over the broker connection for processes. Later calls
/// do nothing.
#[derive(Clone)]
pub struct ReadySignal {
    inner: Arc<ReadyInner>,
}

struct ReadyInner {
    fired: AtomicBool,
    sink: Box<dyn Fn() + Send + Sync>,
}

impl ReadySignal {
    pub(crate) fn new(sink: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(ReadyInner {
                fired: AtomicBool::new(false),
                sink: Box::new(sink),
            }),
        }
    }

    /// Signals that the worker is ready.
    pub fn notify(&self) {
        if !self.inner.fired.swap(true, Ordering::AcqRel) {
            (self.inner.sink)();
        }
    }

    /// Whether [`notify`](ReadySignal::notify) was called.
    pub fn is_notified(&self) -> bool {
        self.inner.fired.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn ready_forwards_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let ready = ReadySignal::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!ready.is_notified());
        ready.notify();
        ready.clone().notify();
        assert!(ready.is_notified());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
