//! # Process-tree-wide shutdown flag.
//!
//! [`ShutdownSignal`] is a boolean that is set once per run and observed by
//! every worker loop. It offers three ways to observe it:
//! - [`ShutdownSignal::is_set`] a cheap poll;
//! - [`ShutdownSignal::wait`] a blocking wait for plain OS threads;
//! - [`ShutdownSignal::cancelled`] an async wait for event loops.
//!
//! ## Crossing process boundaries
//! The signal handed out by [`SharedManager`](crate::SharedManager) is mirrored
//! over the broker connection:
//! ```text
//! parent.set() ──► broker ──► Shutdown event ──► child.set_local()
//! child.set()  ──► relay ──► Shutdown request ──► parent.set() ──► every child
//! ```
//! A child that loses its broker connection sets its local flag.
//!
//! ## Rules
//! - `set()` is idempotent; the relay fires at most once.
//! - All waiters wake once the flag is set; wake-up order is unspecified.
//! - The flag is never reset.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

type Relay = Box<dyn Fn() + Send + Sync>;

/// Cooperative, cloneable shutdown flag with blocking and async waits.
#[derive(Clone)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

struct Inner {
    token: CancellationToken,
    flag: Mutex<bool>,
    cond: Condvar,
    relay: OnceLock<Relay>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("set", &self.is_set())
            .finish()
    }
}

impl ShutdownSignal {
    /// Creates an unset, process-local signal.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                token: CancellationToken::new(),
                flag: Mutex::new(false),
                cond: Condvar::new(),
                relay: OnceLock::new(),
            }),
        }
    }

    /// Returns whether shutdown was requested.
    pub fn is_set(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Requests shutdown. Safe to call any number of times from any holder.
    pub fn set(&self) {
        if self.set_local() {
            if let Some(relay) = self.inner.relay.get() {
                relay();
            }
        }
    }

    /// Blocks the calling thread until the signal is set or `timeout` elapses.
    ///
    /// Returns whether the signal is set. Do not call from an async context;
    /// use [`ShutdownSignal::cancelled`] there.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut flag = self.inner.flag.lock();
        while !*flag {
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut flag, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.cond.wait(&mut flag),
            }
        }
        *flag
    }

    /// Completes once the signal is set.
    pub async fn cancelled(&self) {
        self.inner.token.cancelled().await
    }

    /// A token that is cancelled together with this signal.
    pub fn token(&self) -> CancellationToken {
        self.inner.token.clone()
    }

    /// Sets the flag without relaying. Returns `true` on the first transition.
    pub(crate) fn set_local(&self) -> bool {
        let mut flag = self.inner.flag.lock();
        if *flag {
            return false;
        }
        *flag = true;
        self.inner.token.cancel();
        self.inner.cond.notify_all();
        true
    }

    /// Installs the hook that forwards a local `set()` to the rest of the process tree.
    pub(crate) fn set_relay(&self, relay: impl Fn() + Send + Sync + 'static) {
        let _ = self.inner.relay.set(Box::new(relay));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn set_is_idempotent_and_relays_once() {
        let sig = ShutdownSignal::new();
        let relayed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&relayed);
        sig.set_relay(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!sig.is_set());
        sig.set();
        sig.set();
        sig.clone().set();
        assert!(sig.is_set());
        assert_eq!(relayed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn local_set_does_not_relay() {
        let sig = ShutdownSignal::new();
        let relayed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&relayed);
        sig.set_relay(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sig.set_local());
        assert!(!sig.set_local());
        assert_eq!(relayed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wait_times_out_when_unset() {
        let sig = ShutdownSignal::new();
        let started = Instant::now();
        assert!(!sig.wait(Some(Duration::from_millis(50))));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn all_blocking_waiters_wake() {
        let sig = ShutdownSignal::new();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let s = sig.clone();
                std::thread::spawn(move || s.wait(None))
            })
            .collect();
        std::thread::sleep(Duration::from_millis(20));
        sig.set();
        for w in waiters {
            assert!(w.join().unwrap());
        }
    }

    #[tokio::test]
    async fn async_waiters_wake() {
        let sig = ShutdownSignal::new();
        let s = sig.clone();
        let waiter = tokio::spawn(async move { s.cancelled().await });
        sig.set();
        waiter.await.unwrap();
        assert!(sig.wait(Some(Duration::ZERO)));
    }
}
