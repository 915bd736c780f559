//! # Shared channel: the call queue and the result list.
//!
//! [`SharedChannel`] is the capability a command bus and its workers share:
//!
//! ```text
//! callers ──enqueue──► [ call queue (FIFO) ] ──dequeue(wait)──► worker 1..N
//! callers ◄─wait_result(call_id)── [ result list + condition ] ◄──publish── worker
//! ```
//!
//! - [`LocalChannel`] is the in-memory implementation. It lives in the
//!   orchestrating process (owned by the broker) and is used directly by thread
//!   workers; worker processes reach it through a remote proxy.
//! - The result list is guarded by a single lock; `publish` notifies every
//!   waiter and each waiter re-checks its own predicate ("is my call_id there").
//! - `wait_result` removes the entry it returns, so a result is consumed once.
//! - Unclaimed results (their caller timed out) are dropped after `result_ttl`,
//!   and the oldest are dropped once more than `max_pending_results` pile up.
//!   A result whose caller is still waiting is never dropped.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tracing::warn;

use crate::commands::command::{CallEnvelope, CallId, ResultEnvelope};
use crate::error::ChannelError;
use crate::settings::Settings;

/// Queue and result-list operations shared by callers and command workers.
#[async_trait]
pub trait SharedChannel: Send + Sync + 'static {
    /// Appends a call to the queue.
    async fn enqueue(&self, envelope: CallEnvelope) -> Result<(), ChannelError>;

    /// Pops the oldest call, waiting at most `wait` for one to arrive.
    async fn dequeue(&self, wait: Duration) -> Result<Option<CallEnvelope>, ChannelError>;

    /// Appends a result and wakes every waiter.
    async fn publish(&self, result: ResultEnvelope) -> Result<(), ChannelError>;

    /// Waits until the result of `call_id` is published, then removes and returns it.
    ///
    /// `None` timeout waits forever; `Ok(None)` means the timeout elapsed.
    async fn wait_result(
        &self,
        call_id: CallId,
        timeout: Option<Duration>,
    ) -> Result<Option<ResultEnvelope>, ChannelError>;

    /// Number of results nobody has claimed yet.
    async fn pending_results(&self) -> Result<usize, ChannelError>;
}

/// Retention bounds of the result list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Unclaimed results older than this are dropped.
    pub result_ttl: Duration,
    /// At most this many unclaimed results are kept (min 1).
    pub max_pending_results: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            result_ttl: Duration::from_secs(60),
            max_pending_results: 1024,
        }
    }
}

impl ChannelOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            result_ttl: settings.result_ttl(),
            max_pending_results: settings.max_pending_results,
        }
    }
}

/// In-memory shared channel.
pub struct LocalChannel {
    name: String,
    tx: mpsc::UnboundedSender<CallEnvelope>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<CallEnvelope>>,
    results: Condition<ResultStore>,
}

impl std::fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChannel").field("name", &self.name).finish()
    }
}

impl LocalChannel {
    pub fn new(name: impl Into<String>, options: ChannelOptions) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            name: name.into(),
            tx,
            rx: AsyncMutex::new(rx),
            results: Condition::new(ResultStore::new(options)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl SharedChannel for LocalChannel {
    async fn enqueue(&self, envelope: CallEnvelope) -> Result<(), ChannelError> {
        self.tx.send(envelope).map_err(|_| ChannelError::Disconnected)
    }

    async fn dequeue(&self, wait: Duration) -> Result<Option<CallEnvelope>, ChannelError> {
        let pop = async { self.rx.lock().await.recv().await };
        match tokio::time::timeout(wait, pop).await {
            Ok(Some(envelope)) => Ok(Some(envelope)),
            Ok(None) => Err(ChannelError::Disconnected),
            Err(_) => Ok(None),
        }
    }

    async fn publish(&self, result: ResultEnvelope) -> Result<(), ChannelError> {
        let purged = self.results.update(|store| store.insert(result, Instant::now()));
        if purged > 0 {
            warn!(channel = %self.name, purged, "unclaimed results dropped");
        }
        Ok(())
    }

    async fn wait_result(
        &self,
        call_id: CallId,
        timeout: Option<Duration>,
    ) -> Result<Option<ResultEnvelope>, ChannelError> {
        let _watch = Watch::new(&self.results, call_id);
        Ok(self.results.wait_for(|store| store.take(&call_id), timeout).await)
    }

    async fn pending_results(&self) -> Result<usize, ChannelError> {
        Ok(self.results.with(|store| store.len()))
    }
}

/// A lock-guarded value plus a notification that fires on every update.
pub(crate) struct Condition<T> {
    state: Mutex<T>,
    changed: Notify,
}

impl<T> Condition<T> {
    pub(crate) fn new(state: T) -> Self {
        Self {
            state: Mutex::new(state),
            changed: Notify::new(),
        }
    }

    /// Mutates the state under the lock and wakes all waiters.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let out = f(&mut self.state.lock());
        self.changed.notify_waiters();
        out
    }

    /// Reads the state under the lock without notifying.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.state.lock())
    }

    /// Waits until `pred` yields a value or `timeout` elapses.
    ///
    /// The predicate runs under the lock, once up front and after every update.
    pub(crate) async fn wait_for<R>(
        &self,
        mut pred: impl FnMut(&mut T) -> Option<R>,
        timeout: Option<Duration>,
    ) -> Option<R> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(found) = self.with(&mut pred) {
                return Some(found);
            }
            match deadline {
                Some(deadline) if tokio::time::Instant::now() >= deadline => return None,
                Some(deadline) => {
                    let _ = tokio::time::timeout_at(deadline, notified).await;
                }
                None => notified.await,
            }
        }
    }
}

/// Marks `call_id` as awaited for as long as it lives.
struct Watch<'a> {
    results: &'a Condition<ResultStore>,
    call_id: CallId,
}

impl<'a> Watch<'a> {
    fn new(results: &'a Condition<ResultStore>, call_id: CallId) -> Self {
        results.with(|store| store.watch(call_id));
        Self { results, call_id }
    }
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        self.results.with(|store| store.unwatch(&self.call_id));
    }
}

/// Results keyed by call id, with insertion order for retention.
pub(crate) struct ResultStore {
    entries: HashMap<CallId, StoredResult>,
    order: BTreeMap<u64, CallId>,
    watched: HashMap<CallId, usize>,
    next_seq: u64,
    options: ChannelOptions,
}

struct StoredResult {
    seq: u64,
    stored_at: Instant,
    envelope: ResultEnvelope,
}

impl ResultStore {
    pub(crate) fn new(options: ChannelOptions) -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
            watched: HashMap::new(),
            next_seq: 0,
            options,
        }
    }

    /// Stores a result; returns how many stale results were dropped.
    pub(crate) fn insert(&mut self, envelope: ResultEnvelope, now: Instant) -> usize {
        let mut purged = self.purge_expired(now);

        let seq = self.next_seq;
        self.next_seq += 1;
        let call_id = envelope.call_id;
        let previous = self.entries.insert(
            call_id,
            StoredResult {
                seq,
                stored_at: now,
                envelope,
            },
        );
        if let Some(previous) = previous {
            self.order.remove(&previous.seq);
        }
        self.order.insert(seq, call_id);

        let cap = self.options.max_pending_results.max(1);
        while self.entries.len() > cap {
            let Some(seq) = self.oldest_unwatched(|_| true) else {
                break;
            };
            self.remove_seq(seq);
            purged += 1;
        }
        purged
    }

    /// Registers a caller waiting for `call_id`.
    pub(crate) fn watch(&mut self, call_id: CallId) {
        *self.watched.entry(call_id).or_default() += 1;
    }

    pub(crate) fn unwatch(&mut self, call_id: &CallId) {
        if let Some(n) = self.watched.get_mut(call_id) {
            *n -= 1;
            if *n == 0 {
                self.watched.remove(call_id);
            }
        }
    }

    /// Removes and returns the result of `call_id`.
    pub(crate) fn take(&mut self, call_id: &CallId) -> Option<ResultEnvelope> {
        let stored = self.entries.remove(call_id)?;
        self.order.remove(&stored.seq);
        Some(stored.envelope)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let ttl = self.options.result_ttl;
        let mut purged = 0;
        while let Some(seq) =
            self.oldest_unwatched(|e| now.saturating_duration_since(e.stored_at) >= ttl)
        {
            self.remove_seq(seq);
            purged += 1;
        }
        purged
    }

    /// Oldest result nobody waits for, as long as `eligible` holds in insertion order.
    fn oldest_unwatched(&self, eligible: impl Fn(&StoredResult) -> bool) -> Option<u64> {
        for (&seq, call_id) in &self.order {
            let Some(entry) = self.entries.get(call_id) else {
                return Some(seq);
            };
            if !eligible(entry) {
                return None;
            }
            if !self.watched.contains_key(call_id) {
                return Some(seq);
            }
        }
        None
    }

    fn remove_seq(&mut self, seq: u64) {
        if let Some(call_id) = self.order.remove(&seq) {
            self.entries.remove(&call_id);
        }
    }
}
