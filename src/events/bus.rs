//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. Every process in a
//! procvisor tree has its own bus: the pool, the worker supervisors and any
//! command worker hosted in that process publish to it.
//!
//! ```text
//! Publishers (many):                       Listener (one):
//!   pool ──────────┐
//!   actor 1..N ────┼──────► Bus ───────► event listener ────► SubscriberSet
//!   command worker ┘  (broadcast chan)   (in Supervisor)
//! ```
//!
//! ## Rules
//! - `publish()` never blocks.
//! - One ring buffer of `capacity` events is shared by all receivers; laggards
//!   observe `RecvError::Lagged(n)` and skip `n` events.
//! - Events sent while nobody listens are lost.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus; `capacity` is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new(1024)
    }
}
