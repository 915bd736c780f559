//! Cross-process plumbing.
//!
//! ```text
//! orchestrator                                 worker process (re-executed host)
//! SharedManager::start() ─► Broker ◄── unix socket ──► Client ◄─ SharedManager::start()
//!   BrokerState                                          RemoteChannel (SharedChannel)
//!     channels: name ─► LocalChannel                      ShutdownSignal mirror + relay
//!     startups: (worker, attempt) ─► StartupSlot
//! ```
//!
//! Only [`SharedManager`] is public; the wire format is internal.

mod broker;
mod client;
mod manager;
mod wire;

pub use manager::SharedManager;

/// Path of the broker socket, set for worker processes.
pub const ENV_SOCKET: &str = "PROCVISOR_IPC_SOCKET";
/// Name of the worker a worker process hosts.
pub const ENV_WORKER: &str = "PROCVISOR_IPC_WORKER";
/// Start counter of the hosted worker instance.
pub const ENV_ATTEMPT: &str = "PROCVISOR_IPC_ATTEMPT";
