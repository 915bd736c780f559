//! Worker declarations and instance launching.
//!
//! - [`Worker`], [`WorkerFn`], [`WorkerRef`] the entry function of a worker
//! - [`WorkerContext`], [`ReadySignal`] what a running instance can see
//! - [`WorkerDescription`], [`WorkerKind`] the immutable declaration handed to the pool
//! - `launcher` (crate-internal) starts threads and processes

mod context;
mod description;
pub(crate) mod launcher;
mod worker;

pub use context::{ReadySignal, WorkerContext};
pub use description::{WorkerDescription, WorkerKind};
pub use worker::{Worker, WorkerFn, WorkerRef};
