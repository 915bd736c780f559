//! # Worker abstraction and function-backed implementation.
//!
//! A [`Worker`] is the entry function of a supervised unit. It receives a
//! [`WorkerContext`], must call [`ReadySignal::notify`](crate::ReadySignal::notify)
//! once it is genuinely ready (socket bound, model loaded), and should return
//! when the shutdown signal is set.
//!
//! [`WorkerFn`] wraps a closure `F: Fn(WorkerContext) -> Fut` producing a fresh
//! future per start, so restarts never share hidden state.
//!
//! ## Example
//! ```rust
//! use procvisor::{WorkerContext, WorkerError, WorkerFn, WorkerRef};
//!
//! let w: WorkerRef = WorkerFn::arc("heartbeat", |ctx: WorkerContext| async move {
//!     ctx.ready().notify();
//!     ctx.shutdown().cancelled().await;
//!     Ok::<_, WorkerError>(())
//! });
//! assert_eq!(w.name(), "heartbeat");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::workers::context::WorkerContext;

/// Entry function of a supervised worker.
#[async_trait]
pub trait Worker: Send + Sync + 'static {
    /// Stable, human-readable name.
    fn name(&self) -> &str;

    /// Runs one instance until it finishes or shutdown is requested.
    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError>;
}

/// Shared handle to a worker.
pub type WorkerRef = Arc<dyn Worker>;

/// Function-backed worker.
#[derive(Debug)]
pub struct WorkerFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkerFn<F> {
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the worker and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F, Fut> Worker for WorkerFn<F>
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        (self.f)(ctx).await
    }
}
