//! # Execution contexts of a command worker.
//!
//! A [`CommandHost`] builds the two contexts commands run against:
//! - the **global** context, once per worker instance at startup (load a model,
//!   open a pool); a failure here is a startup failure of the worker;
//! - a **local** context per command, derived from the global one and the
//!   middleware results, and scoped around exactly one execution.
//!
//! ```text
//! create_global ─► GlobalSetup { global, middleware selector? } ─► ready
//! per command:
//!   create_local(global, results) ─► local.enter() ─► execute ─► local.exit()
//!                                                         (exit on every path)
//! ```

use async_trait::async_trait;

use crate::commands::middleware::{MiddlewareResults, MiddlewareSelector};
use crate::error::{CommandError, WorkerError};
use crate::workers::WorkerContext;

/// Factory of the global and local execution contexts.
#[async_trait]
pub trait CommandHost: Sized + Send + Sync + 'static {
    /// Per-instance state, read-only after construction.
    type Global: Send + Sync + 'static;
    /// Per-command state.
    type Local: Scope;

    /// Builds the global context. Runs once per worker instance.
    async fn create_global(&self, ctx: &WorkerContext) -> Result<GlobalSetup<Self>, WorkerError>;

    /// Builds the local context of one command.
    async fn create_local(
        &self,
        global: &Self::Global,
        results: &MiddlewareResults,
    ) -> Result<Self::Local, CommandError>;
}

/// Result of [`CommandHost::create_global`].
pub struct GlobalSetup<H: CommandHost> {
    pub global: H::Global,
    pub middleware: Option<MiddlewareSelector<H>>,
}

impl<H: CommandHost> GlobalSetup<H> {
    pub fn new(global: H::Global) -> Self {
        Self {
            global,
            middleware: None,
        }
    }

    /// Installs a selector mapping a command kind to its middleware chain.
    pub fn with_middleware(mut self, selector: MiddlewareSelector<H>) -> Self {
        self.middleware = Some(selector);
        self
    }
}

/// A resource scope entered before and exited after one command.
///
/// `exit` runs whenever `enter` succeeded, whether the command returned a value,
/// an error or panicked.
#[async_trait]
pub trait Scope: Send + 'static {
    async fn enter(&mut self) -> Result<(), CommandError> {
        Ok(())
    }

    async fn exit(&mut self) {}
}

impl Scope for () {}
