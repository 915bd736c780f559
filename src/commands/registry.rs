//! # Command registry.
//!
//! Maps a command's stable `KIND` to a type-erased handler that decodes the
//! payload, runs [`Command::execute`] and encodes the output. Built once at
//! startup and shared (cheaply cloned) by the bus and its workers.
//!
//! ```text
//! CommandRegistry::new()
//!     .register::<Echo>()        "echo"  ─► decode Echo ─► execute ─► to_value(Output)
//!     .register::<Sleep>()       "sleep" ─► ...
//! ```
//!
//! Registering the same kind twice keeps the last handler.

use std::collections::HashMap;
use std::fmt;

use futures::future::BoxFuture;

use crate::commands::command::{Command, RawCommand};
use crate::commands::context::CommandHost;
use crate::error::CommandError;

pub(crate) type Handler<H> = for<'a> fn(
    &'a RawCommand,
    &'a <H as CommandHost>::Global,
    &'a mut <H as CommandHost>::Local,
) -> BoxFuture<'a, Result<serde_json::Value, CommandError>>;

/// Kind → handler table of host `H`.
pub struct CommandRegistry<H: CommandHost> {
    handlers: HashMap<&'static str, Handler<H>>,
}

impl<H: CommandHost> Clone for CommandRegistry<H> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
        }
    }
}

impl<H: CommandHost> Default for CommandRegistry<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<H: CommandHost> fmt::Debug for CommandRegistry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl<H: CommandHost> CommandRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `C` under `C::KIND`.
    pub fn register<C: Command<H>>(mut self) -> Self {
        self.handlers.insert(C::KIND, run_command::<H, C>);
        self
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&'static str> {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        kinds
    }

    pub(crate) fn handler(&self, kind: &str) -> Option<Handler<H>> {
        self.handlers.get(kind).copied()
    }
}

fn run_command<'a, H: CommandHost, C: Command<H>>(
    command: &'a RawCommand,
    global: &'a H::Global,
    local: &'a mut H::Local,
) -> BoxFuture<'a, Result<serde_json::Value, CommandError>> {
    Box::pin(async move {
        let cmd: C = command.decode()?;
        let output = cmd.execute(global, local).await?;
        serde_json::to_value(output).map_err(|e| CommandError::Decode {
            message: format!("{} output: {e}", C::KIND),
        })
    })
}
