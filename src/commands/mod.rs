//! Typed command bus.
//!
//! ```text
//!  callers (any thread / process)            command workers (supervised)
//!  CommandBus::send_and_wait_result ──┐    ┌──► CommandWorker 0 ──┐
//!  CommandBus::send ──────────────────┼─► SharedChannel ──► ...  ├─► CommandHost contexts
//!                                     │    └──► CommandWorker N ──┘   + Middleware chain
//!                       wait_result ◄─┘◄──────── publish ◄────────┘   + CommandRegistry
//! ```
//!
//! - [`Command`], [`CallId`], [`RawCommand`], [`CallEnvelope`], [`ResultEnvelope`]
//! - [`CommandHost`], [`GlobalSetup`], [`Scope`] execution contexts
//! - [`Middleware`], [`MiddlewareOutcome`], [`MiddlewareResults`], [`MiddlewareSelector`]
//! - [`CommandRegistry`] kind → handler table
//! - [`SharedChannel`], [`LocalChannel`], [`ChannelOptions`] queue and result list
//! - [`CommandBus`], [`BusOptions`] the caller-facing API

mod bus;
mod channel;
mod command;
mod context;
mod middleware;
mod registry;
mod worker;

pub use bus::{BusOptions, CommandBus};
pub use channel::{ChannelOptions, LocalChannel, SharedChannel};
pub use command::{CallEnvelope, CallId, Command, RawCommand, ResultEnvelope};
pub use context::{CommandHost, GlobalSetup, Scope};
pub use middleware::{Middleware, MiddlewareOutcome, MiddlewareResults, MiddlewareSelector, MiddlewareValue};
pub use registry::CommandRegistry;
