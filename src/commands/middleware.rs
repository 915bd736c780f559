//! # Middleware: interceptors run before a command executes.
//!
//! The global setup of a command worker may install a [`MiddlewareSelector`]
//! that maps a command kind to an ordered chain of [`Middleware`]. Each one
//! returns a [`MiddlewareOutcome`]:
//! - `Continue` proceed with the next one;
//! - `Produce(value)` store `value` in the command's [`MiddlewareResults`] and proceed;
//! - `Break` stop; the command is not executed and is answered with
//!   [`CommandError::Rejected`](crate::CommandError::Rejected).
//!
//! [`MiddlewareResults`] holds at most one value per Rust type and is cleared
//! after every command.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::commands::command::RawCommand;
use crate::commands::context::CommandHost;
use crate::error::{CommandError, MiddlewareError};

/// An interceptor that may gate a command or contribute typed side-data.
#[async_trait]
pub trait Middleware<H: CommandHost>: Send + Sync + 'static {
    /// Name reported when this middleware rejects a command.
    fn name(&self) -> &str;

    async fn handle(
        &self,
        global: &H::Global,
        command: &RawCommand,
        results: &MiddlewareResults,
    ) -> Result<MiddlewareOutcome, CommandError>;
}

/// Maps a command kind to its middleware chain, in execution order.
pub type MiddlewareSelector<H> = Arc<dyn Fn(&str) -> Vec<Arc<dyn Middleware<H>>> + Send + Sync>;

/// Verdict of one middleware.
pub enum MiddlewareOutcome {
    Continue,
    Produce(MiddlewareValue),
    Break,
}

impl MiddlewareOutcome {
    /// Shorthand for `Produce(MiddlewareValue::new(value))`.
    pub fn produce<T: Any + Send + Sync>(value: T) -> Self {
        MiddlewareOutcome::Produce(MiddlewareValue::new(value))
    }
}

/// A type-tagged middleware result.
pub struct MiddlewareValue {
    type_id: TypeId,
    type_name: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

impl MiddlewareValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Box::new(value),
        }
    }
}

/// Per-command store of middleware results, one per type.
#[derive(Default)]
pub struct MiddlewareResults {
    values: HashMap<TypeId, MiddlewareValue>,
}

impl MiddlewareResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`. A second value of the same type is an error.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Result<(), MiddlewareError> {
        self.put(MiddlewareValue::new(value))
    }

    pub(crate) fn put(&mut self, value: MiddlewareValue) -> Result<(), MiddlewareError> {
        if self.values.contains_key(&value.type_id) {
            return Err(MiddlewareError::Duplicate {
                type_name: value.type_name.to_owned(),
            });
        }
        self.values.insert(value.type_id, value);
        Ok(())
    }

    /// Returns the value of type `T`; missing is an error.
    pub fn get<T: Any>(&self) -> Result<&T, MiddlewareError> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|v| v.value.downcast_ref::<T>())
            .ok_or_else(|| MiddlewareError::Missing {
                type_name: type_name::<T>().to_owned(),
            })
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
