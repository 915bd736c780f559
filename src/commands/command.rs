//! # Commands and their envelopes.
//!
//! A [`Command`] is an immutable, serializable request with an `execute`
//! operation and a statically declared `Output`. On its way to a command worker
//! it travels as a [`RawCommand`] (stable `KIND` plus JSON payload) inside a
//! [`CallEnvelope`]; the answer comes back as a [`ResultEnvelope`].
//!
//! ```text
//! caller                              command worker
//!   C ──encode──► RawCommand{kind,payload}
//!                  CallEnvelope{call_id?, command} ──queue──► registry[kind] ──decode──► C::execute
//!   C::Output ◄──decode── ResultEnvelope{call_id, Ok(value) | Err(CommandError)} ◄──list──┘
//! ```
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use procvisor::{Command, CommandError, CommandHost, GlobalSetup, MiddlewareResults, WorkerContext, WorkerError};
//! use serde::{Deserialize, Serialize};
//!
//! struct Host;
//!
//! #[async_trait]
//! impl CommandHost for Host {
//!     type Global = String;
//!     type Local = ();
//!
//!     async fn create_global(&self, _ctx: &WorkerContext) -> Result<GlobalSetup<Self>, WorkerError> {
//!         Ok(GlobalSetup::new("model-v1".to_owned()))
//!     }
//!
//!     async fn create_local(&self, _g: &String, _r: &MiddlewareResults) -> Result<(), CommandError> {
//!         Ok(())
//!     }
//! }
//!
//! #[derive(Serialize, Deserialize)]
//! struct Describe;
//!
//! #[async_trait]
//! impl Command<Host> for Describe {
//!     const KIND: &'static str = "describe";
//!     type Output = String;
//!
//!     async fn execute(&self, global: &String, _local: &mut ()) -> Result<String, CommandError> {
//!         Ok(global.clone())
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commands::context::CommandHost;
use crate::error::CommandError;

/// A typed request executed by a command worker of host `H`.
#[async_trait]
pub trait Command<H: CommandHost>: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier; the registry and middleware selectors key on it.
    const KIND: &'static str;

    /// Value returned to the caller.
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Runs the command on the worker.
    async fn execute(&self, global: &H::Global, local: &mut H::Local) -> Result<Self::Output, CommandError>;
}

/// Correlation token pairing a call with its result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(Uuid);

impl CallId {
    /// A fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A command in transit: its kind and its JSON-encoded fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    pub kind: String,
    pub payload: serde_json::Value,
}

impl RawCommand {
    /// Encodes `cmd` under its `KIND`.
    pub fn encode<H: CommandHost, C: Command<H>>(cmd: &C) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: C::KIND.to_owned(),
            payload: serde_json::to_value(cmd)?,
        })
    }

    /// Decodes the payload as `C`.
    pub fn decode<C: DeserializeOwned>(&self) -> Result<C, CommandError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| CommandError::Decode {
            message: format!("{}: {e}", self.kind),
        })
    }
}

/// One queued call. `call_id: None` marks fire-and-forget.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    pub call_id: Option<CallId>,
    pub command: RawCommand,
}

/// Outcome of one call, consumed once by the caller holding `call_id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub call_id: CallId,
    pub outcome: Result<serde_json::Value, CommandError>,
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::commands::context::GlobalSetup;
    use crate::commands::middleware::MiddlewareResults;
    use crate::error::WorkerError;
    use crate::workers::WorkerContext;

    struct Host;

    #[async_trait]
    impl CommandHost for Host {
        type Global = ();
        type Local = ();

        async fn create_global(&self, _ctx: &WorkerContext) -> Result<GlobalSetup<Self>, WorkerError> {
            Ok(GlobalSetup::new(()))
        }

        async fn create_local(&self, _g: &(), _r: &MiddlewareResults) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Transcribe {
        chunk: u64,
        language: Option<String>,
        hints: BTreeMap<String, BTreeMap<String, f32>>,
        speaker: Option<u8>,
    }

    #[async_trait]
    impl Command<Host> for Transcribe {
        const KIND: &'static str = "transcribe";
        type Output = ();

        async fn execute(&self, _g: &(), _l: &mut ()) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[test]
    fn command_survives_the_queue_encoding() {
        let mut inner = BTreeMap::new();
        inner.insert("kubernetes".to_owned(), 2.5);
        let mut hints = BTreeMap::new();
        hints.insert("terms".to_owned(), inner);
        let cmd = Transcribe {
            chunk: 42,
            language: Some("de".into()),
            hints,
            speaker: None,
        };

        let envelope = CallEnvelope {
            call_id: Some(CallId::new()),
            command: RawCommand::encode::<Host, _>(&cmd).unwrap(),
        };
        let bytes = serde_json::to_vec(&envelope).unwrap();
        let back: CallEnvelope = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(back.call_id, envelope.call_id);
        assert_eq!(back.command.kind, "transcribe");
        assert_eq!(back.command.decode::<Transcribe>().unwrap(), cmd);
    }

    #[test]
    fn decode_reports_the_kind() {
        let raw = RawCommand {
            kind: "transcribe".into(),
            payload: serde_json::json!({"chunk": "not a number"}),
        };
        let err = raw.decode::<Transcribe>().unwrap_err();
        assert!(matches!(err, CommandError::Decode { message } if message.starts_with("transcribe:")));
    }

    #[test]
    fn call_ids_are_unique() {
        assert_ne!(CallId::new(), CallId::new());
    }
}
