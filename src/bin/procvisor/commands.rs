//! Demo command host: a handful of commands and an access-token middleware.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use procvisor::{
    Command, CommandError, CommandHost, CommandRegistry, GlobalSetup, Middleware, MiddlewareOutcome,
    MiddlewareResults, MiddlewareSelector, RawCommand, Scope, WorkerContext, WorkerError,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Token accepted by [`TokenGate`].
pub const ACCESS_TOKEN: &str = "open-sesame";

pub struct DemoHost {
    /// Startup attempts refused before a command worker comes up.
    fail_startups: u32,
}

impl DemoHost {
    pub fn new(fail_startups: u32) -> Self {
        Self { fail_startups }
    }
}

/// State built once per command worker instance.
pub struct DemoGlobal {
    worker: String,
    attempt: u32,
    generation: Uuid,
}

/// Per-command scope.
pub struct DemoScope {
    principal: Option<Principal>,
    entered: Option<Instant>,
}

#[derive(Clone, Debug)]
struct Principal(String);

#[async_trait]
impl CommandHost for DemoHost {
    type Global = DemoGlobal;
    type Local = DemoScope;

    async fn create_global(&self, ctx: &WorkerContext) -> Result<GlobalSetup<Self>, WorkerError> {
        if ctx.attempt() <= self.fail_startups {
            return Err(WorkerError::fail(format!(
                "startup attempt {} refused (--fail-startups {})",
                ctx.attempt(),
                self.fail_startups
            )));
        }
        let global = DemoGlobal {
            worker: ctx.name().to_owned(),
            attempt: ctx.attempt(),
            generation: Uuid::new_v4(),
        };
        let gate: Arc<dyn Middleware<Self>> = Arc::new(TokenGate);
        let selector: MiddlewareSelector<Self> = Arc::new(move |kind: &str| {
            if kind == Whoami::KIND {
                vec![Arc::clone(&gate)]
            } else {
                Vec::new()
            }
        });
        Ok(GlobalSetup::new(global).with_middleware(selector))
    }

    async fn create_local(&self, _global: &DemoGlobal, results: &MiddlewareResults) -> Result<DemoScope, CommandError> {
        let principal = if results.contains::<Principal>() {
            Some(results.get::<Principal>()?.clone())
        } else {
            None
        };
        Ok(DemoScope {
            principal,
            entered: None,
        })
    }
}

#[async_trait]
impl Scope for DemoScope {
    async fn enter(&mut self) -> Result<(), CommandError> {
        self.entered = Some(Instant::now());
        Ok(())
    }

    async fn exit(&mut self) {
        if let Some(at) = self.entered.take() {
            debug!(elapsed = ?at.elapsed(), "command scope closed");
        }
    }
}

/// Lets `whoami` through only with the right token, and tells it who called.
struct TokenGate;

#[async_trait]
impl Middleware<DemoHost> for TokenGate {
    fn name(&self) -> &str {
        "token_gate"
    }

    async fn handle(
        &self,
        _global: &DemoGlobal,
        command: &RawCommand,
        _results: &MiddlewareResults,
    ) -> Result<MiddlewareOutcome, CommandError> {
        let token = command.payload.get("token").and_then(|t| t.as_str());
        Ok(match token {
            Some(ACCESS_TOKEN) => MiddlewareOutcome::produce(Principal("operator".to_owned())),
            _ => MiddlewareOutcome::Break,
        })
    }
}

#[derive(Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

#[async_trait]
impl Command<DemoHost> for Echo {
    const KIND: &'static str = "echo";
    type Output = String;

    async fn execute(&self, _global: &DemoGlobal, _local: &mut DemoScope) -> Result<String, CommandError> {
        Ok(self.text.clone())
    }
}

#[derive(Serialize, Deserialize)]
pub struct Sleep {
    pub millis: u64,
}

#[async_trait]
impl Command<DemoHost> for Sleep {
    const KIND: &'static str = "sleep";
    type Output = u64;

    async fn execute(&self, _global: &DemoGlobal, _local: &mut DemoScope) -> Result<u64, CommandError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(self.millis)
    }
}

/// Fails with `kind = "demo_failure"`.
#[derive(Serialize, Deserialize)]
pub struct Fail {
    pub message: String,
}

#[async_trait]
impl Command<DemoHost> for Fail {
    const KIND: &'static str = "fail";
    type Output = ();

    async fn execute(&self, _global: &DemoGlobal, _local: &mut DemoScope) -> Result<(), CommandError> {
        Err(CommandError::failed("demo_failure", self.message.clone()))
    }
}

#[derive(Serialize, Deserialize)]
pub struct Crash;

#[async_trait]
impl Command<DemoHost> for Crash {
    const KIND: &'static str = "crash";
    type Output = ();

    async fn execute(&self, _global: &DemoGlobal, _local: &mut DemoScope) -> Result<(), CommandError> {
        panic!("crash command executed")
    }
}

/// Identity of the worker instance that ran the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationInfo {
    pub worker: String,
    pub attempt: u32,
    pub pid: u32,
    pub generation: Uuid,
}

#[derive(Serialize, Deserialize)]
pub struct Generation;

#[async_trait]
impl Command<DemoHost> for Generation {
    const KIND: &'static str = "generation";
    type Output = GenerationInfo;

    async fn execute(&self, global: &DemoGlobal, _local: &mut DemoScope) -> Result<GenerationInfo, CommandError> {
        Ok(GenerationInfo {
            worker: global.worker.clone(),
            attempt: global.attempt,
            pid: std::process::id(),
            generation: global.generation,
        })
    }
}

#[derive(Serialize, Deserialize)]
pub struct Whoami {
    pub token: String,
}

#[async_trait]
impl Command<DemoHost> for Whoami {
    const KIND: &'static str = "whoami";
    type Output = String;

    async fn execute(&self, _global: &DemoGlobal, local: &mut DemoScope) -> Result<String, CommandError> {
        match &local.principal {
            Some(Principal(name)) => Ok(name.clone()),
            None => Err(CommandError::failed("unauthenticated", "no principal")),
        }
    }
}

pub fn registry() -> CommandRegistry<DemoHost> {
    CommandRegistry::new()
        .register::<Echo>()
        .register::<Sleep>()
        .register::<Fail>()
        .register::<Crash>()
        .register::<Generation>()
        .register::<Whoami>()
}
