//! # Command worker loop.
//!
//! ```text
//! STARTING   host.create_global(ctx)      (failure = startup failure, retried by the supervisor)
//!            ctx.ready().notify()
//! loop until shutdown (checked between commands, never mid-command):
//!   DEQUEUE    channel.dequeue(poll_interval)       empty → re-check shutdown
//!   MIDDLEWARE selector(kind) in order: Continue | Produce(v) → results | Break → Rejected
//!   EXECUTE    create_local ─► enter ─► handler (panics captured) ─► exit
//!   PUBLISH    call_id: Some  → ResultEnvelope{call_id, outcome}
//!              call_id: None  → Ok: nothing; Err: the worker fails (and restarts per policy)
//!   results.clear()
//! ```
//!
//! A middleware `Break` on a fire-and-forget command is logged only; there is
//! no caller to inform and nothing failed.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use tracing::{debug, info};

use crate::commands::channel::SharedChannel;
use crate::commands::command::{CallEnvelope, RawCommand, ResultEnvelope};
use crate::commands::context::{CommandHost, GlobalSetup, Scope};
use crate::commands::middleware::{MiddlewareOutcome, MiddlewareResults, MiddlewareSelector};
use crate::commands::registry::CommandRegistry;
use crate::error::{CommandError, WorkerError};
use crate::events::{Event, EventKind};
use crate::workers::{Worker, WorkerContext};

/// Worker that executes commands from a shared channel, one at a time.
pub(crate) struct CommandWorker<H: CommandHost> {
    name: String,
    host: Arc<H>,
    registry: CommandRegistry<H>,
    channel: Arc<dyn SharedChannel>,
    poll_interval: Duration,
}

impl<H: CommandHost> CommandWorker<H> {
    pub(crate) fn new(
        name: String,
        host: Arc<H>,
        registry: CommandRegistry<H>,
        channel: Arc<dyn SharedChannel>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            name,
            host,
            registry,
            channel,
            poll_interval,
        }
    }

    async fn handle(
        &self,
        global: &H::Global,
        selector: Option<&MiddlewareSelector<H>>,
        command: &RawCommand,
        results: &mut MiddlewareResults,
    ) -> Result<serde_json::Value, CommandError> {
        let handler = self
            .registry
            .handler(&command.kind)
            .ok_or_else(|| CommandError::Decode {
                message: format!("unknown command kind {:?}", command.kind),
            })?;

        if let Some(select) = selector {
            for mw in select(command.kind.as_str()) {
                match mw.handle(global, command, results).await? {
                    MiddlewareOutcome::Continue => {}
                    MiddlewareOutcome::Produce(value) => results.put(value)?,
                    MiddlewareOutcome::Break => {
                        return Err(CommandError::Rejected {
                            middleware: mw.name().to_owned(),
                        });
                    }
                }
            }
        }

        let mut local = self.host.create_local(global, results).await?;
        local.enter().await?;
        let outcome = AssertUnwindSafe(handler(command, global, &mut local))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| {
                Err(CommandError::Panicked {
                    info: crate::panic_message(payload.as_ref()),
                })
            });
        local.exit().await;
        outcome
    }

    fn report(
        &self,
        ctx: &WorkerContext,
        envelope: &CallEnvelope,
        elapsed: Duration,
        outcome: &Result<serde_json::Value, CommandError>,
    ) {
        let ev = match outcome {
            Ok(_) => Event::new(EventKind::CommandHandled),
            Err(CommandError::Rejected { middleware }) => {
                Event::new(EventKind::CommandRejected).with_reason(middleware.as_str())
            }
            Err(err) => Event::new(EventKind::CommandFailed).with_reason(err.to_string()),
        };
        ctx.events().publish(
            ev.with_worker(ctx.name())
                .with_attempt(ctx.attempt())
                .with_command(envelope.command.kind.as_str())
                .with_call_id(envelope.call_id)
                .with_elapsed(elapsed),
        );
    }
}

#[async_trait]
impl<H: CommandHost> Worker for CommandWorker<H> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: WorkerContext) -> Result<(), WorkerError> {
        let GlobalSetup { global, middleware } = self.host.create_global(&ctx).await?;
        ctx.ready().notify();
        info!(worker = ctx.name(), attempt = ctx.attempt(), "command worker ready");

        let mut results = MiddlewareResults::new();
        while !ctx.shutdown().is_set() {
            let envelope = match self.channel.dequeue(self.poll_interval).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(_) if ctx.shutdown().is_set() => break,
                Err(err) => return Err(WorkerError::fail(format!("dequeue: {err}"))),
            };

            let started = Instant::now();
            let handled = self.handle(&global, middleware.as_ref(), &envelope.command, &mut results);
            let outcome = AssertUnwindSafe(handled)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(CommandError::Panicked {
                        info: crate::panic_message(payload.as_ref()),
                    })
                });
            results.clear();
            self.report(&ctx, &envelope, started.elapsed(), &outcome);

            match (envelope.call_id, outcome) {
                (Some(call_id), outcome) => {
                    let published = self.channel.publish(ResultEnvelope { call_id, outcome }).await;
                    if let Err(err) = published {
                        if ctx.shutdown().is_set() {
                            break;
                        }
                        return Err(WorkerError::fail(format!("publish result of {call_id}: {err}")));
                    }
                }
                (None, Ok(_)) | (None, Err(CommandError::Rejected { .. })) => {}
                (None, Err(err)) => {
                    return Err(WorkerError::fail(format!(
                        "fire-and-forget command {:?} failed: {err}",
                        envelope.command.kind
                    )));
                }
            }
        }

        debug!(worker = ctx.name(), "command worker stopping");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::commands::channel::{ChannelOptions, LocalChannel};
    use crate::commands::command::{CallId, Command};
    use crate::error::MiddlewareError;
    use crate::events::Bus;
    use crate::shutdown::ShutdownSignal;
    use crate::workers::ReadySignal;

    struct Caller(&'static str);

    #[derive(Default)]
    struct Host {
        globals: AtomicUsize,
        exits: Arc<AtomicUsize>,
    }

    struct Local {
        caller: Option<&'static str>,
        exits: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Scope for Local {
        async fn exit(&mut self) {
            self.exits.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Gate;

    #[async_trait]
    impl crate::commands::middleware::Middleware<Host> for Gate {
        fn name(&self) -> &str {
            "gate"
        }

        async fn handle(
            &self,
            _g: &(),
            command: &RawCommand,
            _r: &MiddlewareResults,
        ) -> Result<MiddlewareOutcome, CommandError> {
            match command.payload.get("token").and_then(|t| t.as_str()) {
                Some("dup") => Ok(MiddlewareOutcome::produce(Caller("x"))),
                Some(_) => Ok(MiddlewareOutcome::produce(Caller("ada"))),
                None => Ok(MiddlewareOutcome::Break),
            }
        }
    }

    #[async_trait]
    impl CommandHost for Host {
        type Global = ();
        type Local = Local;

        async fn create_global(&self, _ctx: &WorkerContext) -> Result<GlobalSetup<Self>, WorkerError> {
            self.globals.fetch_add(1, Ordering::SeqCst);
            let selector: MiddlewareSelector<Host> = Arc::new(|kind: &str| {
                let chain: Vec<Arc<dyn crate::commands::middleware::Middleware<Host>>> = match kind {
                    "whoami" => vec![Arc::new(Gate)],
                    "dup" => vec![Arc::new(Gate), Arc::new(Gate)],
                    _ => Vec::new(),
                };
                chain
            });
            Ok(GlobalSetup::new(()).with_middleware(selector))
        }

        async fn create_local(&self, _g: &(), results: &MiddlewareResults) -> Result<Local, CommandError> {
            Ok(Local {
                caller: results.get::<Caller>().ok().map(|c| c.0),
                exits: Arc::clone(&self.exits),
            })
        }
    }

    #[derive(Serialize, Deserialize)]
    struct WhoAmI {
        token: Option<String>,
    }

    #[async_trait]
    impl Command<Host> for WhoAmI {
        const KIND: &'static str = "whoami";
        type Output = String;

        async fn execute(&self, _g: &(), local: &mut Local) -> Result<String, CommandError> {
            local
                .caller
                .map(str::to_owned)
                .ok_or_else(|| CommandError::failed("auth", "anonymous"))
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Dup {
        token: String,
    }

    #[async_trait]
    impl Command<Host> for Dup {
        const KIND: &'static str = "dup";
        type Output = ();

        async fn execute(&self, _g: &(), _l: &mut Local) -> Result<(), CommandError> {
            Ok(())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Explode;

    #[async_trait]
    impl Command<Host> for Explode {
        const KIND: &'static str = "explode";
        type Output = ();

        async fn execute(&self, _g: &(), _l: &mut Local) -> Result<(), CommandError> {
            panic!("explode");
        }
    }

    fn registry() -> CommandRegistry<Host> {
        CommandRegistry::new()
            .register::<WhoAmI>()
            .register::<Dup>()
            .register::<Explode>()
    }

    fn context(shutdown: &ShutdownSignal) -> WorkerContext {
        WorkerContext::new(
            Arc::from("command_processor_0"),
            1,
            shutdown.clone(),
            ReadySignal::new(|| {}),
            Bus::default(),
        )
    }

    async fn call<C: Command<Host>>(ch: &LocalChannel, cmd: &C) -> ResultEnvelope {
        let call_id = CallId::new();
        ch.enqueue(CallEnvelope {
            call_id: Some(call_id),
            command: RawCommand::encode::<Host, C>(cmd).unwrap(),
        })
        .await
        .unwrap();
        ch.wait_result(call_id, Some(Duration::from_secs(5)))
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn middleware_feeds_the_local_context_and_can_break() {
        let host = Host::default();
        let exits = Arc::clone(&host.exits);
        let channel = Arc::new(LocalChannel::new("t", ChannelOptions::default()));
        let worker = CommandWorker::new(
            "command_processor_0".into(),
            Arc::new(host),
            registry(),
            channel.clone(),
            Duration::from_millis(20),
        );
        let shutdown = ShutdownSignal::new();
        let ctx = context(&shutdown);
        let ready = ctx.ready().clone();
        let run = tokio::spawn(async move { worker.run(ctx).await });

        let ok = call(&channel, &WhoAmI { token: Some("t".into()) }).await;
        assert_eq!(ok.outcome, Ok(serde_json::json!("ada")));

        let rejected = call(&channel, &WhoAmI { token: None }).await;
        assert_eq!(
            rejected.outcome,
            Err(CommandError::Rejected {
                middleware: "gate".into()
            })
        );

        let dup = call(&channel, &Dup { token: "dup".into() }).await;
        assert!(matches!(
            dup.outcome,
            Err(CommandError::Middleware(MiddlewareError::Duplicate { .. }))
        ));

        let panicked = call(&channel, &Explode).await;
        assert_eq!(
            panicked.outcome,
            Err(CommandError::Panicked {
                info: "explode".into()
            })
        );

        assert!(ready.is_notified());
        assert_eq!(exits.load(Ordering::SeqCst), 2, "scope exits for executed commands only");

        shutdown.set();
        assert_eq!(run.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn fire_and_forget_failure_stops_the_worker() {
        let channel = Arc::new(LocalChannel::new("t", ChannelOptions::default()));
        let worker = CommandWorker::new(
            "command_processor_0".into(),
            Arc::new(Host::default()),
            registry(),
            channel.clone(),
            Duration::from_millis(20),
        );
        let shutdown = ShutdownSignal::new();

        channel
            .enqueue(CallEnvelope {
                call_id: None,
                command: RawCommand::encode::<Host, _>(&WhoAmI { token: None }).unwrap(),
            })
            .await
            .unwrap();
        channel
            .enqueue(CallEnvelope {
                call_id: None,
                command: RawCommand::encode::<Host, _>(&Explode).unwrap(),
            })
            .await
            .unwrap();

        let err = worker.run(context(&shutdown)).await.unwrap_err();
        assert!(matches!(err, WorkerError::Fail { error } if error.contains("explode")));
    }
}
