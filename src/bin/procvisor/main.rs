//! procvisor demo host.
//!
//! `procvisor serve` runs a command bus and a heartbeat worker until SIGINT/SIGTERM.
//! `procvisor exercise` starts the same pool, drives a fixed set of calls against
//! it, prints a JSON report on stdout and shuts the tree down. With
//! `--fail-startups N` every command worker refuses its first `N` startups.
//!
//! Worker processes are this binary re-executed with the same arguments; they
//! are recognized by the `PROCVISOR_IPC_*` environment and host a single worker.

mod commands;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use procvisor::{
    BusError, BusOptions, CommandBus, CommandError, Event, EventKind, LogWriter, RestartPolicy, RuntimeError,
    Settings, SharedManager, Subscribe, Supervisor, SupervisorConfig, WorkerContext, WorkerDescription, WorkerError,
    WorkerFn, WorkerKind,
};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

use commands::{ACCESS_TOKEN, DemoHost, Echo, Fail, Generation, GenerationInfo, Sleep, Whoami};

#[derive(Parser)]
#[command(name = "procvisor", version, about = "Supervised worker pool with a blocking command bus")]
struct Cli {
    /// Settings file (defaults to ./procvisor.{toml,yaml,json} when present)
    #[arg(short, long, env = "PROCVISOR_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Number of command workers (overrides settings)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Execution unit of the command workers
    #[arg(short, long, value_enum, default_value_t = Unit::Process)]
    unit: Unit,

    /// Refuse this many startup attempts of every command worker
    #[arg(long, default_value_t = 0)]
    fail_startups: u32,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run the pool until a termination signal arrives
    Serve,
    /// Run the pool, exercise the command bus, print a JSON report
    Exercise,
}

#[derive(ValueEnum, Clone, Copy)]
enum Unit {
    Process,
    Thread,
}

impl From<Unit> for WorkerKind {
    fn from(unit: Unit) -> Self {
        match unit {
            Unit::Process => WorkerKind::Process,
            Unit::Thread => WorkerKind::Thread,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("loading settings")?;
    procvisor::init_tracing(&settings);

    let manager = SharedManager::start().await.context("starting the shared manager")?;

    let mut options = BusOptions::from_settings(&settings).with_kind(cli.unit.into());
    if let Some(workers) = cli.workers {
        options = options.with_workers(workers);
    }
    let bus = CommandBus::new(&manager, DemoHost::new(cli.fail_startups), commands::registry(), options);

    let mut descriptions = bus.worker_descriptions();
    descriptions.push(heartbeat());

    let started = Arc::new(Notify::new());
    let on_started = Arc::clone(&started);
    let failures = Arc::new(FailureTally::default());
    let sup = Supervisor::builder(SupervisorConfig::from_settings(&settings))
        .with_manager(manager.clone())
        .with_subscribers(vec![
            Arc::new(LogWriter) as Arc<dyn Subscribe>,
            Arc::clone(&failures) as Arc<dyn Subscribe>,
        ])
        .with_os_signals(true)
        .after_all_started(move || on_started.notify_one())
        .build();

    if manager.is_child() {
        if let Err(err) = sup.run(descriptions).await {
            warn!(error = %err, label = err.as_label(), "worker process failed");
            std::process::exit(err.exit_code());
        }
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            info!(service = %settings.service_name, "serving until a termination signal arrives");
            sup.run(descriptions).await?;
        }
        Commands::Exercise => {
            let shutdown = manager.shutdown_signal();
            let pool = tokio::spawn(async move { sup.run(descriptions).await });
            tokio::select! {
                _ = started.notified() => {}
                _ = shutdown.cancelled() => {
                    pool.await.context("pool task")??;
                    anyhow::bail!("shut down before the pool started");
                }
            }

            let report = exercise(&bus).await;
            shutdown.set();
            let outcome: Result<(), RuntimeError> = pool.await.context("pool task")?;
            outcome?;

            let mut report = report?;
            report.startup_failures = failures.startups.load(Ordering::SeqCst);
            report.worker_failures = failures.workers.load(Ordering::SeqCst);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}

/// Thread worker that logs a line every few seconds.
fn heartbeat() -> WorkerDescription {
    let worker = WorkerFn::arc("heartbeat", |ctx: WorkerContext| async move {
        ctx.ready().notify();
        let mut beats: u64 = 0;
        loop {
            tokio::select! {
                _ = ctx.shutdown().cancelled() => return Ok::<_, WorkerError>(()),
                _ = tokio::time::sleep(Duration::from_secs(5)) => {
                    beats += 1;
                    info!(beats, "heartbeat");
                }
            }
        }
    });
    WorkerDescription::new(worker)
        .with_kind(WorkerKind::Thread)
        .with_restart(RestartPolicy::OnFailure)
}

/// Counts failed startups and failed worker runs of the pool.
#[derive(Default)]
struct FailureTally {
    startups: AtomicUsize,
    workers: AtomicUsize,
}

#[async_trait]
impl Subscribe for FailureTally {
    async fn on_event(&self, event: &Event) {
        match event.kind {
            EventKind::StartupFailed => self.startups.fetch_add(1, Ordering::SeqCst),
            EventKind::WorkerFailed => self.workers.fetch_add(1, Ordering::SeqCst),
            _ => return,
        };
    }

    fn name(&self) -> &'static str {
        "failure_tally"
    }
}

#[derive(Serialize)]
struct Report {
    echo: String,
    concurrent_calls: usize,
    error: CommandError,
    rejected: CommandError,
    authorized_as: String,
    timed_out_after_ms: u128,
    before_crash: GenerationInfo,
    after_crash: GenerationInfo,
    restarted: bool,
    startup_failures: usize,
    worker_failures: usize,
}

async fn exercise(bus: &CommandBus<DemoHost>) -> anyhow::Result<Report> {
    let echo = bus
        .send_and_wait_result(&Echo {
            text: "hello".into(),
        })
        .await?;

    let calls = (0..16).map(|i| {
        let bus = bus.clone();
        tokio::spawn(async move { bus.send_and_wait_result(&Echo { text: format!("call-{i}") }).await })
    });
    let mut concurrent_calls = 0;
    for (i, call) in calls.enumerate() {
        let got = call.await??;
        anyhow::ensure!(got == format!("call-{i}"), "call-{i} received {got:?}");
        concurrent_calls += 1;
    }

    let error = match bus
        .send_and_wait_result(&Fail {
            message: "requested failure".into(),
        })
        .await
    {
        Err(BusError::Command(err)) => err,
        other => anyhow::bail!("expected a command error, got {other:?}"),
    };

    let rejected = match bus
        .send_and_wait_result(&Whoami {
            token: "wrong".into(),
        })
        .await
    {
        Err(BusError::Command(err)) => err,
        other => anyhow::bail!("expected a rejection, got {other:?}"),
    };
    let authorized_as = bus
        .send_and_wait_result(&Whoami {
            token: ACCESS_TOKEN.into(),
        })
        .await?;

    let begun = Instant::now();
    let timed_out_after_ms = match bus
        .send_and_wait_result_with_timeout(&Sleep { millis: 1_500 }, Some(Duration::from_millis(300)))
        .await
    {
        Err(BusError::Timeout { .. }) => begun.elapsed().as_millis(),
        other => anyhow::bail!("expected a timeout, got {other:?}"),
    };

    // Whichever worker dequeues the fire-and-forget failure is the one that
    // restarts, so every worker's generation is noted beforehand and replies are
    // matched by worker name afterwards.
    let before = census(bus, bus.options().workers).await?;
    bus.send(&Fail {
        message: "crash the worker".into(),
    })
    .await?;

    let deadline = Instant::now() + Duration::from_secs(15);
    let (before_crash, after_crash) = loop {
        let now = bus.send_and_wait_result(&Generation).await?;
        let Some(then) = before.get(&now.worker) else {
            anyhow::bail!("reply from unknown worker {:?}", now.worker);
        };
        if now.generation != then.generation || Instant::now() >= deadline {
            break (then.clone(), now);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    let restarted = after_crash.generation != before_crash.generation;

    Ok(Report {
        echo,
        concurrent_calls,
        error,
        rejected,
        authorized_as,
        timed_out_after_ms,
        before_crash,
        after_crash,
        restarted,
        startup_failures: 0,
        worker_failures: 0,
    })
}

/// Generation of every command worker, keyed by worker name.
async fn census(bus: &CommandBus<DemoHost>, workers: usize) -> anyhow::Result<HashMap<String, GenerationInfo>> {
    let mut seen = HashMap::new();
    for _ in 0..workers.max(1) * 16 {
        let info = bus.send_and_wait_result(&Generation).await?;
        seen.entry(info.worker.clone()).or_insert(info);
        if seen.len() >= workers {
            break;
        }
    }
    anyhow::ensure!(seen.len() >= workers, "only {} of {workers} workers answered", seen.len());
    Ok(seen)
}
