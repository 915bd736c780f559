#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use procvisor::{
    BackoffPolicy, BusOptions, Command, CommandBus, CommandError, CommandHost, CommandRegistry, Event, EventKind,
    GlobalSetup, MiddlewareResults, RuntimeError, SharedManager, ShutdownSignal, Subscribe, Supervisor,
    SupervisorConfig, WorkerContext, WorkerDescription, WorkerError, WorkerKind,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Counts global contexts built, i.e. command worker (re)starts.
#[derive(Clone, Default)]
pub struct TestHost {
    pub builds: Arc<AtomicU32>,
}

pub struct TestGlobal {
    pub generation: u32,
}

#[async_trait]
impl CommandHost for TestHost {
    type Global = TestGlobal;
    type Local = ();

    async fn create_global(&self, _ctx: &WorkerContext) -> Result<GlobalSetup<Self>, WorkerError> {
        let generation = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GlobalSetup::new(TestGlobal { generation }))
    }

    async fn create_local(&self, _global: &TestGlobal, _results: &MiddlewareResults) -> Result<(), CommandError> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
pub struct Add {
    pub a: i64,
    pub b: i64,
}

#[async_trait]
impl Command<TestHost> for Add {
    const KIND: &'static str = "add";
    type Output = i64;

    async fn execute(&self, _g: &TestGlobal, _l: &mut ()) -> Result<i64, CommandError> {
        Ok(self.a + self.b)
    }
}

#[derive(Serialize, Deserialize)]
pub struct Nap {
    pub millis: u64,
}

#[async_trait]
impl Command<TestHost> for Nap {
    const KIND: &'static str = "nap";
    type Output = u64;

    async fn execute(&self, _g: &TestGlobal, _l: &mut ()) -> Result<u64, CommandError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(self.millis)
    }
}

#[derive(Serialize, Deserialize)]
pub struct Boom {
    pub kind: String,
    pub message: String,
}

#[async_trait]
impl Command<TestHost> for Boom {
    const KIND: &'static str = "boom";
    type Output = ();

    async fn execute(&self, _g: &TestGlobal, _l: &mut ()) -> Result<(), CommandError> {
        Err(CommandError::failed(self.kind.clone(), self.message.clone()))
    }
}

#[derive(Serialize, Deserialize)]
pub struct Explode;

#[async_trait]
impl Command<TestHost> for Explode {
    const KIND: &'static str = "explode";
    type Output = ();

    async fn execute(&self, _g: &TestGlobal, _l: &mut ()) -> Result<(), CommandError> {
        panic!("explode")
    }
}

#[derive(Serialize, Deserialize)]
pub struct Gen;

#[async_trait]
impl Command<TestHost> for Gen {
    const KIND: &'static str = "gen";
    type Output = u32;

    async fn execute(&self, g: &TestGlobal, _l: &mut ()) -> Result<u32, CommandError> {
        Ok(g.generation)
    }
}

pub fn registry() -> CommandRegistry<TestHost> {
    CommandRegistry::new()
        .register::<Add>()
        .register::<Nap>()
        .register::<Boom>()
        .register::<Explode>()
        .register::<Gen>()
}

pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        grace: Duration::from_secs(2),
        restart_backoff: BackoffPolicy::constant(Duration::from_millis(50)),
        startup_backoff: BackoffPolicy::constant(Duration::from_millis(50)),
        ..SupervisorConfig::default()
    }
}

pub fn thread_bus(manager: &SharedManager, host: TestHost, workers: usize) -> CommandBus<TestHost> {
    let options = BusOptions::default()
        .with_kind(WorkerKind::Thread)
        .with_workers(workers)
        .with_call_timeout(Some(Duration::from_secs(5)))
        .with_poll_interval(Duration::from_millis(50));
    CommandBus::new(manager, host, registry(), options)
}

/// Records every event it sees.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }
}

#[async_trait]
impl Subscribe for Recorder {
    async fn on_event(&self, event: &Event) {
        self.events.lock().push(event.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

/// A pool running in the background.
pub struct Pool {
    pub shutdown: ShutdownSignal,
    pub recorder: Recorder,
    pub handle: JoinHandle<Result<(), RuntimeError>>,
}

impl Pool {
    /// Starts `descriptions` and returns once all of them are up.
    pub async fn start(manager: SharedManager, cfg: SupervisorConfig, descriptions: Vec<WorkerDescription>) -> Self {
        let recorder = Recorder::default();
        let started = Arc::new(Notify::new());
        let notify = Arc::clone(&started);
        let sup = Supervisor::builder(cfg)
            .with_manager(manager.clone())
            .with_subscribers(vec![Arc::new(recorder.clone())])
            .after_all_started(move || notify.notify_one())
            .build();
        let handle = tokio::spawn(async move { sup.run(descriptions).await });
        tokio::time::timeout(Duration::from_secs(10), started.notified())
            .await
            .expect("pool did not start");
        Self {
            shutdown: manager.shutdown_signal(),
            recorder,
            handle,
        }
    }

    /// Requests shutdown and returns the pool's outcome.
    pub async fn stop(self) -> Result<(), RuntimeError> {
        self.shutdown.set();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("pool did not stop")
            .expect("pool task panicked")
    }
}
