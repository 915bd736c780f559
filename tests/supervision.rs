mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use procvisor::{
    EventKind, RestartPolicy, RuntimeError, SharedManager, Supervisor, SupervisorConfig, WorkerContext,
    WorkerDescription, WorkerError, WorkerFn,
};

use common::{Pool, Recorder, fast_config};

fn thread_worker<F, Fut>(name: &'static str, restart: RestartPolicy, daemon: bool, f: F) -> WorkerDescription
where
    F: Fn(WorkerContext) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    WorkerDescription::new(WorkerFn::arc(name, f))
        .with_restart(restart)
        .with_daemon(daemon)
}

async fn run_to_end(cfg: SupervisorConfig, descriptions: Vec<WorkerDescription>) -> (Result<(), RuntimeError>, Recorder) {
    let recorder = Recorder::default();
    let sup = Supervisor::builder(cfg)
        .with_manager(SharedManager::in_process())
        .with_subscribers(vec![Arc::new(recorder.clone())])
        .build();
    let res = tokio::time::timeout(Duration::from_secs(10), sup.run(descriptions))
        .await
        .expect("pool did not finish");
    (res, recorder)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn never_runs_a_worker_once() {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let once = thread_worker("once", RestartPolicy::Never, false, move |ctx: WorkerContext| {
        let counter = Arc::clone(&counter);
        async move {
            ctx.ready().notify();
            counter.fetch_add(1, Ordering::SeqCst);
            Err(WorkerError::fail("done badly"))
        }
    });

    let (res, recorder) = run_to_end(fast_config(), vec![once]).await;
    res.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.count(EventKind::WorkerRetired), 1);
    assert_eq!(recorder.count(EventKind::RestartScheduled), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retired_worker_leaves_the_rest_of_the_pool_running() {
    let once = thread_worker("once", RestartPolicy::Never, false, |ctx: WorkerContext| async move {
        ctx.ready().notify();
        Ok(())
    });
    let ticks = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&ticks);
    let server = thread_worker("server", RestartPolicy::Always, true, move |ctx: WorkerContext| {
        let counter = Arc::clone(&counter);
        async move {
            ctx.ready().notify();
            loop {
                tokio::select! {
                    _ = ctx.shutdown().cancelled() => return Ok(()),
                    _ = tokio::time::sleep(Duration::from_millis(20)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
    });

    let pool = Pool::start(SharedManager::in_process(), fast_config(), vec![once, server]).await;
    tokio::time::timeout(Duration::from_secs(5), async {
        while pool.recorder.count(EventKind::WorkerRetired) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the one-shot worker never retired");

    let before = ticks.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(ticks.load(Ordering::SeqCst) > before, "server stopped ticking");
    assert!(!pool.handle.is_finished(), "pool exited with a worker still running");
    assert!(!pool.shutdown.is_set());

    let recorder = pool.recorder.clone();
    pool.stop().await.unwrap();
    assert_eq!(recorder.count(EventKind::RestartScheduled), 0);
    assert_eq!(recorder.count(EventKind::WorkerRetired), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn on_failure_restarts_until_success() {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let flaky = thread_worker("flaky", RestartPolicy::OnFailure, false, move |ctx: WorkerContext| {
        let counter = Arc::clone(&counter);
        async move {
            ctx.ready().notify();
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                return Err(WorkerError::fail("not yet"));
            }
            Ok(())
        }
    });

    let (res, recorder) = run_to_end(fast_config(), vec![flaky]).await;
    res.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.count(EventKind::WorkerFailed), 2);
    assert_eq!(recorder.count(EventKind::RestartScheduled), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn always_restarts_after_success() {
    let runs = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&runs);
    let looping = thread_worker("looping", RestartPolicy::Always, true, move |ctx: WorkerContext| {
        let counter = Arc::clone(&counter);
        async move {
            ctx.ready().notify();
            if counter.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                ctx.shutdown().set();
            }
            Ok(())
        }
    });

    let (res, recorder) = run_to_end(fast_config(), vec![looping]).await;
    res.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(recorder.count(EventKind::AllStoppedWithin), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_startups_are_retried() {
    let starts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&starts);
    let picky = thread_worker("picky", RestartPolicy::Always, true, move |ctx: WorkerContext| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().push(ctx.attempt());
            if ctx.attempt() < 3 {
                return Err(WorkerError::fail("config not there yet"));
            }
            ctx.ready().notify();
            ctx.shutdown().cancelled().await;
            Ok(())
        }
    });

    let pool = Pool::start(SharedManager::in_process(), fast_config(), vec![picky]).await;
    assert_eq!(*starts.lock(), vec![1, 2, 3]);

    let recorder = pool.recorder.clone();
    pool.stop().await.unwrap();
    assert_eq!(recorder.count(EventKind::StartupFailed), 2);
    assert_eq!(recorder.count(EventKind::WorkerReady), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_start_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let first_log = Arc::clone(&log);
    let first = thread_worker("first", RestartPolicy::Never, true, move |ctx: WorkerContext| {
        let log = Arc::clone(&first_log);
        async move {
            log.lock().push("first starting");
            tokio::time::sleep(Duration::from_millis(200)).await;
            log.lock().push("first ready");
            ctx.ready().notify();
            ctx.shutdown().cancelled().await;
            Ok(())
        }
    });
    let second_log = Arc::clone(&log);
    let second = thread_worker("second", RestartPolicy::Never, true, move |ctx: WorkerContext| {
        let log = Arc::clone(&second_log);
        async move {
            log.lock().push("second starting");
            ctx.ready().notify();
            ctx.shutdown().cancelled().await;
            Ok(())
        }
    });

    let pool = Pool::start(SharedManager::in_process(), fast_config(), vec![first, second]).await;
    assert_eq!(*log.lock(), vec!["first starting", "first ready", "second starting"]);
    pool.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_request_from_a_worker_stops_the_pool() {
    let quitter = thread_worker("quitter", RestartPolicy::Always, true, |ctx: WorkerContext| async move {
        ctx.ready().notify();
        tokio::time::sleep(Duration::from_millis(100)).await;
        Err(WorkerError::ShutdownRequested)
    });
    let stayer = thread_worker("stayer", RestartPolicy::Always, true, |ctx: WorkerContext| async move {
        ctx.ready().notify();
        ctx.shutdown().cancelled().await;
        Ok(())
    });

    let (res, recorder) = run_to_end(fast_config(), vec![quitter, stayer]).await;
    res.unwrap();
    assert_eq!(recorder.count(EventKind::ShutdownRequested), 1);
    assert_eq!(recorder.count(EventKind::RestartScheduled), 0);
    assert_eq!(recorder.count(EventKind::WorkerRetired), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stuck_daemons_exceed_the_grace_period() {
    let stubborn = thread_worker("stubborn", RestartPolicy::Always, true, |ctx: WorkerContext| async move {
        ctx.ready().notify();
        tokio::time::sleep(Duration::from_secs(3_600)).await;
        Ok(())
    });
    let cfg = SupervisorConfig {
        grace: Duration::from_millis(200),
        ..fast_config()
    };

    let pool = Pool::start(SharedManager::in_process(), cfg, vec![stubborn]).await;
    let recorder = pool.recorder.clone();
    match pool.stop().await {
        Err(RuntimeError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_millis(200));
            assert_eq!(stuck, vec!["stubborn".to_owned()]);
        }
        other => panic!("expected grace exceeded, got {other:?}"),
    }
    assert_eq!(recorder.count(EventKind::GraceExceeded), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_daemon_workers_are_awaited_past_the_grace_period() {
    let finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&finished);
    let careful = thread_worker("careful", RestartPolicy::Always, false, move |ctx: WorkerContext| {
        let flag = Arc::clone(&flag);
        async move {
            ctx.ready().notify();
            ctx.shutdown().cancelled().await;
            tokio::time::sleep(Duration::from_millis(500)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(())
        }
    });
    let cfg = SupervisorConfig {
        grace: Duration::from_millis(100),
        ..fast_config()
    };

    let pool = Pool::start(SharedManager::in_process(), cfg, vec![careful]).await;
    pool.stop().await.unwrap();
    assert!(finished.load(Ordering::SeqCst));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn after_all_started_is_skipped_when_shutdown_interrupts_startup() {
    let manager = SharedManager::in_process();
    let shutdown = manager.shutdown_signal();
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);

    let never_ready = thread_worker("never_ready", RestartPolicy::Always, true, |ctx: WorkerContext| async move {
        ctx.shutdown().cancelled().await;
        Ok(())
    });
    let sup = Supervisor::builder(fast_config())
        .with_manager(manager)
        .with_subscribers(Vec::new())
        .after_all_started(move || flag.store(true, Ordering::SeqCst))
        .build();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        shutdown.set();
    });
    tokio::time::timeout(Duration::from_secs(10), sup.run(vec![never_ready]))
        .await
        .expect("pool did not finish")
        .unwrap();
    stopper.await.unwrap();
    assert!(!called.load(Ordering::SeqCst));
}
