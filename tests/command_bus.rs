mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use procvisor::{
    BusError, BusOptions, ChannelOptions, CommandBus, CommandError, CommandRegistry, EventKind, LocalChannel,
    Settings, SharedChannel, SharedManager, WorkerKind,
};

use common::{Add, Boom, Explode, Gen, Nap, Pool, TestHost, fast_config, thread_bus};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn every_call_gets_exactly_its_own_result() {
    let manager = SharedManager::in_process();
    let bus = thread_bus(&manager, TestHost::default(), 1);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    for i in 0..20 {
        assert_eq!(bus.send_and_wait_result(&Add { a: i, b: 100 }).await.unwrap(), i + 100);
    }
    assert_eq!(bus.pending_results().await.unwrap(), 0);

    pool.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_are_not_mixed_up() {
    let manager = SharedManager::in_process();
    let bus = thread_bus(&manager, TestHost::default(), 4);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    let calls: Vec<_> = (0..16)
        .map(|i| {
            let bus = bus.clone();
            tokio::spawn(async move { (i, bus.send_and_wait_result(&Add { a: i, b: 1_000 }).await) })
        })
        .collect();
    for call in calls {
        let (i, res) = call.await.unwrap();
        assert_eq!(res.unwrap(), i + 1_000);
    }
    assert_eq!(bus.pending_results().await.unwrap(), 0);

    let outcome = pool.stop().await;
    assert!(outcome.is_ok(), "{outcome:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn command_errors_reach_the_caller_unchanged() {
    let manager = SharedManager::in_process();
    let host = TestHost::default();
    let bus = thread_bus(&manager, host.clone(), 1);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    let before = bus.send_and_wait_result(&Gen).await.unwrap();
    let err = bus
        .send_and_wait_result(&Boom {
            kind: "not_found".into(),
            message: "no such user".into(),
        })
        .await
        .unwrap_err();
    match err {
        BusError::Command(inner) => assert_eq!(inner, CommandError::failed("not_found", "no such user")),
        other => panic!("unexpected error: {other:?}"),
    }

    let err = bus.send_and_wait_result(&Explode).await.unwrap_err();
    assert!(
        matches!(&err, BusError::Command(CommandError::Panicked { info }) if info.contains("explode")),
        "{err:?}"
    );

    // The worker survived both.
    assert_eq!(bus.send_and_wait_result(&Gen).await.unwrap(), before);
    assert_eq!(host.builds.load(Ordering::SeqCst), 1);

    let recorder = pool.recorder.clone();
    pool.stop().await.unwrap();
    assert_eq!(recorder.count(EventKind::CommandFailed), 2);
    assert_eq!(recorder.count(EventKind::WorkerFailed), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_gives_up_after_the_timeout() {
    let manager = SharedManager::in_process();
    let bus = thread_bus(&manager, TestHost::default(), 1);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    let begun = Instant::now();
    let err = bus
        .send_and_wait_result_with_timeout(&Nap { millis: 1_500 }, Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    let waited = begun.elapsed();
    assert!(err.is_timeout(), "{err:?}");
    assert!(err.to_string().contains("Server busy"));
    assert!(waited >= Duration::from_millis(300), "{waited:?}");
    assert!(waited < Duration::from_millis(1_200), "{waited:?}");

    // The late result is left unclaimed, later calls are unaffected.
    assert_eq!(bus.send_and_wait_result(&Add { a: 2, b: 2 }).await.unwrap(), 4);
    assert_eq!(bus.pending_results().await.unwrap(), 1);

    pool.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_fire_and_forget_restarts_the_worker() {
    let manager = SharedManager::in_process();
    let host = TestHost::default();
    let bus = thread_bus(&manager, host.clone(), 1);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    assert_eq!(bus.send_and_wait_result(&Gen).await.unwrap(), 1);
    bus.send(&Boom {
        kind: "bad".into(),
        message: "nobody is waiting".into(),
    })
    .await
    .unwrap();

    // Served by the restarted instance with a fresh global context.
    assert_eq!(bus.send_and_wait_result(&Gen).await.unwrap(), 2);
    assert_eq!(host.builds.load(Ordering::SeqCst), 2);

    let recorder = pool.recorder.clone();
    pool.stop().await.unwrap();
    assert_eq!(recorder.count(EventKind::WorkerFailed), 1);
    assert_eq!(recorder.count(EventKind::RestartScheduled), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_lets_running_commands_finish_without_restarts() {
    let manager = SharedManager::in_process();
    let host = TestHost::default();
    let bus = thread_bus(&manager, host.clone(), 2);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    let naps: Vec<_> = (0..2)
        .map(|_| {
            let bus = bus.clone();
            tokio::spawn(async move { bus.send_and_wait_result(&Nap { millis: 600 }).await })
        })
        .collect();
    // Both naps are picked up well within this.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let recorder = pool.recorder.clone();
    let begun = Instant::now();
    pool.stop().await.unwrap();
    let drained_in = begun.elapsed();

    // The in-flight naps (about 450ms left) plus a couple of 50ms polls, well under the 2s grace.
    assert!(drained_in < Duration::from_millis(1_500), "{drained_in:?}");
    for nap in naps {
        assert_eq!(nap.await.unwrap().unwrap(), 600);
    }
    assert_eq!(recorder.count(EventKind::CommandHandled), 2);
    assert_eq!(recorder.count(EventKind::RestartScheduled), 0);
    assert_eq!(recorder.count(EventKind::WorkerRetired), 2);
    assert_eq!(recorder.count(EventKind::AllStoppedWithin), 1);
    assert_eq!(host.builds.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dev_mode_ignores_call_timeouts() {
    let manager = SharedManager::in_process();
    let settings = Settings {
        dev_mode: true,
        ..Settings::default()
    };
    let options = BusOptions::from_settings(&settings)
        .with_kind(WorkerKind::Thread)
        .with_workers(1)
        .with_poll_interval(Duration::from_millis(50));
    assert!(options.call_timeout.is_none());
    let bus = CommandBus::new(&manager, TestHost::default(), common::registry(), options);
    let pool = Pool::start(manager, fast_config(), bus.worker_descriptions()).await;

    let slept = bus
        .send_and_wait_result_with_timeout(&Nap { millis: 500 }, Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(slept, 500);
    assert_eq!(bus.pending_results().await.unwrap(), 0);

    pool.stop().await.unwrap();
}

#[tokio::test]
async fn unregistered_commands_are_refused_before_enqueue() {
    let channel = Arc::new(LocalChannel::new("refuse", ChannelOptions::default()));
    let registry = CommandRegistry::<TestHost>::new().register::<Add>();
    let bus = CommandBus::with_channel(channel.clone(), TestHost::default(), registry, BusOptions::default());

    let err = bus.send(&Gen).await.unwrap_err();
    assert!(matches!(err, BusError::UnknownCommand { kind: "gen" }), "{err:?}");
    assert!(channel.dequeue(Duration::from_millis(10)).await.unwrap().is_none());
}

#[tokio::test]
async fn send_enqueues_without_a_call_id() {
    let channel = Arc::new(LocalChannel::new("fire", ChannelOptions::default()));
    let bus = CommandBus::with_channel(channel.clone(), TestHost::default(), common::registry(), BusOptions::default());

    bus.send(&Add { a: 1, b: 2 }).await.unwrap();
    let envelope = channel.dequeue(Duration::from_millis(10)).await.unwrap().unwrap();
    assert!(envelope.call_id.is_none());
    assert_eq!(envelope.command.kind, "add");
    assert_eq!(bus.pending_results().await.unwrap(), 0);
}
