//! Heartbeat scheduler tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};

use phoenix::errors::AgentError;
use phoenix::heartbeat::scheduler::{job_fn, HeartbeatScheduler, JobFn};

fn counting_job(counter: Arc<AtomicUsize>) -> JobFn {
    job_fn(move || {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    })
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_register_keeps_first_job() {
    let scheduler = HeartbeatScheduler::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    scheduler.register("health", "@every 10s", counting_job(first.clone())).unwrap();
    scheduler.start();

    let err = scheduler
        .register("health", "@every 1s", counting_job(second.clone()))
        .unwrap_err();
    assert!(matches!(err, AgentError::DuplicateJob(name) if name == "health"));

    tokio::time::sleep(Duration::from_secs(25)).await;
    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.status()[0].schedule, "@every 10s");
}

#[tokio::test(start_paused = true)]
async fn test_register_after_start_is_scheduled() {
    let scheduler = HeartbeatScheduler::new();
    scheduler.register("a", "@every 1h", job_fn(|| async { Ok(()) })).unwrap();
    scheduler.start();

    let counter = Arc::new(AtomicUsize::new(0));
    scheduler.register("late", "@every 5s", counting_job(counter.clone())).unwrap();

    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_run_now_unknown_job() {
    let scheduler = HeartbeatScheduler::new();
    let err = assert_err!(scheduler.run_now("missing").await);
    assert!(matches!(err, AgentError::UnknownJob(name) if name == "missing"));
}

#[tokio::test]
async fn test_run_now_returns_job_result() {
    let scheduler = HeartbeatScheduler::new();
    scheduler
        .register(
            "broken",
            "@every 1h",
            job_fn(|| async { Err(AgentError::RemoteError("rpc down".to_string())) }),
        )
        .unwrap();

    let err = assert_err!(scheduler.run_now("broken").await);
    assert!(matches!(err, AgentError::RemoteError(_)));

    let status = &scheduler.status()[0];
    assert!(status.last_run.is_some());
    assert!(status.last_error.as_deref().unwrap().contains("rpc down"));
    assert!(!status.running);
}

#[tokio::test]
async fn test_run_now_refuses_busy_job() {
    let scheduler = Arc::new(HeartbeatScheduler::new());
    let release = Arc::new(Notify::new());
    let gate = release.clone();
    scheduler
        .register(
            "slow",
            "@every 1h",
            job_fn(move || {
                let gate = gate.clone();
                async move {
                    gate.notified().await;
                    Ok(())
                }
            }),
        )
        .unwrap();

    let first = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_now("slow").await })
    };
    while !scheduler.status()[0].running {
        tokio::task::yield_now().await;
    }

    let err = assert_err!(scheduler.run_now("slow").await);
    assert!(matches!(err, AgentError::SchedulerError(ref m) if m.contains("already running")));

    release.notify_one();
    assert_ok!(first.await.unwrap());
    assert!(!scheduler.status()[0].running);
}

#[tokio::test(start_paused = true)]
async fn test_failing_job_keeps_ticking() {
    let scheduler = HeartbeatScheduler::new();
    let counter = Arc::new(AtomicUsize::new(0));
    let calls = counter.clone();
    scheduler
        .register(
            "flaky",
            "@every 10s",
            job_fn(move || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(AgentError::Timeout("provider".to_string()))
                }
            }),
        )
        .unwrap();

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(35)).await;

    assert_eq!(counter.load(Ordering::SeqCst), 3);
    assert!(scheduler.status()[0].last_error.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_ticks_are_skipped() {
    let scheduler = HeartbeatScheduler::new();
    let started = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));

    let (s, r, m) = (started.clone(), running.clone(), max_running.clone());
    scheduler
        .register(
            "slow",
            "@every 10s",
            job_fn(move || {
                let (s, r, m) = (s.clone(), r.clone(), m.clone());
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    let now = r.fetch_add(1, Ordering::SeqCst) + 1;
                    m.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_secs(25)).await;
                    r.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        )
        .unwrap();

    scheduler.start();
    tokio::time::sleep(Duration::from_secs(45)).await;

    // runs start at 10s and 40s; the ticks at 20s and 30s are dropped
    assert_eq!(started.load(Ordering::SeqCst), 2);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}
