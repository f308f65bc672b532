use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_state, fast_config, fast_config_builder, init_tracing},
    scripted_session::ScriptedSession,
};
use anyhow::Result;
use courier::{DeliveryMode, DispatchEngine, EngineState, JobSpecification};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn single_worker_walks_pairs_round_robin() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder().build();
    let spec = JobSpecification::builder()
        .targets(["a", "b"])
        .messages(["x", "y", "z"])
        .repeat_count(6)
        .session(session.boxed())
        .build()?;

    let report = DispatchEngine::new(spec, Arc::new(fast_config()))
        .run(1, CancellationToken::new())
        .await;

    assert_state(&report.status, EngineState::Completed);
    assert_eq!(report.status.sent_count, 6);
    assert_eq!(report.status.repeat_limit, Some(6));
    let expected: Vec<(String, String)> = [
        ("a", "x"),
        ("b", "y"),
        ("a", "z"),
        ("b", "x"),
        ("a", "y"),
        ("b", "z"),
    ]
    .iter()
    .map(|(t, m)| (t.to_string(), m.to_string()))
    .collect();
    assert_eq!(session.sent(), expected);
    assert_eq!(session.closes(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn repeat_count_is_never_exceeded_with_many_workers() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(1))
        .build();
    let spec = JobSpecification::builder()
        .targets(["t1", "t2", "t3"])
        .messages(["hello", "bye"])
        .repeat_count(25)
        .concurrency(4)
        .session(session.boxed())
        .build()?;

    let report = timeout(
        Duration::from_secs(10),
        DispatchEngine::new(spec, Arc::new(fast_config())).run(2, CancellationToken::new()),
    )
    .await?;

    assert_state(&report.status, EngineState::Completed);
    assert_eq!(report.status.sent_count, 25);
    assert_eq!(report.telemetry.sent, 25);
    assert_eq!(
        session.sent_len() as u64,
        25 + report.telemetry.discarded_sends,
        "every delivery is either counted or recorded as discarded"
    );
    assert_eq!(report.status.workers_alive, 0);
    assert_eq!(session.closes(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_never_claim_the_same_position() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(1))
        .build();
    let spec = JobSpecification::builder()
        .targets(["t1", "t2", "t3", "t4", "t5"])
        .messages(["m1", "m2", "m3"])
        .mode(DeliveryMode::SinglePass)
        .concurrency(4)
        .session(session.boxed())
        .build()?;

    let report = DispatchEngine::new(spec, Arc::new(fast_config()))
        .run(3, CancellationToken::new())
        .await;

    assert_state(&report.status, EngineState::Completed);
    let sent = session.sent();
    let distinct: HashSet<_> = sent.iter().cloned().collect();
    assert_eq!(sent.len(), 15);
    assert_eq!(distinct.len(), 15, "each pairing is delivered exactly once");
    assert_eq!(report.status.sent_count, 15);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unbounded_job_runs_until_cancelled() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(2))
        .build();
    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["ping"])
        .repeat_count(0)
        .concurrency(2)
        .session(session.boxed())
        .build()?;

    let shutdown = CancellationToken::new();
    let engine = DispatchEngine::new(spec, Arc::new(fast_config()));
    let status = engine.status();
    let handle = tokio::spawn(engine.run(4, shutdown.clone()));

    sleep(Duration::from_millis(80)).await;
    assert_eq!(status.state(), EngineState::Running);
    assert!(status.sent_count() > 0);

    shutdown.cancel();
    let report = timeout(Duration::from_secs(5), handle).await??;
    assert_state(&report.status, EngineState::Cancelled);
    assert_eq!(report.status.repeat_limit, None);
    assert_eq!(session.closes(), 1);

    let after_stop = session.sent_len();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(session.sent_len(), after_stop, "no sends after the engine stopped");
    Ok(())
}

#[tokio::test]
async fn stop_during_backoff_on_last_single_pass_pair_is_cancelled() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder().transient_target("slow").build();
    let spec = JobSpecification::builder()
        .targets(["slow"])
        .messages(["only"])
        .mode(DeliveryMode::SinglePass)
        .session(session.boxed())
        .build()?;
    let config = fast_config_builder()
        .send_attempts(5)
        .retry_delay(Duration::from_millis(500))
        .max_retry_delay(Duration::from_millis(500))
        .build()?;

    let shutdown = CancellationToken::new();
    let engine = DispatchEngine::new(spec, Arc::new(config));
    let handle = tokio::spawn(engine.run(14, shutdown.clone()));

    // The only position is claimed and its first attempt failed; the worker is now backing off.
    sleep(Duration::from_millis(100)).await;
    shutdown.cancel();

    let report = timeout(Duration::from_secs(5), handle).await??;
    assert_state(&report.status, EngineState::Cancelled);
    assert_eq!(report.status.sent_count, 0);
    assert_eq!(report.telemetry.skipped_pairs, 0);
    assert_eq!(session.closes(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_session_error_fails_the_engine() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(1))
        .fatal_after(3)
        .build();
    let spec = JobSpecification::builder()
        .targets(["t1", "t2"])
        .messages(["hi"])
        .concurrency(2)
        .session(session.boxed())
        .build()?;

    let report = timeout(
        Duration::from_secs(5),
        DispatchEngine::new(spec, Arc::new(fast_config())).run(5, CancellationToken::new()),
    )
    .await?;

    assert_state(&report.status, EngineState::Failed);
    let error = report.status.last_error.clone().unwrap_or_default();
    assert!(error.contains("token revoked"), "unexpected error: {error}");
    // Two workers may both pass the threshold check before either records its send.
    assert!((3..=4).contains(&report.status.sent_count));
    assert_eq!(session.sent_len() as u64, report.status.sent_count);
    assert_eq!(session.closes(), 1);

    sleep(Duration::from_millis(20)).await;
    assert_eq!(session.sent_len() as u64, report.status.sent_count);
    Ok(())
}

#[tokio::test]
async fn unreachable_target_is_skipped_without_counting() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .unreachable_target("gone")
        .build();
    let spec = JobSpecification::builder()
        .targets(["ok", "gone"])
        .messages(["hi"])
        .repeat_count(4)
        .session(session.boxed())
        .build()?;

    let report = DispatchEngine::new(spec, Arc::new(fast_config()))
        .run(6, CancellationToken::new())
        .await;

    assert_state(&report.status, EngineState::Completed);
    assert_eq!(report.status.sent_count, 4);
    assert_eq!(report.telemetry.skipped_pairs, 3);
    assert!(session.sent().iter().all(|(target, _)| target == "ok"));
    Ok(())
}

#[tokio::test]
async fn transient_failures_are_retried_before_counting() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder().flaky_sends(2).build();
    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["hi"])
        .repeat_count(1)
        .session(session.boxed())
        .build()?;

    let config = fast_config_builder().send_attempts(3).build()?;
    let report = DispatchEngine::new(spec, Arc::new(config))
        .run(7, CancellationToken::new())
        .await;

    assert_state(&report.status, EngineState::Completed);
    assert_eq!(report.status.sent_count, 1);
    assert_eq!(report.telemetry.failed_attempts, 2);
    assert_eq!(report.telemetry.skipped_pairs, 0);
    assert_eq!(session.attempts(), 3);
    Ok(())
}

#[tokio::test]
async fn exhausted_retries_skip_the_pair() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder().transient_target("busy").build();
    let spec = JobSpecification::builder()
        .targets(["busy", "free"])
        .messages(["hi"])
        .mode(DeliveryMode::SinglePass)
        .session(session.boxed())
        .build()?;

    let config = fast_config_builder().send_attempts(2).build()?;
    let report = DispatchEngine::new(spec, Arc::new(config))
        .run(8, CancellationToken::new())
        .await;

    assert_state(&report.status, EngineState::Completed);
    assert_eq!(report.status.sent_count, 1);
    assert_eq!(report.telemetry.skipped_pairs, 1);
    assert_eq!(report.telemetry.failed_attempts, 2);
    assert_eq!(session.sent(), vec![("free".to_string(), "hi".to_string())]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn periodic_refresh_runs_on_schedule() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(2))
        .build();
    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["hi"])
        .session(session.boxed())
        .build()?;

    let config = fast_config_builder()
        .refresh_interval(Duration::from_millis(10))
        .build()?;
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(DispatchEngine::new(spec, Arc::new(config)).run(9, shutdown.clone()));

    sleep(Duration::from_millis(100)).await;
    shutdown.cancel();
    let report = timeout(Duration::from_secs(5), handle).await??;

    assert_state(&report.status, EngineState::Cancelled);
    assert!(session.refreshes() >= 2, "refreshed {} times", session.refreshes());
    assert_eq!(report.telemetry.refreshes as usize, session.refreshes());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_refresh_on_every_worker_fails_the_engine() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(1))
        .refresh_fails()
        .build();
    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["hi"])
        .concurrency(2)
        .session(session.boxed())
        .build()?;

    let config = fast_config_builder()
        .refresh_interval(Duration::from_millis(5))
        .refresh_attempts(2)
        .build()?;
    let report = timeout(
        Duration::from_secs(5),
        DispatchEngine::new(spec, Arc::new(config)).run(10, CancellationToken::new()),
    )
    .await?;

    assert_state(&report.status, EngineState::Failed);
    let error = report.status.last_error.clone().unwrap_or_default();
    assert!(error.contains("refresh"), "unexpected error: {error}");
    assert_eq!(session.refreshes(), 4, "two workers times two attempts");
    assert_eq!(session.closes(), 1);
    Ok(())
}
