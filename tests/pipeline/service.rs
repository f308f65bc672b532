use std::time::Duration;

use crate::support::{
    helpers::{assert_state, fast_config, fast_config_builder, init_tracing, wait_for_sent, wait_for_terminal},
    scripted_session::ScriptedSession,
};
use anyhow::Result;
use courier::dispatch::RegistryError;
use courier::{DispatchService, EngineState, JobError, JobSpecification, StopTarget};
use tokio::time::{sleep, timeout};

fn unbounded_job(session: &ScriptedSession, workers: usize) -> Result<JobSpecification> {
    Ok(JobSpecification::builder()
        .targets(["t1", "t2"])
        .messages(["hello"])
        .concurrency(workers)
        .description("unbounded test job")
        .session(session.boxed())
        .build()?)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_closes_session_and_removes_entry() -> Result<()> {
    init_tracing();
    let service = DispatchService::new(fast_config());
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(2))
        .build();

    let id = service.start_job(unbounded_job(&session, 2)?)?;
    assert_eq!(id, 1);
    wait_for_sent(&service, id, 5, Duration::from_secs(5)).await?;

    let running = service.list();
    assert_eq!(running.len(), 1);
    assert!(running[0].running);
    assert_eq!(running[0].description, "unbounded test job");
    assert!(running[0].started_at.is_some());

    let stopped = service.stop_job(StopTarget::Task(id)).await?;
    assert_eq!(stopped, vec![id]);

    // stop_job returns only after the shutdown sequence has finished.
    assert_eq!(session.closes(), 1);
    assert!(service.list().is_empty());
    assert!(service.registry().is_empty());

    let snapshot = service.get_status(id)?;
    assert_state(&snapshot, EngineState::Cancelled);
    assert!(!snapshot.running);
    assert_eq!(snapshot.workers_alive, 0);

    let after_stop = session.sent_len();
    sleep(Duration::from_millis(30)).await;
    assert_eq!(session.sent_len(), after_stop);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_all_stops_every_running_task() -> Result<()> {
    init_tracing();
    let service = DispatchService::new(fast_config());
    let first = ScriptedSession::builder()
        .send_delay(Duration::from_millis(2))
        .build();
    let second = ScriptedSession::builder()
        .send_delay(Duration::from_millis(2))
        .build();

    let a = service.start_job(unbounded_job(&first, 1)?)?;
    let b = service.start_job(unbounded_job(&second, 2)?)?;
    wait_for_sent(&service, a, 1, Duration::from_secs(5)).await?;
    wait_for_sent(&service, b, 1, Duration::from_secs(5)).await?;
    assert_eq!(service.list().len(), 2);

    let mut stopped = service.stop_job(StopTarget::All).await?;
    stopped.sort_unstable();
    assert_eq!(stopped, vec![a, b]);
    assert_eq!(first.closes(), 1);
    assert_eq!(second.closes(), 1);
    assert!(service.list().is_empty());

    let history = service.history();
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|report| report.status.state == EngineState::Cancelled));
    Ok(())
}

#[tokio::test]
async fn stopping_an_unknown_task_is_an_error() -> Result<()> {
    init_tracing();
    let service = DispatchService::new(fast_config());
    assert_eq!(
        service.stop_job(StopTarget::Task(42)).await,
        Err(RegistryError::NotFound(42))
    );
    assert_eq!(service.stop_job(StopTarget::All).await, Ok(Vec::new()));
    assert!(service.get_status(42).is_err());
    Ok(())
}

#[tokio::test]
async fn finished_jobs_leave_the_registry_and_ids_are_not_reused() -> Result<()> {
    init_tracing();
    let service = DispatchService::new(fast_config());

    let session = ScriptedSession::builder().build();
    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["a", "b"])
        .repeat_count(3)
        .session(session.boxed())
        .build()?;
    let first = service.start_job(spec)?;

    let snapshot = wait_for_terminal(&service, first, Duration::from_secs(5)).await?;
    assert_state(&snapshot, EngineState::Completed);
    assert_eq!(snapshot.sent_count, 3);
    assert_eq!(session.closes(), 1);
    assert!(service.registry().is_empty());

    let again = ScriptedSession::builder().build();
    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["a"])
        .repeat_count(1)
        .session(again.boxed())
        .build()?;
    let second = service.start_job(spec)?;
    assert_eq!(second, first + 1);
    wait_for_terminal(&service, second, Duration::from_secs(5)).await?;
    Ok(())
}

#[tokio::test]
async fn start_rejects_concurrency_above_the_configured_maximum() -> Result<()> {
    init_tracing();
    let service = DispatchService::new(fast_config_builder().max_concurrency(2).build()?);
    let session = ScriptedSession::builder().build();

    let spec = JobSpecification::builder()
        .targets(["t1"])
        .messages(["a"])
        .concurrency(3)
        .session(session.boxed())
        .build()?;

    assert_eq!(
        service.start_job(spec).err(),
        Some(JobError::ConcurrencyTooHigh {
            requested: 3,
            max: 2
        })
    );
    assert!(service.list().is_empty());
    assert_eq!(session.attempts(), 0);

    timeout(Duration::from_secs(2), async {
        while session.closes() == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await?;
    assert_eq!(session.closes(), 1, "a rejected job still closes its session");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_waits_for_every_task() -> Result<()> {
    init_tracing();
    let service = DispatchService::new(fast_config());
    let session = ScriptedSession::builder()
        .send_delay(Duration::from_millis(2))
        .build();
    let id = service.start_job(unbounded_job(&session, 1)?)?;
    wait_for_sent(&service, id, 1, Duration::from_secs(5)).await?;

    service.shutdown().await;
    assert!(service.list().is_empty());
    assert_eq!(session.closes(), 1);
    assert_state(&service.get_status(id)?, EngineState::Cancelled);
    Ok(())
}
