use std::time::Duration;

use crate::support::{
    helpers::{assert_state, fast_config, init_tracing, wait_for_terminal},
    mock_gateway::{MockGateway, MockGatewayServer},
};
use anyhow::Result;
use courier::gateway::CircuitState;
use courier::{
    Account, DispatchService, EngineState, GatewayOptions, GatewaySession,
    GatewaySessionFactory, JobSpecification, Message, SessionError, SessionFactory,
    SessionHandle, TargetId, TargetResolver,
};

fn options() -> GatewayOptions {
    GatewayOptions {
        request_timeout: Duration::from_secs(2),
        ..GatewayOptions::default()
    }
}

#[tokio::test]
async fn login_exchanges_credentials_for_a_token() -> Result<()> {
    init_tracing();
    let gateway = MockGateway::new().with_account("alice", "secret");
    let server = MockGatewayServer::start(gateway.clone()).await?;

    let session = GatewaySession::login(server.url(), "alice", "secret", options()).await?;
    assert_eq!(session.token(), "token-alice");
    assert_eq!(session.label(), "alice");
    assert!(gateway.token_is_live("token-alice"));

    let rejected = GatewaySession::login(server.url(), "alice", "wrong", options()).await;
    assert!(
        matches!(rejected, Err(SessionError::Fatal(_))),
        "bad credentials must fail fast"
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn token_session_delivers_and_maps_gateway_errors() -> Result<()> {
    init_tracing();
    let gateway = MockGateway::new()
        .with_token("tok")
        .with_unknown_thread("ghost");
    let server = MockGatewayServer::start(gateway.clone()).await?;
    let session = GatewaySession::with_token(server.url(), "work", "tok", options())?;

    session
        .send_one(&TargetId::new("t1"), &Message::new("line one\nline two"))
        .await?;
    assert_eq!(
        gateway.sent(),
        vec![("t1".to_string(), "line one\nline two".to_string())]
    );

    let unreachable = session
        .send_one(&TargetId::new("ghost"), &Message::new("hi"))
        .await;
    assert!(matches!(
        unreachable,
        Err(SessionError::TargetUnreachable { ref target, .. }) if target == "ghost"
    ));

    session.refresh(0).await?;
    assert_eq!(gateway.calls("session.ping"), 1);

    let revoked = GatewaySession::with_token(server.url(), "old", "stale", options())?;
    let err = revoked
        .send_one(&TargetId::new("t1"), &Message::new("hi"))
        .await
        .expect_err("stale token must be rejected");
    assert!(err.is_fatal());

    let metrics = session.metrics();
    assert_eq!(metrics.requests, 3);
    assert_eq!(metrics.errors, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn empty_token_is_rejected_without_a_request() {
    let result = GatewaySession::with_token("http://127.0.0.1:9", "none", "  ", options());
    assert!(matches!(result, Err(SessionError::Fatal(_))));
}

#[tokio::test]
async fn resolver_ranks_listed_threads() -> Result<()> {
    init_tracing();
    let gateway = MockGateway::new()
        .with_token("tok")
        .with_thread("t-old", "Old friends", 100)
        .with_thread("t-new", "New project", 300)
        .with_thread("t-mid", "Book club", 200);
    let server = MockGatewayServer::start(gateway).await?;
    let session = GatewaySession::with_token(server.url(), "work", "tok", options())?;

    let resolver = TargetResolver::new(2, Duration::from_secs(2));
    let targets = resolver.resolve(&session).await;
    let titles: Vec<&str> = targets.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["New project", "Book club"]);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn resolver_offers_recent_threads_beyond_the_first_page() -> Result<()> {
    init_tracing();
    let mut gateway = MockGateway::new().with_token("tok");
    for i in 0..11 {
        gateway = gateway.with_thread(&format!("t{i}"), &format!("Thread {i}"), i);
    }
    let gateway = gateway.with_thread("t11", "Busy thread", 1_000);
    let server = MockGatewayServer::start(gateway.clone()).await?;
    let session = GatewaySession::with_token(server.url(), "work", "tok", options())?;

    let targets = TargetResolver::new(10, Duration::from_secs(2))
        .resolve(&session)
        .await;
    assert_eq!(targets.len(), 10);
    assert_eq!(targets.first().map(|t| t.target.as_str()), Some("t11"));
    assert_eq!(targets.get(1).map(|t| t.target.as_str()), Some("t10"));
    assert!(targets.iter().all(|t| t.target.as_str() != "t0"));
    assert_eq!(gateway.calls("threads.list"), 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn close_keeps_the_token_and_logout_revokes_it() -> Result<()> {
    init_tracing();
    let gateway = MockGateway::new().with_account("alice", "secret");
    let server = MockGatewayServer::start(gateway.clone()).await?;
    let factory = GatewaySessionFactory::new(server.url(), options());

    let account = factory.login("alice", "secret").await?;
    assert_eq!(account.token, "token-alice");
    assert_eq!(gateway.calls("session.close"), 1);
    assert!(gateway.token_is_live("token-alice"));

    let session = factory.open(&account)?;
    session.close().await?;
    session.close().await?;
    assert_eq!(gateway.calls("session.close"), 2, "close is idempotent");
    assert!(matches!(
        session.send_one(&TargetId::new("t1"), &Message::new("hi")).await,
        Err(SessionError::Closed)
    ));

    factory.logout(&account).await?;
    assert!(!gateway.token_is_live("token-alice"));

    let stale = factory.open(&Account::new("alice", "token-alice"))?;
    assert!(stale
        .send_one(&TargetId::new("t1"), &Message::new("hi"))
        .await
        .expect_err("revoked token")
        .is_fatal());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn rate_limiting_opens_the_circuit_breaker() -> Result<()> {
    init_tracing();
    let gateway = MockGateway::new()
        .with_token("tok")
        .with_rate_limited_thread("hot");
    let server = MockGatewayServer::start(gateway).await?;
    let session = GatewaySession::with_token(
        server.url(),
        "work",
        "tok",
        GatewayOptions {
            breaker_failure_threshold: 2,
            breaker_cooldown: Duration::from_secs(60),
            ..options()
        },
    )?;

    for _ in 0..2 {
        let err = session
            .send_one(&TargetId::new("hot"), &Message::new("hi"))
            .await
            .expect_err("rate limited");
        assert!(err.is_retryable());
    }
    assert_eq!(session.breaker_state(), CircuitState::Open);

    let rejected = session
        .send_one(&TargetId::new("cold"), &Message::new("hi"))
        .await
        .expect_err("breaker open");
    assert!(rejected.is_retryable());
    assert_eq!(session.metrics().rejected, 1);

    server.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_job_over_the_gateway() -> Result<()> {
    init_tracing();
    let gateway = MockGateway::new().with_token("tok");
    let server = MockGatewayServer::start(gateway.clone()).await?;
    let factory = GatewaySessionFactory::new(server.url(), options());
    let service = DispatchService::new(fast_config());

    let session = factory.open(&Account::new("work", "tok"))?;
    let spec = JobSpecification::builder()
        .targets(["t1", "t2"])
        .messages(["first", "second"])
        .repeat_count(4)
        .concurrency(2)
        .session(session)
        .build()?;
    let id = service.start_job(spec)?;

    let snapshot = wait_for_terminal(&service, id, Duration::from_secs(10)).await?;
    assert_state(&snapshot, EngineState::Completed);
    assert_eq!(snapshot.sent_count, 4);
    assert!(gateway.sent().len() >= 4);
    assert_eq!(gateway.calls("session.close"), 1);
    assert!(gateway.token_is_live("tok"));

    server.shutdown().await;
    Ok(())
}
