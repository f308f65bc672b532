use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{assert_state, fast_config, init_tracing, wait_for_sent, wait_for_terminal},
    scripted_session::{ScriptedFactory, ScriptedSession},
};
use anyhow::Result;
use courier::{
    Account, AppContext, ControlSurface, DispatchService, EngineState, Input, MemoryStore,
    Operator, OperatorId, Reply,
};

const OWNER: OperatorId = 1;

struct Harness {
    surface: ControlSurface,
    factory: Arc<ScriptedFactory>,
    store: Arc<MemoryStore>,
}

impl Harness {
    async fn new(session: ScriptedSession, accounts: Vec<Account>) -> Result<Self> {
        let factory = Arc::new(ScriptedFactory::new(session));
        let store = Arc::new(MemoryStore::with_state(accounts, Vec::new()));
        let ctx = AppContext::load(
            OWNER,
            DispatchService::new(fast_config()),
            factory.clone(),
            store.clone(),
        )
        .await?;
        Ok(Self {
            surface: ControlSurface::new(Arc::new(ctx)),
            factory,
            store,
        })
    }

    async fn say(&self, operator: OperatorId, text: &str) -> Reply {
        self.surface.handle(operator, Input::text(text)).await
    }

    fn service(&self) -> &DispatchService {
        self.surface.context().service()
    }
}

fn threads() -> ScriptedSession {
    ScriptedSession::builder()
        .threads(&[("t1", "Alpha"), ("t2", "Beta"), ("t3", "Gamma")])
        .build()
}

#[tokio::test]
async fn unauthorized_operators_are_ignored() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    assert!(harness.say(99, "/help").await.is_empty());
    assert!(harness.say(99, "/login").await.is_empty());
    assert_eq!(harness.surface.dialogue_step(99), "idle");

    assert!(harness.say(OWNER, "/help").await.contains("/dispatch"));
    Ok(())
}

#[tokio::test]
async fn credential_login_persists_the_token_not_the_password() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    assert!(harness.say(OWNER, "/login").await.contains("username"));
    assert_eq!(harness.surface.dialogue_step(OWNER), "username");
    assert!(harness.say(OWNER, "alice").await.contains("password"));
    let reply = harness.say(OWNER, "secret").await;
    assert!(reply.contains("Logged in as alice"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "idle");

    let saved = harness.store.accounts();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].username, "alice");
    assert_eq!(saved[0].token, "token-alice");
    assert!(saved[0].added_at.is_some());
    Ok(())
}

#[tokio::test]
async fn failed_login_saves_nothing() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    harness.say(OWNER, "/login").await;
    harness.say(OWNER, "alice").await;
    let reply = harness.say(OWNER, "wrong").await;
    assert!(reply.contains("Login failed"), "{reply}");
    assert!(harness.store.accounts().is_empty());
    assert_eq!(harness.surface.dialogue_step(OWNER), "idle");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dispatch_dialogue_starts_a_job() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    assert!(harness.say(OWNER, "/tokenlogin work").await.contains("work"));
    assert_eq!(harness.surface.dialogue_step(OWNER), "token");
    assert!(harness.say(OWNER, "tok-123").await.contains("Saved work"));
    assert!(harness.say(OWNER, "/workers 2").await.contains("2 worker"));

    let listing = harness.say(OWNER, "/dispatch").await;
    assert!(listing.contains("1. Alpha"), "{listing}");
    assert!(listing.contains("3. Gamma"), "{listing}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "targets");
    assert_eq!(harness.factory.session().closes(), 1, "probe session is closed");

    let selected = harness.say(OWNER, "1,3").await;
    assert!(selected.contains("Alpha, Gamma"), "{selected}");
    assert!(harness.surface.awaiting_payload(OWNER));

    let loaded = harness.say(OWNER, "hello & see you").await;
    assert!(loaded.contains("Loaded 2 message(s)"), "{loaded}");

    let started = harness.say(OWNER, "4").await;
    assert!(started.contains("Task 1 started"), "{started}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "idle");

    let snapshot = wait_for_terminal(harness.service(), 1, Duration::from_secs(5)).await?;
    assert_state(&snapshot, EngineState::Completed);
    assert_eq!(snapshot.sent_count, 4);

    let session = harness.factory.session();
    assert!(session
        .sent()
        .iter()
        .all(|(target, _)| target == "t1" || target == "t3"));
    assert_eq!(session.closes(), 2, "probe and job sessions are both closed");
    // Token check, target probe, and the job itself.
    assert_eq!(harness.factory.opened(), 3);
    Ok(())
}

#[tokio::test]
async fn dispatch_without_targets_is_a_configuration_error() -> Result<()> {
    init_tracing();
    let empty = ScriptedSession::builder().build();
    let harness = Harness::new(empty, vec![Account::new("work", "tok")]).await?;

    let reply = harness.say(OWNER, "/dispatch").await;
    assert!(reply.contains("Configuration error"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "idle");
    assert!(harness.service().list().is_empty());
    Ok(())
}

#[tokio::test]
async fn dispatch_requires_an_account() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    let reply = harness.say(OWNER, "/dispatch").await;
    assert!(reply.contains("No account saved"), "{reply}");
    assert_eq!(harness.factory.opened(), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_input_keeps_the_current_step() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), vec![Account::new("work", "tok")]).await?;

    harness.say(OWNER, "/dispatch").await;
    let reply = harness.say(OWNER, "first,second").await;
    assert!(reply.contains("invalid selection"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "targets");

    let reply = harness.say(OWNER, "9").await;
    assert!(reply.contains("no listed target"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "targets");

    harness.say(OWNER, "all").await;
    let reply = harness.say(OWNER, " & ").await;
    assert!(reply.contains("No messages found"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "payload");

    harness.say(OWNER, "hi").await;
    let reply = harness.say(OWNER, "many").await;
    assert!(reply.contains("Send a number"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "count");

    let reply = harness.say(OWNER, "/cancel").await;
    assert!(reply.contains("count"), "{reply}");
    assert_eq!(harness.surface.dialogue_step(OWNER), "idle");
    assert!(harness.say(OWNER, "/cancel").await.contains("Nothing to cancel"));
    assert!(harness.service().list().is_empty());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn uploaded_document_supplies_the_payload() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), vec![Account::new("work", "tok")]).await?;

    let early = harness
        .surface
        .handle(
            OWNER,
            Input::Document {
                name: "early.txt".into(),
                bytes: b"hi".to_vec(),
            },
        )
        .await;
    assert!(early.contains("Nothing in progress"), "{early}");

    harness.say(OWNER, "/mode single").await;
    harness.say(OWNER, "/dispatch").await;
    harness.say(OWNER, "2").await;
    let reply = harness
        .surface
        .handle(
            OWNER,
            Input::Document {
                name: "art.txt".into(),
                bytes: "\"line one\\nline two\"\n\"second\"\n".as_bytes().to_vec(),
            },
        )
        .await;
    assert!(reply.contains("Loaded 2 message(s)"), "{reply}");

    harness.say(OWNER, "0").await;
    let snapshot = wait_for_terminal(harness.service(), 1, Duration::from_secs(5)).await?;
    assert_state(&snapshot, EngineState::Completed);
    assert_eq!(snapshot.sent_count, 2);
    assert_eq!(
        harness.factory.session().sent(),
        vec![
            ("t2".to_string(), "line one\nline two".to_string()),
            ("t2".to_string(), "second".to_string()),
        ]
    );
    Ok(())
}

#[tokio::test]
async fn owner_manages_operators() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    assert!(harness.say(7, "/help").await.is_empty());
    assert!(harness
        .say(OWNER, "/add 7 bob")
        .await
        .contains("Authorized operator 7"));
    assert!(harness.say(OWNER, "/add 7").await.contains("already"));
    assert_eq!(harness.store.operators(), vec![Operator::new(7, "bob")]);

    let help = harness.say(7, "/help").await;
    assert!(help.contains("/dispatch"));
    assert!(!help.contains("/flush"));
    assert!(harness.say(7, "/flush").await.contains("Owner only"));
    assert!(harness.say(7, "/add 8").await.contains("Owner only"));

    assert!(harness.say(OWNER, "/operators").await.contains("7 (bob)"));
    assert!(harness.say(OWNER, "/remove 7").await.contains("Removed"));
    assert!(harness.say(7, "/help").await.is_empty());
    assert!(harness.store.operators().is_empty());
    Ok(())
}

#[tokio::test]
async fn account_commands_update_the_store() -> Result<()> {
    init_tracing();
    let harness = Harness::new(
        threads(),
        vec![Account::new("first", "t-1"), Account::new("second", "t-2")],
    )
    .await?;

    let listing = harness.say(OWNER, "/accounts").await;
    assert!(listing.contains("1. first (default)"), "{listing}");
    assert!(harness.say(OWNER, "/use 2").await.contains("second"));
    assert!(harness.say(OWNER, "/use 5").await.contains("no account #5"));
    assert!(harness.say(OWNER, "/prefs").await.contains("Default account: second"));

    assert!(harness.say(OWNER, "/logout").await.contains("Logged out second"));
    assert_eq!(harness.factory.logged_out(), vec!["second".to_string()]);
    assert_eq!(harness.store.accounts(), vec![Account::new("first", "t-1")]);

    assert!(harness.say(OWNER, "/flush").await.contains("Flushed 1"));
    assert!(harness.store.accounts().is_empty());
    assert!(harness.say(OWNER, "/logout").await.contains("No account"));
    Ok(())
}

#[tokio::test]
async fn default_account_choice_survives_a_restart() -> Result<()> {
    init_tracing();
    let harness = Harness::new(
        threads(),
        vec![Account::new("first", "t-1"), Account::new("second", "t-2")],
    )
    .await?;
    assert!(harness.say(OWNER, "/use 2").await.contains("second"));
    assert_eq!(harness.store.default_account().as_deref(), Some("second"));

    let restarted = AppContext::load(
        OWNER,
        DispatchService::new(fast_config()),
        harness.factory.clone(),
        harness.store.clone(),
    )
    .await?;
    let (_, default_index) = restarted.accounts().await;
    assert_eq!(default_index, 1);
    assert_eq!(
        restarted.default_account().await.map(|a| a.username),
        Some("second".to_string())
    );

    let stale = AppContext::load(
        OWNER,
        DispatchService::new(fast_config()),
        harness.factory.clone(),
        Arc::new(
            MemoryStore::with_state(vec![Account::new("first", "t-1")], Vec::new())
                .with_default_account("gone"),
        ),
    )
    .await?;
    assert_eq!(
        stale.default_account().await.map(|a| a.username),
        Some("first".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn preferences_are_validated() -> Result<()> {
    init_tracing();
    let harness = Harness::new(threads(), Vec::new()).await?;

    assert!(harness.say(OWNER, "/workers 0").await.contains("between 1 and"));
    assert!(harness.say(OWNER, "/workers 99").await.contains("between 1 and"));
    assert!(harness.say(OWNER, "/workers x").await.contains("Usage"));
    assert!(harness.say(OWNER, "/mode sideways").await.contains("Usage"));
    assert!(harness.say(OWNER, "/mode single").await.contains("single-pass"));
    assert!(harness.say(OWNER, "/prefs").await.contains("Mode: single-pass"));
    assert!(harness.say(OWNER, "/bogus").await.contains("Unknown command"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_commands_report_and_stop_jobs() -> Result<()> {
    init_tracing();
    let session = ScriptedSession::builder()
        .threads(&[("t1", "Alpha")])
        .send_delay(Duration::from_millis(2))
        .build();
    let harness = Harness::new(session, vec![Account::new("work", "tok")]).await?;

    assert!(harness.say(OWNER, "/tasks").await.contains("No tasks"));
    assert!(harness.say(OWNER, "/status").await.contains("Idle"));

    harness.say(OWNER, "/dispatch").await;
    harness.say(OWNER, "all").await;
    harness.say(OWNER, "ping").await;
    assert!(harness.say(OWNER, "0").await.contains("Task 1 started"));
    wait_for_sent(harness.service(), 1, 2, Duration::from_secs(5)).await?;

    let status = harness.say(OWNER, "/status").await;
    assert!(status.contains("Running: 1 task(s)"), "{status}");
    assert!(harness.say(OWNER, "/status 1").await.contains("[running]"));
    assert!(harness.say(OWNER, "/tasks").await.contains("#1 [running]"));

    assert!(harness.say(OWNER, "/stop 9").await.contains("Task 9 not found"));
    assert!(harness.say(OWNER, "/stop x").await.contains("expected a task id"));
    assert!(harness.say(OWNER, "/stop 1").await.contains("Stopped task(s): 1"));
    assert!(harness.service().list().is_empty());

    let tasks = harness.say(OWNER, "/tasks").await;
    assert!(tasks.contains("Recently finished"), "{tasks}");
    assert!(tasks.contains("#1 [cancelled]"), "{tasks}");
    assert!(harness.say(OWNER, "/stop all").await.contains("No running tasks"));
    Ok(())
}
