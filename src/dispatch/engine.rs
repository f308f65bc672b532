use super::cursor::Cursor;
use super::lifecycle::RunScope;
use super::registry::TaskId;
use super::worker::{WorkerExit, WorkerShared};
use super::worker_pool::WorkerPool;
use crate::job::{JobPlan, JobSpecification};
use crate::runtime::config::DispatchConfig;
use crate::runtime::fatal::FatalCause;
use crate::runtime::progress::SendProgress;
use crate::runtime::telemetry::{DispatchTelemetry, TelemetrySnapshot};
use crate::session::SessionHandle;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EngineState::Completed | EngineState::Cancelled | EngineState::Failed
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EngineState::Idle => "idle",
            EngineState::Running => "running",
            EngineState::Completed => "completed",
            EngineState::Cancelled => "cancelled",
            EngineState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Point-in-time view of one engine, safe to hand to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub id: TaskId,
    pub description: String,
    pub state: EngineState,
    pub running: bool,
    pub sent_count: u64,
    pub repeat_limit: Option<u64>,
    pub started_at: Option<DateTime<Utc>>,
    pub uptime: Duration,
    pub workers_alive: usize,
    pub last_error: Option<String>,
}

/// Final account of a finished engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineReport {
    pub status: StatusSnapshot,
    pub telemetry: TelemetrySnapshot,
}

#[derive(Debug)]
struct StatusInner {
    state: EngineState,
    started_at: Option<DateTime<Utc>>,
    started: Option<Instant>,
    finished: Option<Instant>,
    last_error: Option<String>,
}

/// Mutable fields of a running engine, shared with the registry for status queries.
#[derive(Debug)]
pub struct EngineStatus {
    description: String,
    progress: Arc<SendProgress>,
    telemetry: Arc<DispatchTelemetry>,
    inner: Mutex<StatusInner>,
}

impl EngineStatus {
    pub(crate) fn new(
        description: String,
        progress: Arc<SendProgress>,
        telemetry: Arc<DispatchTelemetry>,
    ) -> Self {
        Self {
            description,
            progress,
            telemetry,
            inner: Mutex::new(StatusInner {
                state: EngineState::Idle,
                started_at: None,
                started: None,
                finished: None,
                last_error: None,
            }),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    pub fn sent_count(&self) -> u64 {
        self.progress.sent()
    }

    pub fn snapshot(&self, id: TaskId) -> StatusSnapshot {
        let inner = self.lock();
        let uptime = match (inner.started, inner.finished) {
            (Some(started), Some(finished)) => finished.saturating_duration_since(started),
            (Some(started), None) => started.elapsed(),
            _ => Duration::ZERO,
        };

        StatusSnapshot {
            id,
            description: self.description.clone(),
            state: inner.state,
            running: inner.state == EngineState::Running,
            sent_count: self.progress.sent(),
            repeat_limit: self.progress.limit().map(|limit| limit.get()),
            started_at: inner.started_at,
            uptime,
            workers_alive: self.telemetry.workers_alive(),
            last_error: inner.last_error.clone(),
        }
    }

    pub(crate) fn mark_running(&self) {
        let mut inner = self.lock();
        inner.state = EngineState::Running;
        inner.started_at = Some(Utc::now());
        inner.started = Some(Instant::now());
    }

    pub(crate) fn finish(&self, state: EngineState, last_error: Option<String>) {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            return;
        }
        inner.state = state;
        inner.finished = Some(Instant::now());
        if last_error.is_some() {
            inner.last_error = last_error;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatusInner> {
        self.inner.lock().expect("engine status mutex poisoned")
    }
}

/// Drives one job specification from `Idle` to a terminal state.
///
/// The session is moved in from the specification and shared by this engine's workers only;
/// it is closed once every worker has stopped, whatever the outcome.
pub struct DispatchEngine {
    plan: Arc<JobPlan>,
    concurrency: usize,
    session: Arc<dyn SessionHandle>,
    config: Arc<DispatchConfig>,
    status: Arc<EngineStatus>,
    progress: Arc<SendProgress>,
    telemetry: Arc<DispatchTelemetry>,
}

impl DispatchEngine {
    pub fn new(spec: JobSpecification, config: Arc<DispatchConfig>) -> Self {
        let (plan, concurrency, description, session) = spec.into_parts();
        let progress = Arc::new(SendProgress::new(plan.repeat_limit()));
        let telemetry = Arc::new(DispatchTelemetry::default());
        let status = Arc::new(EngineStatus::new(
            description,
            progress.clone(),
            telemetry.clone(),
        ));

        Self {
            plan: Arc::new(plan),
            concurrency,
            session: Arc::from(session),
            config,
            status,
            progress,
            telemetry,
        }
    }

    pub fn status(&self) -> Arc<EngineStatus> {
        self.status.clone()
    }

    pub fn telemetry(&self) -> Arc<DispatchTelemetry> {
        self.telemetry.clone()
    }

    pub(crate) fn session(&self) -> Arc<dyn SessionHandle> {
        self.session.clone()
    }

    /// Runs the job until the repeat count is reached, a single pass is exhausted,
    /// `shutdown` is cancelled, or the session fails. The session is closed before returning.
    #[tracing::instrument(name = "engine", skip_all, fields(task_id = id))]
    pub async fn run(self, id: TaskId, shutdown: CancellationToken) -> EngineReport {
        self.status.mark_running();
        tracing::info!(
            task_id = id,
            description = %self.status.description(),
            session = %self.session.label(),
            workers = self.concurrency,
            targets = self.plan.targets().len(),
            messages = self.plan.messages().len(),
            "dispatch engine started"
        );

        let scope = RunScope::open(
            id,
            &shutdown,
            self.telemetry.clone(),
            self.config.metrics_interval(),
        );

        let cursor = Arc::new(Cursor::new(self.plan.cursor_bound()));
        let shared = WorkerShared {
            plan: self.plan.clone(),
            session: self.session.clone(),
            cursor: cursor.clone(),
            progress: self.progress.clone(),
            telemetry: self.telemetry.clone(),
            config: self.config.clone(),
        };

        let pool = WorkerPool::launch(
            self.concurrency,
            shared,
            scope.token(),
            scope.fatal_handler(),
        );
        tracing::debug!(task_id = id, workers = pool.len(), "worker pool launched");

        let exits = pool.join().await;
        let fatal = scope.close().await;

        let (state, last_error) = self.settle(&exits, fatal, cursor.pass_complete());
        self.close_session(id).await;
        self.status.finish(state, last_error);

        let report = EngineReport {
            status: self.status.snapshot(id),
            telemetry: self.telemetry.snapshot(),
        };

        tracing::info!(
            task_id = id,
            state = %report.status.state,
            sent = report.status.sent_count,
            skipped_pairs = report.telemetry.skipped_pairs,
            uptime = ?report.status.uptime,
            error = report.status.last_error.as_deref().unwrap_or(""),
            "dispatch engine finished"
        );

        report
    }

    fn settle(
        &self,
        exits: &[WorkerExit],
        fatal: Option<FatalCause>,
        pass_complete: bool,
    ) -> (EngineState, Option<String>) {
        if let Some(err) = fatal {
            return (EngineState::Failed, Some(err.to_string()));
        }

        if self.progress.limit_reached() || pass_complete {
            return (EngineState::Completed, None);
        }

        let refresh_failures: Vec<_> = exits
            .iter()
            .filter_map(|exit| match exit {
                WorkerExit::RefreshFailed(err) => Some(err),
                _ => None,
            })
            .collect();

        if !exits.is_empty() && refresh_failures.len() == exits.len() {
            let message = refresh_failures
                .last()
                .map(|err| format!("all workers failed to refresh the session: {err}"))
                .unwrap_or_default();
            return (EngineState::Failed, Some(message));
        }

        (EngineState::Cancelled, None)
    }

    async fn close_session(&self, id: TaskId) {
        match timeout(self.config.close_timeout(), self.session.close()).await {
            Ok(Ok(())) => tracing::debug!(task_id = id, "session closed"),
            Ok(Err(err)) => {
                tracing::warn!(task_id = id, error = %err, "failed to close session")
            }
            Err(_) => tracing::warn!(
                task_id = id,
                timeout = ?self.config.close_timeout(),
                "timed out closing session"
            ),
        }
    }
}

impl fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("description", &self.status.description())
            .field("concurrency", &self.concurrency)
            .field("session", &self.session.label())
            .field("state", &self.status.state())
            .finish()
    }
}
