use super::engine::{DispatchEngine, EngineReport, EngineState, EngineStatus, StatusSnapshot};
use super::registry::{RegistryError, TaskCompletion, TaskId, TaskRegistry};
use crate::job::{JobError, JobSpecification};
use crate::runtime::config::DispatchConfig;
use crate::runtime::telemetry::TelemetrySnapshot;
use crate::session::SessionHandle;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Which tasks a stop request addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopTarget {
    Task(TaskId),
    All,
}

impl FromStr for StopTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("all") {
            return Ok(StopTarget::All);
        }
        value
            .parse::<TaskId>()
            .map(StopTarget::Task)
            .map_err(|_| format!("expected a task id or `all`, got `{value}`"))
    }
}

impl fmt::Display for StopTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopTarget::Task(id) => write!(f, "{id}"),
            StopTarget::All => f.write_str("all"),
        }
    }
}

/// Start/stop/status API over the task registry.
///
/// Must be used from within a tokio runtime: `start_job` spawns the engine task.
#[derive(Clone)]
pub struct DispatchService {
    config: Arc<DispatchConfig>,
    registry: Arc<TaskRegistry>,
}

impl DispatchService {
    pub fn new(config: DispatchConfig) -> Self {
        Self::with_registry(config, Arc::new(TaskRegistry::default()))
    }

    pub fn with_registry(config: DispatchConfig, registry: Arc<TaskRegistry>) -> Self {
        Self {
            config: Arc::new(config),
            registry,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.registry.clone()
    }

    /// Validates the job, creates its engine, and starts it in the background.
    ///
    /// A rejected job never reaches `Running`; its session is closed in the background.
    pub fn start_job(&self, spec: JobSpecification) -> Result<TaskId, JobError> {
        if let Err(err) = self.admit(&spec) {
            tracing::warn!(error = %err, "job rejected");
            self.release_session(spec);
            return Err(err);
        }

        let engine = DispatchEngine::new(spec, self.config.clone());
        let status = engine.status();
        let session = engine.session();
        let registration = self.registry.register(status.clone());
        let id = registration.id;
        let registry = self.registry.clone();
        let close_timeout = self.config.close_timeout();

        tokio::spawn(async move {
            let shutdown = registration.shutdown.clone();
            let report = supervise(
                id,
                engine.run(id, shutdown),
                status,
                session,
                close_timeout,
            )
            .await;

            registry.finish(report);
            registration.complete();
        });

        Ok(id)
    }

    fn admit(&self, spec: &JobSpecification) -> Result<(), JobError> {
        spec.validate()?;
        let max = self.config.max_concurrency();
        if spec.concurrency() > max {
            return Err(JobError::ConcurrencyTooHigh {
                requested: spec.concurrency(),
                max,
            });
        }
        Ok(())
    }

    fn release_session(&self, spec: JobSpecification) {
        let session = spec.into_session();
        let close_timeout = self.config.close_timeout();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    close_best_effort(session.as_ref(), close_timeout).await;
                });
            }
            Err(_) => tracing::debug!("no runtime; dropping rejected session without close"),
        }
    }

    /// Signals the addressed tasks and waits for their shutdown sequence to finish.
    /// Returns the ids that were stopped.
    pub async fn stop_job(&self, target: StopTarget) -> Result<Vec<TaskId>, RegistryError> {
        let completions = match target {
            StopTarget::Task(id) => vec![self.registry.cancel(id)?],
            StopTarget::All => self.registry.cancel_all(),
        };
        Ok(wait_all(completions).await)
    }

    pub fn get_status(&self, id: TaskId) -> Result<StatusSnapshot, RegistryError> {
        self.registry.status(id).ok_or(RegistryError::NotFound(id))
    }

    pub fn list(&self) -> Vec<StatusSnapshot> {
        self.registry.list()
    }

    pub fn history(&self) -> Vec<EngineReport> {
        self.registry.history()
    }

    /// Stops every running job and waits for all of them.
    pub async fn shutdown(&self) {
        let stopped = wait_all(self.registry.cancel_all()).await;
        if !stopped.is_empty() {
            tracing::info!(tasks = ?stopped, "stopped all dispatch tasks");
        }
    }
}

/// Awaits the engine; if it panicked, marks the task failed and closes its session, which the
/// engine could not do itself.
async fn supervise<F>(
    id: TaskId,
    run: F,
    status: Arc<EngineStatus>,
    session: Arc<dyn SessionHandle>,
    close_timeout: Duration,
) -> EngineReport
where
    F: Future<Output = EngineReport>,
{
    match std::panic::AssertUnwindSafe(run).catch_unwind().await {
        Ok(report) => report,
        Err(_) => {
            tracing::error!(task_id = id, "dispatch engine panicked");
            close_best_effort(session.as_ref(), close_timeout).await;
            status.finish(EngineState::Failed, Some("engine panicked".to_string()));
            EngineReport {
                status: status.snapshot(id),
                telemetry: TelemetrySnapshot::default(),
            }
        }
    }
}

async fn close_best_effort(session: &dyn SessionHandle, close_timeout: Duration) {
    let label = session.label();
    match timeout(close_timeout, session.close()).await {
        Ok(Ok(())) => tracing::debug!(session = label, "session closed"),
        Ok(Err(err)) => tracing::warn!(session = label, error = %err, "failed to close session"),
        Err(_) => tracing::warn!(
            session = label,
            timeout = ?close_timeout,
            "timed out closing session"
        ),
    }
}

async fn wait_all(completions: Vec<TaskCompletion>) -> Vec<TaskId> {
    let ids = completions.iter().map(TaskCompletion::id).collect();
    futures::future::join_all(completions.into_iter().map(TaskCompletion::wait)).await;
    ids
}
