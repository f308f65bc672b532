//! Per-run scope of a `DispatchEngine`: the run token workers watch, the fatal-error slot,
//! and the metrics reporter.

use super::registry::TaskId;
use crate::runtime::fatal::{FatalCause, FatalErrorHandler};
use crate::runtime::telemetry::{spawn_metrics_reporter, DispatchTelemetry};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct RunScope {
    task_id: TaskId,
    token: CancellationToken,
    fatal: Arc<FatalErrorHandler>,
    reporter: JoinHandle<()>,
}

impl RunScope {
    /// The run token is a child of `shutdown`: an external stop reaches every worker, while a
    /// worker ending the run (repeat count reached, fatal error) leaves `shutdown` untouched.
    pub(crate) fn open(
        task_id: TaskId,
        shutdown: &CancellationToken,
        telemetry: Arc<DispatchTelemetry>,
        metrics_interval: Duration,
    ) -> Self {
        let token = shutdown.child_token();
        let fatal = Arc::new(FatalErrorHandler::new(token.clone()));
        let reporter = spawn_metrics_reporter(task_id, telemetry, token.clone(), metrics_interval);

        Self {
            task_id,
            token,
            fatal,
            reporter,
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub(crate) fn fatal_handler(&self) -> Arc<FatalErrorHandler> {
        self.fatal.clone()
    }

    /// Ends the run and returns the fatal cause, if any worker raised one.
    pub(crate) async fn close(self) -> Option<FatalCause> {
        self.token.cancel();
        if let Err(err) = self.reporter.await {
            tracing::warn!(task_id = self.task_id, error = %err, "metrics reporter task panicked");
        }
        self.fatal.cause()
    }
}
