use super::backoff::{retry_with_backoff, sleep_with_cancellation, RetryDisposition, RetryError, RetryPolicy};
use super::cursor::Cursor;
use crate::job::JobPlan;
use crate::runtime::config::DispatchConfig;
use crate::runtime::fatal::{FatalCause, FatalErrorHandler};
use crate::runtime::progress::{SendProgress, SendRecord};
use crate::runtime::telemetry::DispatchTelemetry;
use crate::session::{SessionError, SessionFuture, SessionHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

/// Why a worker left its loop.
#[derive(Debug)]
pub(crate) enum WorkerExit {
    /// The run token was cancelled.
    Stopped,
    /// This worker recorded the send that reached the repeat count.
    LimitReached,
    /// A single-pass cursor ran out of positions.
    Exhausted,
    /// The periodic refresh failed after its own retries; only this worker stops.
    RefreshFailed(SessionError),
    /// The session reported an unrecoverable error; the whole engine stops.
    Fatal,
}

/// State shared by every worker of one engine.
#[derive(Clone)]
pub(crate) struct WorkerShared {
    pub plan: Arc<JobPlan>,
    pub session: Arc<dyn SessionHandle>,
    pub cursor: Arc<Cursor>,
    pub progress: Arc<SendProgress>,
    pub telemetry: Arc<DispatchTelemetry>,
    pub config: Arc<DispatchConfig>,
}

pub(crate) struct Worker {
    pub id: usize,
    shared: WorkerShared,
    shutdown: CancellationToken,
    fatal_handler: Arc<FatalErrorHandler>,
    send_policy: RetryPolicy,
    refresh_policy: RetryPolicy,
}

enum PairOutcome {
    Sent,
    Skipped,
    Stop(WorkerExit),
}

impl Worker {
    pub fn new(
        id: usize,
        shared: WorkerShared,
        shutdown: CancellationToken,
        fatal_handler: Arc<FatalErrorHandler>,
    ) -> Self {
        let send_policy = RetryPolicy::for_sends(&shared.config);
        let refresh_policy = RetryPolicy::for_refresh(&shared.config);
        Self {
            id,
            shared,
            shutdown,
            fatal_handler,
            send_policy,
            refresh_policy,
        }
    }

    #[tracing::instrument(name = "worker", skip_all, fields(worker = self.id))]
    pub async fn run(self) -> WorkerExit {
        tracing::debug!(worker = self.id, "worker task started");

        let refresh_interval = self.shared.config.refresh_interval();
        let mut last_refresh = Instant::now();

        loop {
            if self.shutdown.is_cancelled() {
                tracing::debug!(worker = self.id, "stop requested; exiting worker loop");
                return WorkerExit::Stopped;
            }

            if last_refresh.elapsed() >= refresh_interval {
                if let Err(exit) = self.refresh().await {
                    return exit;
                }
                last_refresh = Instant::now();
            }

            let Some(position) = self.shared.cursor.claim() else {
                tracing::debug!(worker = self.id, "cursor exhausted");
                return WorkerExit::Exhausted;
            };

            match self.deliver(position).await {
                PairOutcome::Sent => {
                    let pacing = self.shared.config.pacing_delay();
                    if !sleep_with_cancellation(pacing, &self.shutdown).await {
                        return WorkerExit::Stopped;
                    }
                }
                PairOutcome::Skipped => {}
                PairOutcome::Stop(exit) => return exit,
            }
        }
    }

    async fn deliver(&self, position: u64) -> PairOutcome {
        let (target, message) = self.shared.plan.pair(position);
        let session = self.shared.session.as_ref();
        let io_timeout = self.shared.config.io_timeout();
        let telemetry = &self.shared.telemetry;
        let worker = self.id;

        let result = retry_with_backoff(
            self.send_policy,
            &self.shutdown,
            move |_attempt| bounded(io_timeout, "send", session.send_one(target, message)),
            |attempt, delay, err: &SessionError, will_retry| {
                record_failure(telemetry, err);
                if will_retry {
                    tracing::debug!(
                        worker,
                        target = %target,
                        attempt,
                        retry_in = ?delay,
                        error = %err,
                        "send failed; retrying"
                    );
                }
            },
            |_, err: &SessionError| {
                if err.is_retryable() {
                    RetryDisposition::Retry
                } else {
                    RetryDisposition::Abort
                }
            },
        )
        .await;

        let pair_finished = match &result {
            Ok(()) | Err(RetryError::Exhausted { .. }) => true,
            Err(RetryError::Aborted(err)) => !err.is_fatal(),
            Err(RetryError::Cancelled) => false,
        };
        if pair_finished {
            self.shared.cursor.finish();
        }

        match result {
            Ok(()) => match self.shared.progress.record_success() {
                SendRecord::Counted {
                    total,
                    limit_reached,
                } => {
                    telemetry.record_sent();
                    tracing::debug!(
                        worker,
                        position,
                        target = %target,
                        message = %message.preview(),
                        sent = total,
                        "message sent"
                    );
                    if limit_reached {
                        tracing::info!(worker, sent = total, "repeat count reached; stopping workers");
                        self.shutdown.cancel();
                        PairOutcome::Stop(WorkerExit::LimitReached)
                    } else {
                        PairOutcome::Sent
                    }
                }
                SendRecord::Discarded => {
                    telemetry.record_discarded();
                    PairOutcome::Stop(WorkerExit::Stopped)
                }
            },
            Err(RetryError::Exhausted { attempts, last }) => {
                telemetry.record_skipped_pair();
                tracing::warn!(
                    worker,
                    position,
                    target = %target,
                    attempts,
                    error = %last,
                    "giving up on pair after exhausting retries"
                );
                PairOutcome::Skipped
            }
            Err(RetryError::Aborted(err)) => {
                record_failure(telemetry, &err);
                if err.is_fatal() {
                    self.fatal_handler
                        .raise(FatalCause::Session { worker, error: err });
                    PairOutcome::Stop(WorkerExit::Fatal)
                } else {
                    telemetry.record_skipped_pair();
                    tracing::warn!(
                        worker,
                        position,
                        target = %target,
                        error = %err,
                        "target rejected message; skipping pair"
                    );
                    PairOutcome::Skipped
                }
            }
            Err(RetryError::Cancelled) => PairOutcome::Stop(WorkerExit::Stopped),
        }
    }

    async fn refresh(&self) -> Result<(), WorkerExit> {
        let session = self.shared.session.as_ref();
        let io_timeout = self.shared.config.io_timeout();
        let worker = self.id;

        tracing::debug!(worker, "refreshing session channel");

        let result = retry_with_backoff(
            self.refresh_policy,
            &self.shutdown,
            move |_attempt| bounded(io_timeout, "refresh", session.refresh(worker)),
            |attempt, delay, err: &SessionError, will_retry| {
                if will_retry {
                    tracing::warn!(
                        worker,
                        attempt,
                        retry_in = ?delay,
                        error = %err,
                        "refresh failed; retrying"
                    );
                }
            },
            |_, err: &SessionError| {
                if err.is_fatal() {
                    RetryDisposition::Abort
                } else {
                    RetryDisposition::Retry
                }
            },
        )
        .await;

        match result {
            Ok(()) => {
                self.shared.telemetry.record_refresh();
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                tracing::error!(
                    worker,
                    attempts,
                    error = %last,
                    "refresh failed; worker stopping"
                );
                Err(WorkerExit::RefreshFailed(last))
            }
            Err(RetryError::Aborted(err)) => {
                self.fatal_handler
                    .raise(FatalCause::Session { worker, error: err });
                Err(WorkerExit::Fatal)
            }
            Err(RetryError::Cancelled) => Err(WorkerExit::Stopped),
        }
    }
}

fn record_failure(telemetry: &DispatchTelemetry, err: &SessionError) {
    if matches!(err, SessionError::Timeout { .. }) {
        telemetry.record_timeout();
    } else {
        telemetry.record_failed_attempt();
    }
}

/// Bounds one session call; an elapsed deadline becomes a retryable [`SessionError::Timeout`].
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: &'static str,
    call: SessionFuture<'_, T>,
) -> Result<T, SessionError> {
    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Timeout { operation }),
    }
}
