use crate::session::SessionError;
use std::sync::OnceLock;
use tokio_util::sync::CancellationToken;

/// Why an engine had to stop before its job was done.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FatalCause {
    #[error("worker {worker}: {error}")]
    Session { worker: usize, error: SessionError },
    #[error("worker {worker} panicked: {message}")]
    WorkerPanic { worker: usize, message: String },
}

/// Keeps the first engine-fatal cause and stops every worker of that engine.
#[derive(Debug)]
pub struct FatalErrorHandler {
    run_token: CancellationToken,
    first: OnceLock<FatalCause>,
}

impl FatalErrorHandler {
    pub fn new(run_token: CancellationToken) -> Self {
        Self {
            run_token,
            first: OnceLock::new(),
        }
    }

    /// Cancels the run. Returns `false` when an earlier cause was already recorded; later
    /// causes are logged at debug level and dropped.
    pub fn raise(&self, cause: FatalCause) -> bool {
        let recorded = match self.first.set(cause) {
            Ok(()) => {
                if let Some(cause) = self.first.get() {
                    tracing::error!(error = %cause, "fatal engine error; stopping workers");
                }
                true
            }
            Err(late) => {
                tracing::debug!(error = %late, "fatal error after engine already stopping");
                false
            }
        };
        self.run_token.cancel();
        recorded
    }

    pub fn is_triggered(&self) -> bool {
        self.first.get().is_some()
    }

    pub fn cause(&self) -> Option<FatalCause> {
        self.first.get().cloned()
    }
}
