//! Worker pool orchestration for a dispatch engine.
//!
//! Owns worker creation and turns panicking workers into engine-fatal errors so a broken
//! worker can never leave the engine waiting forever.

use super::worker::{Worker, WorkerExit, WorkerShared};
use crate::runtime::fatal::{FatalCause, FatalErrorHandler};
use futures::FutureExt;
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) struct WorkerPool {
    workers: Vec<JoinHandle<WorkerExit>>,
}

impl WorkerPool {
    pub(crate) fn launch(
        size: usize,
        shared: WorkerShared,
        run_token: CancellationToken,
        fatal_handler: Arc<FatalErrorHandler>,
    ) -> Self {
        let size = size.max(1);
        let mut workers = Vec::with_capacity(size);

        for worker_id in 0..size {
            let worker = Worker::new(
                worker_id,
                shared.clone(),
                run_token.clone(),
                fatal_handler.clone(),
            );
            let telemetry = shared.telemetry.clone();
            let fatal_handler = fatal_handler.clone();

            telemetry.worker_started();
            let handle = tokio::spawn(async move {
                let result = std::panic::AssertUnwindSafe(worker.run())
                    .catch_unwind()
                    .await;

                let exit = match result {
                    Ok(exit) => exit,
                    Err(panic_payload) => {
                        fatal_handler.raise(FatalCause::WorkerPanic {
                            worker: worker_id,
                            message: panic_message(panic_payload.as_ref()),
                        });
                        WorkerExit::Fatal
                    }
                };

                telemetry.worker_stopped();
                exit
            });

            workers.push(handle);
        }

        Self { workers }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }

    /// Waits for every worker to leave its loop.
    pub(crate) async fn join(self) -> Vec<WorkerExit> {
        let results = futures::future::join_all(self.workers).await;
        results
            .into_iter()
            .enumerate()
            .map(|(worker_id, result)| match result {
                Ok(exit) => exit,
                Err(err) => {
                    tracing::error!(worker = worker_id, error = %err, "worker task aborted");
                    WorkerExit::Stopped
                }
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
