use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Rolling counters for one dispatch engine.
#[derive(Default, Debug)]
pub struct DispatchTelemetry {
    sent: AtomicU64,
    failed_attempts: AtomicU64,
    timeouts: AtomicU64,
    skipped_pairs: AtomicU64,
    discarded_sends: AtomicU64,
    refreshes: AtomicU64,
    workers_alive: AtomicUsize,
}

impl DispatchTelemetry {
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped_pair(&self) {
        self.skipped_pairs.fetch_add(1, Ordering::Relaxed);
    }

    /// A send that landed after the repeat count was already reached.
    pub fn record_discarded(&self) {
        self.discarded_sends.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn worker_started(&self) {
        self.workers_alive.fetch_add(1, Ordering::SeqCst);
    }

    pub fn worker_stopped(&self) {
        self.workers_alive.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn workers_alive(&self) -> usize {
        self.workers_alive.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            failed_attempts: self.failed_attempts.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            skipped_pairs: self.skipped_pairs.load(Ordering::Relaxed),
            discarded_sends: self.discarded_sends.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            workers_alive: self.workers_alive.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub sent: u64,
    pub failed_attempts: u64,
    pub timeouts: u64,
    pub skipped_pairs: u64,
    pub discarded_sends: u64,
    pub refreshes: u64,
    pub workers_alive: usize,
}

/// Spawns a background task that periodically logs send throughput and failure counters.
pub fn spawn_metrics_reporter(
    task_id: u64,
    telemetry: Arc<DispatchTelemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "courier::metrics", task_id, "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let sent_delta = current.sent.saturating_sub(last_snapshot.sent);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        sent_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "courier::metrics",
                        task_id,
                        throughput = format!("{throughput:.2}"),
                        sent = current.sent,
                        failed_attempts = current.failed_attempts,
                        timeouts = current.timeouts,
                        skipped_pairs = current.skipped_pairs,
                        discarded_sends = current.discarded_sends,
                        refreshes = current.refreshes,
                        workers_alive = current.workers_alive,
                        "dispatch metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
