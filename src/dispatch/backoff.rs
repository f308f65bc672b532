use crate::runtime::config::DispatchConfig;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::task::yield_now;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Typed retry policy applied uniformly by workers: bounded attempts, doubling delay with a cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    max_attempts: usize,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_attempts: usize) -> Self {
        Self {
            initial_delay,
            max_delay: max_delay.max(initial_delay),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Policy for one (target, message) pair.
    pub fn for_sends(config: &DispatchConfig) -> Self {
        Self::new(
            config.retry_delay(),
            config.max_retry_delay(),
            config.send_attempts(),
        )
    }

    /// Fixed-delay policy for a worker's periodic channel refresh.
    pub fn for_refresh(config: &DispatchConfig) -> Self {
        Self::new(
            config.refresh_retry_delay(),
            config.refresh_retry_delay(),
            config.refresh_attempts(),
        )
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay slept after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = next_backoff(delay, self.max_delay);
        }
        delay
    }
}

pub enum RetryDisposition {
    Retry,
    Abort,
}

/// Why a retried operation did not produce a value.
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; `last` is the final one.
    Exhausted { attempts: usize, last: E },
    /// The classifier refused to retry this error.
    Aborted(E),
    /// The cancellation token fired at a retry boundary.
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryError::Exhausted { attempts, last } => {
                write!(f, "gave up after {attempts} attempt(s): {last}")
            }
            RetryError::Aborted(err) => write!(f, "aborted: {err}"),
            RetryError::Cancelled => f.write_str("retry cancelled"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Runs `operation` until it succeeds, the classifier aborts, attempts run out, or `cancellation`
/// fires. Cancellation is observed before each attempt and during the backoff sleep; an attempt
/// already in flight is never interrupted.
pub async fn retry_with_backoff<T, E, F, Fut, L, C>(
    policy: RetryPolicy,
    cancellation: &CancellationToken,
    mut operation: F,
    mut on_retry: L,
    mut classify_error: C,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    L: FnMut(usize, Duration, &E, bool),
    C: FnMut(usize, &E) -> RetryDisposition,
{
    let mut attempt = 0;
    let mut backoff = policy.initial_delay;

    loop {
        attempt += 1;

        if cancellation.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => match classify_error(attempt, &err) {
                RetryDisposition::Abort => return Err(RetryError::Aborted(err)),
                RetryDisposition::Retry => {
                    let exhausted = attempt >= policy.max_attempts;

                    on_retry(attempt, backoff, &err, !exhausted);

                    if exhausted {
                        return Err(RetryError::Exhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }

                    if !sleep_with_cancellation(backoff, cancellation).await {
                        return Err(RetryError::Cancelled);
                    }
                    backoff = next_backoff(backoff, policy.max_delay);
                }
            },
        }
    }
}

/// Sleeps for `delay` unless `cancellation` fires first. Returns `false` when cancelled.
pub(crate) async fn sleep_with_cancellation(
    delay: Duration,
    cancellation: &CancellationToken,
) -> bool {
    if delay.is_zero() {
        yield_now().await;
        return !cancellation.is_cancelled();
    }

    tokio::select! {
        _ = cancellation.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

fn next_backoff(current: Duration, max_backoff: Duration) -> Duration {
    if current.is_zero() {
        return max_backoff.min(Duration::from_millis(1));
    }

    let mut next = current.saturating_mul(2);
    if next > max_backoff {
        next = max_backoff;
    }
    next
}
