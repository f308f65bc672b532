use crate::runtime::telemetry;
use crate::session::DEFAULT_RESOLVER_LIMIT;
use anyhow::{bail, Result};
use std::time::Duration;

const DEFAULT_SEND_ATTEMPTS: usize = 3;
const DEFAULT_RETRY_DELAY_MS: u64 = 500;
const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 1_000;
const DEFAULT_PACING_DELAY_MS: u64 = 240;
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
const DEFAULT_REFRESH_ATTEMPTS: usize = 3;
const DEFAULT_REFRESH_RETRY_DELAY_SECS: u64 = 2;
const DEFAULT_IO_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CLOSE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Policy knobs for dispatch engines.
///
/// All instances must be constructed via [`DispatchConfig::builder`] or
/// [`DispatchConfig::default`] so invariants are validated before an engine observes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    send_attempts: usize,
    retry_delay: Duration,
    max_retry_delay: Duration,
    pacing_delay: Duration,
    refresh_interval: Duration,
    refresh_attempts: usize,
    refresh_retry_delay: Duration,
    io_timeout: Duration,
    close_timeout: Duration,
    metrics_interval: Duration,
    max_concurrency: usize,
    resolver_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_attempts: DEFAULT_SEND_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_retry_delay: Duration::from_millis(DEFAULT_MAX_RETRY_DELAY_MS),
            pacing_delay: Duration::from_millis(DEFAULT_PACING_DELAY_MS),
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            refresh_attempts: DEFAULT_REFRESH_ATTEMPTS,
            refresh_retry_delay: Duration::from_secs(DEFAULT_REFRESH_RETRY_DELAY_SECS),
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            close_timeout: Duration::from_secs(DEFAULT_CLOSE_TIMEOUT_SECS),
            metrics_interval: telemetry::DEFAULT_METRICS_INTERVAL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            resolver_limit: DEFAULT_RESOLVER_LIMIT,
        }
    }
}

impl DispatchConfig {
    /// Returns a builder seeded with the defaults.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Attempts per (target, message) pair before it is skipped.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts
    }

    /// Delay before the first retry; doubles per attempt up to [`Self::max_retry_delay`].
    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn max_retry_delay(&self) -> Duration {
        self.max_retry_delay
    }

    /// Pause after every successful send.
    pub fn pacing_delay(&self) -> Duration {
        self.pacing_delay
    }

    /// Wall-clock interval after which each worker refreshes its channel.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn refresh_attempts(&self) -> usize {
        self.refresh_attempts
    }

    pub fn refresh_retry_delay(&self) -> Duration {
        self.refresh_retry_delay
    }

    /// Upper bound for any single send, refresh, or listing call.
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Interval used by the per-engine metrics reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Largest worker count a job may request.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Number of targets offered by the resolver.
    pub fn resolver_limit(&self) -> usize {
        self.resolver_limit
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.send_attempts == 0 {
            bail!("send_attempts must be greater than 0");
        }

        if self.retry_delay.is_zero() {
            bail!("retry_delay must be greater than 0");
        }

        if self.max_retry_delay < self.retry_delay {
            bail!("max_retry_delay must be at least retry_delay");
        }

        if self.refresh_interval.is_zero() {
            bail!("refresh_interval must be greater than 0");
        }

        if self.refresh_attempts == 0 {
            bail!("refresh_attempts must be greater than 0");
        }

        if self.refresh_retry_delay.is_zero() {
            bail!("refresh_retry_delay must be greater than 0");
        }

        if self.io_timeout.is_zero() {
            bail!("io_timeout must be greater than 0");
        }

        if self.close_timeout.is_zero() {
            bail!("close_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        if self.max_concurrency == 0 {
            bail!("max_concurrency must be greater than 0");
        }

        if self.resolver_limit == 0 {
            bail!("resolver_limit must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct DispatchConfigBuilder {
    send_attempts: Option<usize>,
    retry_delay: Option<Duration>,
    max_retry_delay: Option<Duration>,
    pacing_delay: Option<Duration>,
    refresh_interval: Option<Duration>,
    refresh_attempts: Option<usize>,
    refresh_retry_delay: Option<Duration>,
    io_timeout: Option<Duration>,
    close_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    max_concurrency: Option<usize>,
    resolver_limit: Option<usize>,
}

impl DispatchConfigBuilder {
    pub fn send_attempts(mut self, attempts: usize) -> Self {
        self.send_attempts = Some(attempts);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = Some(delay);
        self
    }

    pub fn pacing_delay(mut self, delay: Duration) -> Self {
        self.pacing_delay = Some(delay);
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn refresh_attempts(mut self, attempts: usize) -> Self {
        self.refresh_attempts = Some(attempts);
        self
    }

    pub fn refresh_retry_delay(mut self, delay: Duration) -> Self {
        self.refresh_retry_delay = Some(delay);
        self
    }

    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn max_concurrency(mut self, workers: usize) -> Self {
        self.max_concurrency = Some(workers);
        self
    }

    pub fn resolver_limit(mut self, limit: usize) -> Self {
        self.resolver_limit = Some(limit);
        self
    }

    pub fn build(self) -> Result<DispatchConfig> {
        let defaults = DispatchConfig::default();
        let config = DispatchConfig {
            send_attempts: self.send_attempts.unwrap_or(defaults.send_attempts),
            retry_delay: self.retry_delay.unwrap_or(defaults.retry_delay),
            max_retry_delay: self.max_retry_delay.unwrap_or(defaults.max_retry_delay),
            pacing_delay: self.pacing_delay.unwrap_or(defaults.pacing_delay),
            refresh_interval: self.refresh_interval.unwrap_or(defaults.refresh_interval),
            refresh_attempts: self.refresh_attempts.unwrap_or(defaults.refresh_attempts),
            refresh_retry_delay: self
                .refresh_retry_delay
                .unwrap_or(defaults.refresh_retry_delay),
            io_timeout: self.io_timeout.unwrap_or(defaults.io_timeout),
            close_timeout: self.close_timeout.unwrap_or(defaults.close_timeout),
            metrics_interval: self.metrics_interval.unwrap_or(defaults.metrics_interval),
            max_concurrency: self.max_concurrency.unwrap_or(defaults.max_concurrency),
            resolver_limit: self.resolver_limit.unwrap_or(defaults.resolver_limit),
        };

        config.validate()?;
        Ok(config)
    }
}
