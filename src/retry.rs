use log::{debug, warn};
use rand::random;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::error::{MetricsError, Result};
use crate::util::shutdown;

/// Backoff schedule: one delay per retry
///
/// The operation is attempted once, then once more after each delay, so an
/// empty schedule means a single attempt with no retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub delays: Vec<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryConfig {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// A schedule that never retries
    pub fn disabled() -> Self {
        Self { delays: Vec::new() }
    }

    pub fn is_enabled(&self) -> bool {
        !self.delays.is_empty()
    }

    /// Total number of attempts this schedule allows
    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }
}

/// Execute a future with retry logic
///
/// Errors for which `is_retryable` returns false are returned immediately.
/// When the schedule is exhausted the last error is returned.
pub async fn execute_with_retry<F, Fut, T, C>(
    operation: F,
    config: &RetryConfig,
    is_retryable: C,
    context: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&MetricsError) -> bool,
{
    run_schedule(operation, config, is_retryable, None, context).await
}

/// A simplified version of execute_with_retry that retries transient errors
pub async fn retry<F, Fut, T>(operation: F, config: &RetryConfig, context: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_schedule(operation, config, MetricsError::is_transient, None, context).await
}

/// Like [`retry`], but abandons the remaining schedule once `stop` is set
///
/// An attempt already in flight is allowed to finish. A stop observed during
/// a backoff sleep returns the error of the last attempt.
pub async fn retry_until<F, Fut, T>(
    operation: F,
    config: &RetryConfig,
    stop: &mut watch::Receiver<bool>,
    context: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    run_schedule(operation, config, MetricsError::is_transient, Some(stop), context).await
}

async fn run_schedule<F, Fut, T, C>(
    mut operation: F,
    config: &RetryConfig,
    is_retryable: C,
    mut stop: Option<&mut watch::Receiver<bool>>,
    context: &str,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    C: Fn(&MetricsError) -> bool,
{
    let max_attempts = config.max_attempts();

    for (attempt, delay) in config.delays.iter().enumerate() {
        let err = match operation().await {
            Ok(result) => return Ok(result),
            Err(err) if is_retryable(&err) => err,
            Err(err) => return Err(err),
        };

        warn!(
            "{} (attempt {}/{}): {}",
            context,
            attempt + 1,
            max_attempts,
            err
        );
        debug!("Retrying after {:?} delay", delay);

        match stop.as_deref_mut() {
            Some(stop) => {
                let stopped = tokio::select! {
                    _ = sleep(*delay) => false,
                    _ = shutdown::wait(stop) => true,
                };
                if stopped {
                    debug!("{}: stop requested, abandoning retries", context);
                    return Err(err);
                }
            }
            None => sleep(*delay).await,
        }
    }

    operation().await
}

/// Builder for custom retry configurations
pub struct RetryBuilder {
    max_retries: usize,
    initial_delay_ms: u64,
    backoff_factor: f64,
    max_delay_ms: u64,
    jitter: bool,
}

impl Default for RetryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryBuilder {
    pub fn new() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 30_000, // 30 seconds
            jitter: false,
        }
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn initial_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    pub fn max_delay(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Expand the exponential parameters into an explicit schedule
    pub fn build(self) -> RetryConfig {
        let mut delays = Vec::with_capacity(self.max_retries);
        let mut delay_ms = self.initial_delay_ms.min(self.max_delay_ms);

        for _ in 0..self.max_retries {
            let actual = if self.jitter {
                delay_ms + random::<u64>() % 100
            } else {
                delay_ms
            };
            delays.push(Duration::from_millis(actual));

            // Calculate next delay with exponential backoff
            let next_delay_ms = (delay_ms as f64 * self.backoff_factor) as u64;
            delay_ms = next_delay_ms.min(self.max_delay_ms);
        }

        RetryConfig { delays }
    }
}

/// Parse a comma-separated list of seconds (`"1,3,5"`) into a schedule
pub fn parse_delays(raw: &str) -> Result<RetryConfig> {
    let mut delays = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let part = part.trim_end_matches('s');
        let secs = part.parse::<f64>().map_err(|e| {
            MetricsError::Config(format!("invalid backoff interval `{}`: {}", part, e))
        })?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(MetricsError::Config(format!(
                "invalid backoff interval `{}`",
                part
            )));
        }
        delays.push(Duration::from_secs_f64(secs));
    }
    Ok(RetryConfig { delays })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn transient() -> MetricsError {
        MetricsError::Transport("connection refused".to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::new(vec![Duration::from_secs(1), Duration::from_secs(3)]);
        let started = Instant::now();

        let result = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err(transient()) } else { Ok(n) } }
            },
            &config,
            "send",
        )
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Slept exactly once per delay
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_returns_immediately() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::new(vec![Duration::from_secs(1), Duration::from_secs(3)]);
        let started = Instant::now();

        let result: Result<()> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(MetricsError::Integrity("mismatch".to_string())) }
            },
            &config,
            "send",
        )
        .await;

        assert!(matches!(result, Err(MetricsError::Integrity(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_returns_last_error() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::new(vec![Duration::from_millis(10), Duration::from_millis(20)]);

        let result: Result<()> = retry(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(MetricsError::Transport(format!("attempt {}", n))) }
            },
            &config,
            "send",
        )
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(MetricsError::Transport(msg)) => assert_eq!(msg, "attempt 2"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::new(vec![
            Duration::from_secs(100),
            Duration::from_secs(300),
            Duration::from_secs(500),
        ]);
        let (tx, mut rx) = shutdown::channel();
        tokio::spawn(async move {
            sleep(Duration::from_millis(1_500)).await;
            let _ = tx.send(true);
        });
        let started = Instant::now();

        let result: Result<()> = retry_until(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(MetricsError::Transport(format!("attempt {}", n))) }
            },
            &config,
            &mut rx,
            "send",
        )
        .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            Err(MetricsError::Transport(msg)) => assert_eq!(msg, "attempt 0"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_succeeds_without_stop() {
        let calls = AtomicUsize::new(0);
        let config = RetryConfig::new(vec![Duration::from_secs(1)]);
        let (_tx, mut rx) = shutdown::channel();

        let result = retry_until(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err(transient()) } else { Ok(n) } }
            },
            &config,
            &mut rx,
            "send",
        )
        .await;

        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_schedule_runs_once() {
        let calls = AtomicUsize::new(0);

        let result: Result<()> = retry(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            },
            &RetryConfig::disabled(),
            "send",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder_exponential() {
        let config = RetryBuilder::new()
            .max_retries(4)
            .initial_delay(100)
            .backoff_factor(2.0)
            .max_delay(500)
            .build();

        assert_eq!(
            config.delays,
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(500),
            ]
        );
    }

    #[test]
    fn test_builder_jitter_bounds() {
        let config = RetryBuilder::new()
            .max_retries(3)
            .initial_delay(100)
            .backoff_factor(1.0)
            .with_jitter(true)
            .build();

        for delay in config.delays {
            assert!(delay >= Duration::from_millis(100));
            assert!(delay < Duration::from_millis(200));
        }
    }

    #[test]
    fn test_parse_delays() {
        let config = parse_delays("1, 3s,5").unwrap();
        assert_eq!(
            config.delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ]
        );
        assert!(parse_delays("").unwrap().delays.is_empty());
        assert!(parse_delays("1,x").is_err());
    }
}
