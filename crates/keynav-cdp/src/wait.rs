//! Polling helpers for browser state.
//!
//! Keys go into the page and the extension reacts asynchronously, so every
//! assertion on browser state is a poll: evaluate a predicate on a fixed
//! interval until it holds or the timeout elapses. Timeouts only bound the
//! poll; they never cancel a browser operation that is already in flight.

use crate::error::{HarnessError, Result};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Default timeout for wait operations (6 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(6000);

/// Default poll interval for checking conditions (100ms).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Timeout and poll interval for a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    /// Maximum time to wait for the condition.
    pub timeout: Duration,

    /// How often to check if the condition is satisfied.
    pub poll_interval: Duration,
}

impl WaitConfig {
    /// Creates a new wait configuration.
    #[must_use]
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Creates a config with custom timeout and default poll interval.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }

    /// Creates a config from millisecond values, as found in config files.
    #[must_use]
    pub fn from_millis(timeout_ms: u64, interval_ms: u64) -> Self {
        Self::new(
            Duration::from_millis(timeout_ms),
            Duration::from_millis(interval_ms),
        )
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }
}

/// Waits for a condition to become true, with timeout.
///
/// The last evaluation happens on the poll that crosses the deadline.
///
/// # Example
///
/// ```ignore
/// wait_for(
///     || async { hints_visible().await },
///     WaitConfig::default(),
///     "hints to appear",
/// ).await?;
/// ```
pub async fn wait_for<F, Fut>(condition: F, config: WaitConfig, description: &str) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = Instant::now();

    loop {
        if condition().await {
            return Ok(());
        }

        if start.elapsed() >= config.timeout {
            return Err(timeout_error(description, config));
        }

        sleep(config.poll_interval).await;
    }
}

/// Waits for a condition that returns a `Result<bool>`.
///
/// Errors from the condition count as "not yet": a script evaluated while a
/// page is mid-navigation fails transiently, and the next poll usually
/// succeeds.
pub async fn wait_for_result<F, Fut>(
    condition: F,
    config: WaitConfig,
    description: &str,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    wait_for_value(
        || {
            let fut = condition();
            async move { fut.await.map(|ready| ready.then_some(())) }
        },
        config,
        description,
    )
    .await
}

/// Polls a producer until it yields `Some`, returning that value.
///
/// Like [`wait_for_result`], errors are treated as transient. If the wait
/// times out and the last poll was an error, it is logged before the
/// timeout error is returned.
pub async fn wait_for_value<T, F, Fut>(
    producer: F,
    config: WaitConfig,
    description: &str,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();

    loop {
        let last_error = match producer().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => None,
            Err(err) => Some(err),
        };

        if start.elapsed() >= config.timeout {
            if let Some(err) = last_error {
                tracing::debug!(condition = description, error = %err, "last poll failed");
            }
            return Err(timeout_error(description, config));
        }

        sleep(config.poll_interval).await;
    }
}

fn timeout_error(description: &str, config: WaitConfig) -> HarnessError {
    HarnessError::WaitTimeout {
        condition: description.to_string(),
        timeout: config.timeout,
    }
}
