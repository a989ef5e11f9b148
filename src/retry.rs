// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Retry and polling helpers.
//!
//! Two families live here:
//!
//! - Exponential backoff with jitter for Kubernetes and HTTP API calls
//!   ([`retry_api_call`], [`retry_on_conflict`]). Transient errors (429, 5xx)
//!   are retried while permanent errors (4xx client errors) fail fast.
//! - Fixed-interval polling of cloud resources until a condition holds
//!   ([`poll_until`]), honoring a deadline and a [`CancellationToken`].

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use rand::Rng;
use reqwest::StatusCode;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::constants::CONFLICT_RETRY_ATTEMPTS;
use crate::errors::InfraError;

/// Maximum total time to spend retrying (5 minutes)
const MAX_ELAPSED_TIME_SECS: u64 = 300;

/// Initial retry interval (100ms)
const INITIAL_INTERVAL_MILLIS: u64 = 100;

/// Maximum interval between retries (30 seconds)
const MAX_INTERVAL_SECS: u64 = 30;

/// Backoff multiplier (exponential growth factor)
const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
const RANDOMIZATION_FACTOR: f64 = 0.1;

/// HTTP retry initial interval (50ms)
const HTTP_INITIAL_INTERVAL_MILLIS: u64 = 50;

/// HTTP retry maximum interval (10 seconds)
const HTTP_MAX_INTERVAL_SECS: u64 = 10;

/// HTTP retry maximum elapsed time (2 minutes)
const HTTP_MAX_ELAPSED_TIME_SECS: u64 = 120;

/// Conflict retry initial interval (10ms)
const CONFLICT_INITIAL_INTERVAL_MILLIS: u64 = 10;

/// Conflict retry maximum interval (1 second)
const CONFLICT_MAX_INTERVAL_SECS: u64 = 1;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration, restored by [`ExponentialBackoff::reset`]
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Maximum total elapsed time
    pub max_elapsed_time: Option<Duration>,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
    /// Start time for tracking total elapsed time
    start_time: Instant,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        max_elapsed_time: Option<Duration>,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            max_elapsed_time,
            multiplier,
            randomization_factor,
            start_time: Instant::now(),
        }
    }

    /// Get the next backoff interval, or None if max elapsed time exceeded.
    pub fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max_elapsed) = self.max_elapsed_time {
            if self.start_time.elapsed() >= max_elapsed {
                return None;
            }
        }

        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        Some(jittered)
    }

    /// Restart the schedule from the initial interval.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.start_time = Instant::now();
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let mut rng = rand::thread_rng();
        let jittered = rng.gen_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Create default exponential backoff configuration for Kubernetes API retries.
///
/// # Configuration
///
/// - **Initial interval**: 100ms
/// - **Max interval**: 30 seconds
/// - **Max elapsed time**: 5 minutes total
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
#[must_use]
pub fn default_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(MAX_INTERVAL_SECS),
        Some(Duration::from_secs(MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Create exponential backoff configuration for IBM Cloud HTTP API retries.
///
/// # Configuration
///
/// - **Initial interval**: 50ms
/// - **Max interval**: 10 seconds
/// - **Max elapsed time**: 2 minutes total
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
#[must_use]
pub fn http_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(HTTP_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(HTTP_MAX_INTERVAL_SECS),
        Some(Duration::from_secs(HTTP_MAX_ELAPSED_TIME_SECS)),
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Create exponential backoff configuration for optimistic-concurrency retries.
///
/// Conflicts clear as soon as the object is re-read, so the schedule is short:
/// 10ms doubling up to 1 second, bounded by attempt count rather than time.
#[must_use]
pub fn conflict_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(CONFLICT_INITIAL_INTERVAL_MILLIS),
        Duration::from_secs(CONFLICT_MAX_INTERVAL_SECS),
        None,
        BACKOFF_MULTIPLIER,
        RANDOMIZATION_FACTOR,
    )
}

/// Determine if an HTTP status code is retryable.
///
/// # Retryable Status Codes
///
/// - **429** (Too Many Requests) - Rate limiting
/// - **500** (Internal Server Error) - Server error
/// - **502** (Bad Gateway) - Proxy/gateway error
/// - **503** (Service Unavailable) - Temporary unavailability
/// - **504** (Gateway Timeout) - Gateway timeout
#[must_use]
pub fn is_retryable_http_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

/// Retry a Kubernetes API call with exponential backoff.
///
/// Automatically retries on transient errors (HTTP 429, 5xx) and fails immediately
/// on permanent errors (4xx client errors except 429).
///
/// # Errors
///
/// Returns error if:
/// - Non-retryable error encountered (4xx client error)
/// - Max elapsed time exceeded (5 minutes)
/// - All retries exhausted
///
/// # Example
///
/// ```no_run
/// use kube::{Api, Client};
/// use k8s_openapi::api::core::v1::Secret;
/// use hostedcp::retry::retry_api_call;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::try_default().await?;
/// let api: Api<Secret> = Api::namespaced(client, "clusters-example");
///
/// let secret = retry_api_call(|| async { api.get("pki").await }, "get pki secret").await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_api_call<T, F, Fut>(mut operation: F, operation_name: &str) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = default_backoff();
    let start_time = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        "Kubernetes API call succeeded after retries"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                if !is_retryable_kube_error(&e) {
                    error!(
                        operation = operation_name,
                        error = %e,
                        "Non-retryable Kubernetes API error, failing immediately"
                    );
                    return Err(e.into());
                }

                if let Some(duration) = backoff.next_backoff() {
                    warn!(
                        operation = operation_name,
                        attempt = attempt,
                        retry_after = ?duration,
                        error = %e,
                        "Retryable Kubernetes API error, will retry"
                    );
                    tokio::time::sleep(duration).await;
                } else {
                    error!(
                        operation = operation_name,
                        attempt = attempt,
                        elapsed = ?start_time.elapsed(),
                        error = %e,
                        "Backoff exhausted, giving up"
                    );
                    return Err(anyhow::anyhow!(
                        "Backoff exhausted after {attempt} attempts: {e}"
                    ));
                }
            }
        }
    }
}

/// Retry a read-modify-write sequence while the API server reports a conflict.
///
/// The closure must re-read the object on every call so the next attempt
/// carries a fresh `resourceVersion`. Gives up after
/// [`CONFLICT_RETRY_ATTEMPTS`] attempts and returns the last error.
///
/// # Errors
///
/// Returns the first non-conflict error, or the last conflict once attempts
/// are exhausted.
pub async fn retry_on_conflict<T, F, Fut>(mut operation: F) -> Result<T, kube::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, kube::Error>>,
{
    let mut backoff = conflict_backoff();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Err(e) if is_conflict(&e) && attempt < CONFLICT_RETRY_ATTEMPTS => {
                let delay = backoff.next_backoff().unwrap_or(backoff.max_interval);
                debug!(attempt = attempt, retry_after = ?delay, "Conflict on update, retrying");
                tokio::time::sleep(delay).await;
            }
            other => return other,
        }
    }
}

/// Returns `true` for HTTP 409 responses.
#[must_use]
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(api_err) if api_err.code == 409)
}

/// Determine if a Kubernetes error is retryable.
///
/// # Retryable Errors
///
/// - **HTTP 429** (Too Many Requests) - Rate limiting
/// - **HTTP 5xx** (Server Errors) - Temporary API server issues
/// - **Service Errors** - Network/connection issues
#[must_use]
pub fn is_retryable_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(api_err) => {
            api_err.code == 429 || (api_err.code >= 500 && api_err.code < 600)
        }
        kube::Error::Service(_) => true,
        _ => false,
    }
}

// ============================================================================
// Polling
// ============================================================================

/// A condition checked repeatedly by [`poll_until`].
///
/// `check` returns `Ok(true)` once the condition holds, `Ok(false)` to keep
/// waiting and `Err` to abort (unless the error is transient).
pub trait Poll {
    /// Evaluate the condition once.
    fn check(&mut self) -> impl Future<Output = Result<bool, InfraError>> + Send;

    /// Human-readable description used in logs and timeout errors.
    fn describe(&self) -> String;
}

/// [`Poll`] implementation backed by a closure.
pub struct PollFn<F> {
    description: String,
    check: F,
}

/// Build a [`Poll`] from a description and a closure returning a future.
pub fn poll_fn<F, Fut>(description: impl Into<String>, check: F) -> PollFn<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<bool, InfraError>> + Send,
{
    PollFn {
        description: description.into(),
        check,
    }
}

impl<F, Fut> Poll for PollFn<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<bool, InfraError>> + Send,
{
    fn check(&mut self) -> impl Future<Output = Result<bool, InfraError>> + Send {
        (self.check)()
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Returns `true` when the error text contains one of the transient keywords.
#[must_use]
pub fn is_transient(err: &InfraError, keywords: &[&str]) -> bool {
    if matches!(err, InfraError::Transient(_)) {
        return true;
    }
    let message = err.to_string();
    keywords.iter().any(|k| message.contains(k))
}

/// Evaluate `poll` immediately and then every `interval` until it reports
/// done, fails terminally, `timeout` elapses or `cancel` fires.
///
/// Errors whose text contains one of `transient_keywords` are logged and
/// treated as "not done yet".
///
/// # Errors
///
/// - [`InfraError::Timeout`] when the deadline passes
/// - [`InfraError::Cancelled`] when the token is cancelled before a sleep
/// - The first terminal error returned by the condition
pub async fn poll_until<P: Poll>(
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    poll: &mut P,
    transient_keywords: &[&str],
) -> Result<(), InfraError> {
    let deadline = Instant::now() + timeout;

    loop {
        match poll.check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) if is_transient(&e, transient_keywords) => {
                warn!(operation = %poll.describe(), error = %e, "Transient error while polling, will retry");
            }
            Err(e) => return Err(e),
        }

        if Instant::now() + interval > deadline {
            return Err(InfraError::Timeout {
                operation: poll.describe(),
                timeout,
            });
        }

        if cancel.is_cancelled() {
            return Err(InfraError::Cancelled);
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(InfraError::Cancelled),
            () = tokio::time::sleep(interval) => {}
        }
    }
}

/// A [`Poll`] that keeps the last value it fetched.
struct Latest<T, F, R> {
    description: String,
    fetch: F,
    ready: R,
    latest: Option<T>,
}

impl<T, F, Fut, R> Poll for Latest<T, F, R>
where
    T: Send,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, InfraError>> + Send,
    R: Fn(&T) -> Result<bool, InfraError> + Send,
{
    fn check(&mut self) -> impl Future<Output = Result<bool, InfraError>> + Send {
        async move {
            let value = (self.fetch)().await?;
            let done = (self.ready)(&value)?;
            self.latest = Some(value);
            Ok::<_, InfraError>(done)
        }
    }

    fn describe(&self) -> String {
        self.description.clone()
    }
}

/// Poll like [`poll_until`], fetching a value each time and returning the one
/// `ready` accepted.
///
/// `ready` may return an error to abort, e.g. when a resource reports a
/// failed state.
///
/// # Errors
///
/// Same as [`poll_until`].
pub async fn wait_for<T, F, Fut, R>(
    description: impl Into<String>,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    fetch: F,
    ready: R,
    transient_keywords: &[&str],
) -> Result<T, InfraError>
where
    T: Send,
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, InfraError>> + Send,
    R: Fn(&T) -> Result<bool, InfraError> + Send,
{
    let mut poll = Latest {
        description: description.into(),
        fetch,
        ready,
        latest: None,
    };
    poll_until(interval, timeout, cancel, &mut poll, transient_keywords).await?;
    poll.latest.ok_or_else(|| InfraError::Timeout {
        operation: poll.description,
        timeout,
    })
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
