// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `retry.rs`

#[cfg(test)]
mod tests {
    use super::super::{
        conflict_backoff, default_backoff, http_backoff, is_retryable_http_status,
        is_retryable_kube_error, is_transient, poll_fn, poll_until, retry_on_conflict, wait_for,
    };
    use crate::errors::InfraError;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Test that backoff configuration has expected values
    #[test]
    fn test_backoff_configuration() {
        let backoff = default_backoff();

        assert_eq!(
            backoff.initial_interval,
            Duration::from_millis(100),
            "Initial interval should be 100ms"
        );
        assert_eq!(
            backoff.max_interval,
            Duration::from_secs(30),
            "Max interval should be 30 seconds"
        );
        assert_eq!(
            backoff.max_elapsed_time,
            Some(Duration::from_secs(300)),
            "Max elapsed time should be 5 minutes"
        );
    }

    #[test]
    fn test_http_backoff_is_shorter() {
        let http = http_backoff();
        let kube = default_backoff();
        assert!(http.initial_interval < kube.initial_interval);
        assert!(http.max_interval < kube.max_interval);
    }

    #[test]
    fn test_conflict_backoff_has_no_deadline() {
        let backoff = conflict_backoff();
        assert_eq!(backoff.max_elapsed_time, None);
        assert_eq!(backoff.max_interval, Duration::from_secs(1));
    }

    /// Test that backoff grows exponentially and is capped at max interval
    #[test]
    fn test_backoff_growth_is_capped() {
        let mut backoff = http_backoff();
        backoff.randomization_factor = 0.0;

        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(50)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(100)));
        assert_eq!(backoff.next_backoff(), Some(Duration::from_millis(200)));

        for _ in 0..20 {
            backoff.next_backoff();
        }
        assert_eq!(backoff.current_interval, Duration::from_secs(10));

        backoff.reset();
        assert_eq!(backoff.current_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let mut backoff = default_backoff();
        for _ in 0..50 {
            backoff.reset();
            let d = backoff.next_backoff().unwrap_or_default();
            assert!(d >= Duration::from_millis(90) && d <= Duration::from_millis(110));
        }
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_http_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_http_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_http_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_http_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn test_kube_errors_classification() {
        assert!(is_retryable_kube_error(&api_error(429)), "429 should be retryable");
        assert!(is_retryable_kube_error(&api_error(503)), "5xx should be retryable");
        assert!(!is_retryable_kube_error(&api_error(404)), "404 is permanent");
        assert!(!is_retryable_kube_error(&api_error(409)), "409 is handled by conflict retry");
    }

    #[test]
    fn test_is_transient_keywords() {
        let keywords = ["status 522", "status 524"];
        let err = InfraError::Config("got status 522 from edge".to_string());
        assert!(is_transient(&err, &keywords));

        let err = InfraError::Config("status 500".to_string());
        assert!(!is_transient(&err, &keywords));

        assert!(is_transient(&InfraError::Transient("x".to_string()), &[]));
    }

    #[tokio::test]
    async fn test_retry_on_conflict_retries_then_succeeds() {
        let calls = AtomicUsize::new(0);
        let calls_ref = &calls;
        let result = retry_on_conflict(|| async move {
            if calls_ref.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(api_error(409))
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(result.ok(), Some("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_on_conflict_fails_fast_on_other_errors() {
        let calls = AtomicUsize::new(0);
        let calls_ref = &calls;
        let result: Result<(), _> = retry_on_conflict(|| async move {
            calls_ref.fetch_add(1, Ordering::SeqCst);
            Err(api_error(403))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_succeeds_after_transient_errors() {
        let calls = AtomicUsize::new(0);
        let calls_ref = &calls;
        let mut poll = poll_fn("resource ready", || async move {
            match calls_ref.fetch_add(1, Ordering::SeqCst) {
                0 => Err(InfraError::Config("status 524 gateway timeout".to_string())),
                1 => Ok(false),
                _ => Ok(true),
            }
        });

        let cancel = CancellationToken::new();
        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(60),
            &cancel,
            &mut poll,
            &["status 524"],
        )
        .await;

        assert!(result.is_ok(), "poll should succeed: {result:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_aborts_on_terminal_error() {
        let mut poll = poll_fn("dhcp active", || async {
            Err(InfraError::Policy("dhcp service is in error state".to_string()))
        });
        let cancel = CancellationToken::new();

        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(60),
            &cancel,
            &mut poll,
            &["status 522"],
        )
        .await;

        assert!(matches!(result, Err(InfraError::Policy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_until_times_out() {
        let mut poll = poll_fn("never ready", || async { Ok(false) });
        let cancel = CancellationToken::new();

        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(20),
            &cancel,
            &mut poll,
            &[],
        )
        .await;

        match result {
            Err(InfraError::Timeout { operation, timeout }) => {
                assert_eq!(operation, "never ready");
                assert_eq!(timeout, Duration::from_secs(20));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_until_honors_cancellation() {
        let mut poll = poll_fn("cancelled", || async { Ok(false) });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = poll_until(
            Duration::from_secs(5),
            Duration::from_secs(60),
            &cancel,
            &mut poll,
            &[],
        )
        .await;

        assert!(matches!(result, Err(InfraError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_returns_accepted_value() {
        let calls = AtomicUsize::new(0);
        let calls_ref = &calls;
        let cancel = CancellationToken::new();

        let value = wait_for(
            "counter reaches 3",
            Duration::from_secs(5),
            Duration::from_secs(60),
            &cancel,
            || async move { Ok(calls_ref.fetch_add(1, Ordering::SeqCst) + 1) },
            |n: &usize| Ok(*n >= 3),
            &[],
        )
        .await;

        assert_eq!(value.ok(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_wait_for_aborts_when_ready_fails() {
        let cancel = CancellationToken::new();

        let result = wait_for(
            "dhcp server",
            Duration::from_secs(60),
            Duration::from_secs(600),
            &cancel,
            || async { Ok("ERROR".to_string()) },
            |status: &String| {
                if status == "ERROR" {
                    Err(InfraError::State {
                        kind: "dhcp server",
                        name: "d-1".to_string(),
                        state: status.clone(),
                    })
                } else {
                    Ok(false)
                }
            },
            &[],
        )
        .await;

        assert!(matches!(result, Err(InfraError::State { .. })));
    }
}
