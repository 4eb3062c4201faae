//! Transport-level retry with exponential backoff
//!
//! Wraps a single request in bounded retries. Jitter spreads retries from many
//! article tasks so they do not hit a recovering server in lockstep.
//!
//! Retries are layered so that no failure is retried by two layers:
//! - 429/503 are retried only by the backoff in [`crate::ethical`]
//! - the HTTP fetcher retries only connection failures (see [`is_connection_failure`])
//! - everything else [`IsRetryable`] accepts is retried per article by
//!   [`crate::retry_skip`]
//!
//! # Example
//!
//! ```no_run
//! use article_archiver::retry::{IsRetryable, with_retry};
//! use article_archiver::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! let cancel = tokio_util::sync::CancellationToken::new();
//! with_retry(&config, &cancel, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use crate::ethical::is_backoff_status;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, 5xx, connection reset) return `true`.
/// Permanent failures (robots.txt disallow, 404, bad URL, disk errors) return `false`,
/// and so do 429/503 and `RateLimited`, whose retry budget was already spent by the
/// rate-limit backoff.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| is_retryable_status(s.as_u16()))
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            Error::Timeout { .. } => true,
            Error::RateLimited { .. } => false,
            // robots.txt refusals are policy, never retried
            Error::PolicyDisallowed { .. } => false,
            Error::InvalidUrl { .. } => false,
            Error::TooLarge { .. } => false,
            Error::UnexpectedContent { .. } => false,
            Error::Source { .. } => false,
            Error::Feed(_) => false,
            Error::Config { .. } => false,
            Error::Serialization(_) => false,
            Error::Cancelled => false,
            Error::Other(_) => false,
        }
    }
}

/// 408, 429 and 5xx are transient
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

/// Transient statuses the rate-limit backoff has not already retried
fn is_retryable_status(status: u16) -> bool {
    is_transient_status(status) && !is_backoff_status(status)
}

/// Failures to reach the server at all; the only errors the HTTP fetcher
/// retries on its own
pub fn is_connection_failure(error: &Error) -> bool {
    match error {
        Error::Network(e) => e.is_connect(),
        Error::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
        ),
        _ => false,
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs once, then up to `config.max_attempts` more times while it
/// fails with a retryable error. Returns the successful result or the last error.
/// Cancelling `cancel` ends a pending backoff wait with the last error.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    with_retry_if(config, cancel, E::is_retryable, operation).await
}

/// [`with_retry`] with a custom test for which errors are worth another attempt
pub async fn with_retry_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    should_retry: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::debug!(attempts = attempt + 1, "Request succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if should_retry(&e) && attempt < config.max_attempts => {
                attempt += 1;

                tracing::debug!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Request failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(error = %e, "Retry wait cancelled");
                        return Err(e);
                    }
                    _ = tokio::time::sleep(jittered_delay) => {}
                }

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if should_retry(&e) {
                    tracing::debug!(
                        error = %e,
                        attempts = attempt + 1,
                        "Request failed after all transport retries"
                    );
                } else {
                    tracing::debug!(error = %e, "Request failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
pub(crate) fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&RetryConfig::default(), &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(2), &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            3,
            "should try initial + 2 retries"
        );
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(5), &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_max_attempts_fails_on_first_transient_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(0), &CancellationToken::new(), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_delays_increase_exponentially() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        };

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result = with_retry(&config, &CancellationToken::new(), || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 4, "initial + 3 retries = 4 calls");

        let gap1 = ts[1].duration_since(ts[0]);
        let gap2 = ts[2].duration_since(ts[1]);
        let gap3 = ts[3].duration_since(ts[2]);

        assert!(gap1 >= Duration::from_millis(40), "gap1 was {gap1:?}");
        assert!(gap2 >= Duration::from_millis(80), "gap2 was {gap2:?}");
        assert!(gap3 >= Duration::from_millis(160), "gap3 was {gap3:?}");
    }

    #[tokio::test]
    async fn retry_delays_never_exceed_max_delay() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let timestamps = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let ts_clone = timestamps.clone();

        let _result = with_retry(&config, &CancellationToken::new(), || {
            let ts = ts_clone.clone();
            async move {
                ts.lock().await.push(std::time::Instant::now());
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        let ts = timestamps.lock().await;
        assert_eq!(ts.len(), 5);

        let max_allowed = Duration::from_millis(350);
        for i in 1..ts.len() {
            let gap = ts[i].duration_since(ts[i - 1]);
            assert!(gap <= max_allowed, "gap {i} was {gap:?}");
        }
    }

    #[test]
    fn jitter_stays_within_one_extra_delay() {
        let delay = Duration::from_millis(100);
        for _ in 0..50 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn http_status_retryability() {
        let status = |status| Error::HttpStatus {
            url: "https://example.com".to_string(),
            status,
        };
        assert!(status(500).is_retryable());
        assert!(status(502).is_retryable());
        assert!(status(504).is_retryable());
        assert!(status(408).is_retryable());
        // already retried by the rate-limit backoff
        assert!(!status(503).is_retryable());
        assert!(!status(429).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!status(410).is_retryable());
    }

    #[test]
    fn policy_and_local_errors_are_permanent() {
        assert!(
            !Error::PolicyDisallowed {
                url: "https://example.com/private".to_string()
            }
            .is_retryable()
        );
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Other("boom".to_string()).is_retryable());
        assert!(
            !Error::TooLarge {
                url: "https://example.com/x.jpg".to_string(),
                limit: 1,
                actual: 2
            }
            .is_retryable()
        );
    }

    #[test]
    fn transient_local_errors_are_retryable() {
        let timeout_err = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert!(timeout_err.is_retryable());

        let reset = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(reset.is_retryable());

        let not_found = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(!not_found.is_retryable());

        assert!(
            Error::Timeout {
                url: "https://example.com".to_string(),
                stage: "reading",
                timeout: Duration::from_secs(1),
            }
            .is_retryable()
        );
    }

    #[test]
    fn rate_limited_is_not_retried_again() {
        let err = Error::RateLimited {
            url: "https://example.com".to_string(),
            status: 503,
            attempts: 4,
        };
        assert!(!err.is_retryable());
        assert!(!is_connection_failure(&err));
    }

    #[test]
    fn only_connection_failures_are_retried_by_the_fetcher() {
        let refused = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(is_connection_failure(&refused));

        let server_error = Error::HttpStatus {
            url: "https://example.com".to_string(),
            status: 500,
        };
        assert!(server_error.is_retryable());
        assert!(!is_connection_failure(&server_error));

        let slow = Error::Timeout {
            url: "https://example.com".to_string(),
            stage: "reading",
            timeout: Duration::from_secs(1),
        };
        assert!(!is_connection_failure(&slow));
    }

    #[tokio::test]
    async fn custom_predicate_decides_what_is_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry_if(
            &fast_config(3),
            &CancellationToken::new(),
            |_: &TestError| false,
            || {
                let counter = counter_clone.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>(TestError::Transient)
                }
            },
        )
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_cuts_the_backoff_wait_short() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 1.0,
            jitter: false,
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = with_retry(&config, &cancel, || async { Err::<i32, _>(TestError::Transient) }).await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    }
}
