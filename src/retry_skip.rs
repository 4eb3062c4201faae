//! Bounded retry-and-skip for whole fetch operations
//!
//! Where [`crate::retry`] smooths over a blip inside one request, this module
//! decides when a logical operation (fetching one article from one URL) is not
//! worth more effort. After the retry budget is spent the failure is recorded as a
//! skip and handed back as [`Outcome::Skipped`], so one flaky site never takes the
//! batch down with it.

use crate::error::{Error, ErrorCategory, Result};
use crate::retry::IsRetryable;
use crate::types::{Outcome, SkipReason};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One operation given up after its retry budget
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipRecord {
    /// Source key the operation belonged to
    pub source: String,
    /// Display text of the last error
    pub reason: String,
    /// Attempts made
    pub attempts: u32,
    /// Classification of the last error
    pub category: ErrorCategory,
}

/// Retry budget enforcement and skip log
#[derive(Debug)]
pub struct RetrySkipManager {
    retry_delay: Duration,
    skipped: Mutex<Vec<SkipRecord>>,
}

impl RetrySkipManager {
    /// Create a manager; attempt `n` is followed by a `retry_delay * n` pause
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            retry_delay,
            skipped: Mutex::new(Vec::new()),
        }
    }

    /// Run `operation` up to `max_retries` times
    ///
    /// Retryable errors are retried with linear backoff. When every attempt failed
    /// the skip is logged and `Outcome::Skipped(RetriesExhausted)` returned. A
    /// non-retryable error ends the loop at once with `Outcome::Failed`, except
    /// `RateLimited`, which is recorded as a skip straight away.
    /// Cancelling `cancel` during a backoff wait yields `Skipped(Cancelled)`.
    pub async fn execute_with_retry_skip<F, Fut, T>(
        &self,
        source: &str,
        max_retries: u32,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Outcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_retries = max_retries.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(source, attempts = attempt, "Operation succeeded after retry");
                    }
                    return Outcome::Success(value);
                }
                // the rate-limit backoff already spent this request's retries
                Err(e @ Error::RateLimited { attempts, .. }) => {
                    return Outcome::Skipped(self.record_skip(source, attempts, &e));
                }
                Err(e) if !e.is_retryable() => {
                    tracing::debug!(source, error = %e, "Operation failed with non-retryable error");
                    return Outcome::Failed(e);
                }
                Err(e) if attempt >= max_retries => {
                    return Outcome::Skipped(self.record_skip(source, attempt, &e));
                }
                Err(e) => {
                    let delay = self.retry_delay * attempt;
                    tracing::debug!(
                        source,
                        error = %e,
                        attempt,
                        max_retries,
                        delay_ms = delay.as_millis(),
                        "Operation failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::debug!(source, "Retry wait cancelled");
                            return Outcome::Skipped(SkipReason::Cancelled);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Try each URL in order, each with its own retry budget
    ///
    /// Stops at the first success. Any other outcome moves on to the next URL,
    /// including a robots.txt refusal; cancellation stops the chain. When every
    /// URL fails the first URL's outcome is returned, since later URLs are only
    /// mirrors of it.
    pub async fn execute_with_url_fallbacks<F, Fut, T>(
        &self,
        source: &str,
        urls: &[String],
        max_retries: u32,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Outcome<T>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut primary = None;

        for (i, url) in urls.iter().enumerate() {
            let outcome = self
                .execute_with_retry_skip(source, max_retries, cancel, || operation(url.clone()))
                .await;

            match outcome {
                Outcome::Success(_) => {
                    if i > 0 {
                        tracing::info!(source, url = %url, fallback = i, "Fetched from fallback URL");
                    }
                    return outcome;
                }
                Outcome::Failed(Error::Cancelled) | Outcome::Skipped(SkipReason::Cancelled) => {
                    return outcome;
                }
                Outcome::Failed(ref e) => {
                    tracing::debug!(source, url = %url, error = %e, "URL failed, trying next fallback");
                }
                Outcome::Skipped(ref reason) => {
                    tracing::debug!(source, url = %url, %reason, "URL skipped, trying next fallback");
                }
            }
            if primary.is_none() {
                primary = Some(outcome);
            }
        }

        primary.unwrap_or_else(|| {
            Outcome::Failed(Error::Other(format!("no URLs to try for {source}")))
        })
    }

    /// Every skip recorded since the last [`clear`](Self::clear)
    pub fn skipped(&self) -> Vec<SkipRecord> {
        self.lock().clone()
    }

    /// Forget recorded skips (start of a run)
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn record_skip(&self, source: &str, attempts: u32, error: &Error) -> SkipReason {
        let category = error.category();
        tracing::warn!(
            source,
            attempts,
            category = %category,
            error = %error,
            "Giving up after retries, skipping"
        );
        self.lock().push(SkipRecord {
            source: source.to_string(),
            reason: error.to_string(),
            attempts,
            category,
        });
        SkipReason::RetriesExhausted {
            attempts,
            category,
            status: error.status(),
            last_error: error.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<SkipRecord>> {
        self.skipped.lock().unwrap_or_else(|e| e.into_inner())
    }
}
