//! Shared bounded pool for HTML→Markdown conversion
//!
//! Conversion is CPU-bound and occasionally pathological on huge pages. Jobs run
//! on tokio's blocking threads, gated by one process-wide semaphore. The permit
//! moves into the blocking job, so a caller that stops waiting after its timeout
//! does not free a slot while the conversion is still running.

use crate::error::{Error, Result};
use crate::html;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Fixed-size conversion pool
#[derive(Debug)]
pub struct ConversionExecutorPool {
    size: usize,
    permits: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
}

struct InFlightGuard(Arc<AtomicUsize>);

impl InFlightGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConversionExecutorPool {
    /// Create a pool running at most `size` conversions at once
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            size,
            permits: Arc::new(Semaphore::new(size)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pool size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Conversions currently running on blocking threads
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Convert HTML to Markdown, or return an empty string on timeout, panic or
    /// a closed pool
    pub async fn convert_with_timeout(&self, html: String, timeout: Duration) -> String {
        self.run_with_timeout(move || html::to_markdown(&html), timeout)
            .await
            .unwrap_or_default()
    }

    /// Run an arbitrary conversion job under the pool's bound
    ///
    /// `None` when the job did not finish within `timeout` (including time spent
    /// waiting for a permit), panicked, or the pool is shut down.
    pub async fn run_with_timeout<F>(&self, job: F, timeout: Duration) -> Option<String>
    where
        F: FnOnce() -> String + Send + 'static,
    {
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();

        let run = async move {
            let permit = permits.acquire_owned().await.ok()?;
            let handle = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let _guard = InFlightGuard::new(in_flight);
                job()
            });
            match handle.await {
                Ok(output) => Some(output),
                Err(e) => {
                    tracing::error!(error = %e, "Conversion task failed");
                    None
                }
            }
        };

        match tokio::time::timeout(timeout, run).await {
            Ok(output) => output,
            Err(_) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis(),
                    in_flight = self.in_flight(),
                    "Conversion timed out"
                );
                None
            }
        }
    }

    /// Stop accepting jobs; running jobs finish normally
    pub fn shutdown(&self) {
        self.permits.close();
    }
}

/// Run CPU-bound parsing (HTML extraction, feed parsing) on a blocking thread
///
/// Parsers are not `Send`-friendly and can take a while on multi-megabyte
/// bodies, so they never run on an async worker.
pub async fn run_blocking<F, T>(job: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| Error::Other(format!("parsing task failed: {e}")))
}
