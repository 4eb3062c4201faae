//! Polite HTTP GET with adaptive timeouts
//!
//! Every request goes through the crawl-delay gate and 429/503 backoff of the
//! [`EthicalScrapingManager`], is retried on connection failures, and has its body
//! read under the read timeout with a byte cap. Successful response times feed
//! the [`TimeoutTracker`].

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::ethical::EthicalScrapingManager;
use crate::retry::{is_connection_failure, with_retry_if};
use crate::timeout_tracker::{TimeoutConfig, TimeoutTracker};
use reqwest::Client;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A fully read response
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Final URL after redirects
    pub url: String,
    /// HTTP status
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Body bytes
    pub body: Vec<u8>,
}

impl FetchedResponse {
    /// MIME type without parameters, lowercased
    pub fn content_type(&self) -> Option<String> {
        let value = self
            .headers
            .get(reqwest::header::CONTENT_TYPE)?
            .to_str()
            .ok()?;
        let mime = value.split(';').next().unwrap_or_default().trim();
        (!mime.is_empty()).then(|| mime.to_ascii_lowercase())
    }

    /// True for `text/html` and XHTML, or when no content type was sent
    pub fn is_html(&self) -> bool {
        match self.content_type() {
            Some(ct) => ct == "text/html" || ct == "application/xhtml+xml",
            None => true,
        }
    }

    /// Body decoded as UTF-8, replacing invalid sequences
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Per-request parameters
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Key for timeout history (profile tag or host)
    pub source: &'a str,
    /// Timeouts for this request
    pub timeouts: TimeoutConfig,
    /// Spacing to keep from the previous request to the same host
    pub crawl_delay: Duration,
    /// Largest body accepted
    pub max_bytes: u64,
    /// Shutdown token
    pub cancel: &'a CancellationToken,
}

/// Shared HTTP client front end
#[derive(Debug)]
pub struct HttpFetcher {
    user_agent: String,
    retry: RetryConfig,
    clients: Mutex<HashMap<Duration, Client>>,
    tracker: Arc<TimeoutTracker>,
    ethical: Arc<EthicalScrapingManager>,
}

impl HttpFetcher {
    /// Create a fetcher sharing the tracker and politeness manager
    pub fn new(
        http: &HttpConfig,
        retry: RetryConfig,
        tracker: Arc<TimeoutTracker>,
        ethical: Arc<EthicalScrapingManager>,
    ) -> Self {
        Self {
            user_agent: http.user_agent.clone(),
            retry,
            clients: Mutex::new(HashMap::new()),
            tracker,
            ethical,
        }
    }

    /// The politeness manager requests go through
    pub fn ethical(&self) -> &EthicalScrapingManager {
        &self.ethical
    }

    /// The latency tracker responses are recorded in
    pub fn tracker(&self) -> &TimeoutTracker {
        &self.tracker
    }

    /// Client with the given connect timeout; clients are built once per value
    fn client(&self, connect: Duration) -> Result<Client> {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&connect) {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .user_agent(&self.user_agent)
            .connect_timeout(connect)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        clients.insert(connect, client.clone());
        Ok(client)
    }

    /// GET `url`, returning the body of a 2xx response
    ///
    /// Non-2xx statuses become `Error::HttpStatus`; persistent 429/503 become
    /// `Error::RateLimited`. Only connection failures are retried here.
    pub async fn get(&self, url: &str, ctx: &RequestContext<'_>) -> Result<FetchedResponse> {
        let client = self.client(ctx.timeouts.connect)?;

        let result = with_retry_if(&self.retry, ctx.cancel, is_connection_failure, || {
            self.get_once(&client, url, ctx)
        })
        .await;
        match result {
            Err(_) if ctx.cancel.is_cancelled() => Err(Error::Cancelled),
            other => other,
        }
    }

    async fn get_once(
        &self,
        client: &Client,
        url: &str,
        ctx: &RequestContext<'_>,
    ) -> Result<FetchedResponse> {
        let started = Instant::now();
        let response = self
            .ethical
            .request_with_backoff(url, ctx.crawl_delay, ctx.cancel, || {
                let request = client.get(url).timeout(ctx.timeouts.total);
                async move { request.send().await.map_err(Error::from) }
            })
            .await?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            tracing::debug!(url, status, "Non-success response");
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status,
            });
        }

        if let Some(len) = response.content_length()
            && len > ctx.max_bytes
        {
            return Err(Error::TooLarge {
                url: url.to_string(),
                limit: ctx.max_bytes,
                actual: len,
            });
        }

        let final_url = response.url().to_string();
        let headers = response.headers().clone();
        let body = tokio::time::timeout(ctx.timeouts.read, read_body(response, url, ctx.max_bytes))
            .await
            .map_err(|_| Error::Timeout {
                url: url.to_string(),
                stage: "reading",
                timeout: ctx.timeouts.read,
            })??;

        let elapsed = started.elapsed();
        self.tracker.record(ctx.source, elapsed);
        tracing::debug!(
            url,
            source = ctx.source,
            status,
            bytes = body.len(),
            elapsed_ms = elapsed.as_millis(),
            "Fetched"
        );

        Ok(FetchedResponse {
            url: final_url,
            status,
            headers,
            body,
        })
    }
}

async fn read_body(mut response: reqwest::Response, url: &str, max_bytes: u64) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if (body.len() + chunk.len()) as u64 > max_bytes {
            return Err(Error::TooLarge {
                url: url.to_string(),
                limit: max_bytes,
                actual: (body.len() + chunk.len()) as u64,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}
