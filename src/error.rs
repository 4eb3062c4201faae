//! Error types for article-archiver
//!
//! This module provides the error taxonomy for the fetch pipeline:
//! - Policy errors (robots.txt disallow), which are final for a URL
//! - Transient transport errors (timeouts, resets, 5xx), which are retried
//! - Rate limiting (429/503 still answered after backoff), skipped without further retries
//! - Unrecoverable content errors (persistent 4xx), which become error articles
//! - Local errors (I/O, configuration, serialization)
//!
//! Every error maps to an [`ErrorCategory`] so skip records and error articles can
//! describe a failure without holding on to the (non-cloneable) error itself.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for article-archiver operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for article-archiver
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "media.max_workers")
        key: Option<String>,
    },

    /// robots.txt forbids fetching this URL for our user agent
    #[error("disallowed by robots.txt: {url}")]
    PolicyDisallowed {
        /// The URL that was refused
        url: String,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// The requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Server kept answering 429/503 after every backoff retry
    #[error("rate limited by {url} (HTTP {status}) after {attempts} attempts")]
    RateLimited {
        /// The requested URL
        url: String,
        /// Last status code seen (429 or 503)
        status: u16,
        /// Number of requests issued
        attempts: u32,
    },

    /// A local timeout elapsed (body read, conversion, total request)
    #[error("timed out after {timeout:?} while {stage} {url}")]
    Timeout {
        /// The URL being processed
        url: String,
        /// What was being waited on ("reading", "connecting", ...)
        stage: &'static str,
        /// The timeout that elapsed
        timeout: Duration,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// URL could not be parsed or is not fetchable
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL text
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Response body exceeds the configured cap
    #[error("{url} is too large: {actual} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// The requested URL
        url: String,
        /// Configured byte cap
        limit: u64,
        /// Declared or observed size
        actual: u64,
    },

    /// Response has a content type that does not fit the request (e.g. HTML for an image)
    #[error("unexpected content type {content_type} for {url}")]
    UnexpectedContent {
        /// The requested URL
        url: String,
        /// The content type the server declared
        content_type: String,
    },

    /// Source adapter failed to discover articles
    #[error("source {id} failed: {message}")]
    Source {
        /// Source identifier
        id: String,
        /// What went wrong
        message: String,
    },

    /// RSS/Atom feed could not be parsed
    #[error("invalid feed: {0}")]
    Feed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Operation was cancelled through the shutdown token
    #[error("operation cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Coarse failure classification used by error articles and skip records
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// 401/403 and other access refusals
    Forbidden,
    /// 404/410
    NotFound,
    /// Connect, read or total timeout
    Timeout,
    /// 5xx responses
    ServerError,
    /// 429 / persistent 503 after backoff
    RateLimited,
    /// Connection failures and other transport errors
    Network,
    /// robots.txt disallow
    Policy,
    /// Anything else
    Other,
}

impl ErrorCategory {
    /// Machine-readable name (matches the serde representation)
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Forbidden => "forbidden",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ServerError => "server_error",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::Network => "network",
            ErrorCategory::Policy => "policy",
            ErrorCategory::Other => "other",
        }
    }

    /// Human-readable headline for error articles
    pub fn headline(&self) -> &'static str {
        match self {
            ErrorCategory::Forbidden => "Access forbidden",
            ErrorCategory::NotFound => "Page not found",
            ErrorCategory::Timeout => "Request timed out",
            ErrorCategory::ServerError => "Server error",
            ErrorCategory::RateLimited => "Rate limited by server",
            ErrorCategory::Network => "Network failure",
            ErrorCategory::Policy => "Blocked by robots.txt",
            ErrorCategory::Other => "Fetch failed",
        }
    }

    /// Classify a bare HTTP status code
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 | 451 => ErrorCategory::Forbidden,
            404 | 410 => ErrorCategory::NotFound,
            408 | 504 => ErrorCategory::Timeout,
            429 => ErrorCategory::RateLimited,
            500..=599 => ErrorCategory::ServerError,
            _ => ErrorCategory::Other,
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    /// Classify this error for reporting
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::PolicyDisallowed { .. } => ErrorCategory::Policy,
            Error::HttpStatus { status, .. } => ErrorCategory::from_status(*status),
            Error::RateLimited { .. } => ErrorCategory::RateLimited,
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Network(e) if e.is_timeout() => ErrorCategory::Timeout,
            Error::Network(e) => match e.status() {
                Some(status) => ErrorCategory::from_status(status.as_u16()),
                None => ErrorCategory::Network,
            },
            Error::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ErrorCategory::Timeout,
            _ => ErrorCategory::Other,
        }
    }

    /// HTTP status code carried by this error, when there is one
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::HttpStatus { status, .. } | Error::RateLimited { status, .. } => Some(*status),
            Error::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// True for robots.txt refusals
    pub fn is_policy(&self) -> bool {
        matches!(self, Error::PolicyDisallowed { .. })
    }

    /// Shorthand for a configuration error on a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}
