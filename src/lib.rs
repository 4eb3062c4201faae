//! # article-archiver
//!
//! Polite, resilient fetching of web articles into local Markdown archives.
//!
//! ## Design Philosophy
//!
//! article-archiver is designed to be:
//! - **Polite** - robots.txt, crawl delays and 429/503 backoff on every request
//! - **Resilient** - one article or source failing never stops a batch
//! - **Library-first** - sources and storage are traits supplied by the embedder
//! - **Event-driven** - consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use article_archiver::{
//!     BatchCoordinator, BatchOptions, Config, FeedSource, FsStorage, Services, SourceRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = Services::new(Config::default())?;
//!     tokio::spawn(article_archiver::cancel_on_signal(services.cancel_token()));
//!
//!     let mut registry = SourceRegistry::new();
//!     registry.register(Arc::new(FeedSource::new(
//!         "blog",
//!         "https://blog.example.com/feed.xml",
//!         &services,
//!     )));
//!
//!     // Subscribe to events
//!     let mut events = services.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let coordinator = BatchCoordinator::new(services.clone(), Arc::new(FsStorage::new()), registry);
//!     let summary = coordinator
//!         .process_sources(&["blog".to_string()], BatchOptions::new("archive"))
//!         .await;
//!
//!     services.shutdown();
//!     std::process::exit(summary.exit_code());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Multi-source batch runs
pub mod batch;
/// Configuration types
pub mod config;
/// Bounded HTML-to-Markdown conversion
pub mod conversion;
/// Error types
pub mod error;
/// robots.txt, crawl delays and rate-limit backoff
pub mod ethical;
/// HTML extraction helpers
pub mod html;
/// HTTP fetching
pub mod http;
/// Embedded media discovery, download and rewriting
pub mod media;
/// Per-article fetch state machine
pub mod orchestrator;
/// Retry logic with exponential backoff
pub mod retry;
/// Operation-level retry budget and skip log
pub mod retry_skip;
/// robots.txt parsing
pub mod robots;
/// Shared services container
pub mod services;
/// URLs seen during the current run
pub mod session_cache;
/// Source adapters and per-site profiles
pub mod source;
/// Article persistence
pub mod storage;
/// Adaptive per-source timeouts
pub mod timeout_tracker;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use batch::{BatchCoordinator, BatchOptions, BatchSummary};
pub use config::{Config, SourceProfileConfig};
pub use error::{Error, ErrorCategory, Result};
pub use orchestrator::{ErrorArticle, FetchOrchestrator};
pub use services::Services;
pub use source::{FeedSource, SourceAdapter, SourceProfiles, SourceRegistry};
pub use storage::{FsStorage, Storage};
pub use timeout_tracker::{TimeoutConfig, TimeoutTracker};
pub use types::{
    Article, Event, FetchReport, FetchState, Outcome, OutcomeKind, ProgressCallback, SkipReason,
};

/// Cancel `token` when the process receives a termination signal.
///
/// In-flight requests finish; every loop and wait checks the token, so the
/// running batch winds down with the articles already written.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use article_archiver::{Config, Services, cancel_on_signal};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// # tokio::runtime::Runtime::new()?.block_on(async {
/// let services = Services::new(Config::default())?;
/// tokio::spawn(cancel_on_signal(services.cancel_token()));
/// # Ok::<(), article_archiver::Error>(())
/// # })?;
/// # Ok(())
/// # }
/// ```
pub async fn cancel_on_signal(token: tokio_util::sync::CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::info!("Shutting down, cancelling outstanding work");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
