//! Process-wide shared state
//!
//! Everything that must exist exactly once per run (timeout history, robots.txt
//! cache and per-host slots, the conversion pool, the session URL set, the skip
//! log) is built here once and handed to the orchestrator and batch coordinator
//! by `Arc`.

use crate::config::Config;
use crate::conversion::ConversionExecutorPool;
use crate::error::Result;
use crate::ethical::EthicalScrapingManager;
use crate::http::HttpFetcher;
use crate::media::MediaProcessor;
use crate::retry_skip::RetrySkipManager;
use crate::session_cache::SessionUrlCache;
use crate::source::SourceProfiles;
use crate::timeout_tracker::TimeoutTracker;
use crate::types::Event;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel; slow subscribers miss the oldest events
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Shared services for one archiving run
#[derive(Debug, Clone)]
pub struct Services {
    /// Validated configuration
    pub config: Arc<Config>,
    /// Per-source response-time history and timeout recommendations
    pub tracker: Arc<TimeoutTracker>,
    /// robots.txt cache, crawl-delay gate and 429/503 backoff
    pub ethical: Arc<EthicalScrapingManager>,
    /// Logical retry budget and skip log
    pub retry_skip: Arc<RetrySkipManager>,
    /// Shared HTML→Markdown conversion pool
    pub conversion: Arc<ConversionExecutorPool>,
    /// Article URLs seen in this run
    pub session: Arc<SessionUrlCache>,
    /// HTTP front end
    pub fetcher: Arc<HttpFetcher>,
    /// Host → source profile table
    pub profiles: Arc<SourceProfiles>,
    /// Embedded media pipeline
    pub media: Arc<MediaProcessor>,
    event_tx: broadcast::Sender<Event>,
    cancel: CancellationToken,
}

impl Services {
    /// Validate `config` and build every shared component
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let tracker = Arc::new(TimeoutTracker::from_settings(&config.timeouts));
        let profiles = Arc::new(SourceProfiles::new(&config.profiles));
        profiles.register_timeouts(&tracker);

        let ethical = Arc::new(EthicalScrapingManager::new(
            config.ethics.clone(),
            &config.http,
        )?);
        let fetcher = Arc::new(HttpFetcher::new(
            &config.http,
            config.retry.clone(),
            tracker.clone(),
            ethical.clone(),
        ));

        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let media = Arc::new(MediaProcessor::new(
            config.media.clone(),
            fetcher.clone(),
            event_tx.clone(),
        ));

        tracing::info!(
            user_agent = %config.http.user_agent,
            pool_size = config.conversion.pool_size,
            workers = config.batch.max_workers,
            profiles = profiles.profiles().len(),
            "Services initialized"
        );

        Ok(Self {
            retry_skip: Arc::new(RetrySkipManager::new(config.fetch.retry_delay)),
            conversion: Arc::new(ConversionExecutorPool::new(config.conversion.pool_size)),
            session: Arc::new(SessionUrlCache::new()),
            config: Arc::new(config),
            tracker,
            ethical,
            fetcher,
            profiles,
            media,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to pipeline events
    ///
    /// Multiple subscribers are supported; each gets every event sent after it
    /// subscribed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Send an event; having no subscribers is fine
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// The sender, for components that emit events themselves
    pub fn event_sender(&self) -> broadcast::Sender<Event> {
        self.event_tx.clone()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown); pass children of it to work
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True once shutdown started
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the run: cancel outstanding work and close the conversion pool
    ///
    /// In-flight requests finish on their own; nothing new starts afterwards.
    pub fn shutdown(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::info!(
            conversions_in_flight = self.conversion.in_flight(),
            skipped = self.retry_skip.skipped().len(),
            "Shutting down"
        );
        self.cancel.cancel();
        self.conversion.shutdown();
        self.ethical.clear_robots_cache();
    }
}
