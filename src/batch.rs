//! Multi-source batch runs
//!
//! Sources are discovered concurrently; their articles share one worker
//! semaphore of `batch.max_workers` permits and complete in any order. Counters
//! are atomics and per-article states live in a map whose lock is only held to
//! read or write one entry, so workers never wait on the reporter.

use crate::orchestrator::FetchOrchestrator;
use crate::retry_skip::SkipRecord;
use crate::services::Services;
use crate::source::SourceRegistry;
use crate::storage::Storage;
use crate::types::{Article, Event, FetchReport, FetchState, Outcome, ProgressCallback};
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Per-run options for [`BatchCoordinator::process_sources`]
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Articles requested per source; `batch.articles_per_source` when `None`
    pub count: Option<usize>,
    /// Directory article folders are created in
    pub base_folder: PathBuf,
    /// Override for `media.download_all`
    pub download_all: Option<bool>,
    /// Token stopping this run; a child of the services' token when `None`
    pub cancel: Option<CancellationToken>,
}

impl BatchOptions {
    /// Defaults writing under `base_folder`
    pub fn new(base_folder: impl Into<PathBuf>) -> Self {
        Self {
            count: None,
            base_folder: base_folder.into(),
            download_all: None,
            cancel: None,
        }
    }
}

/// Result of a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Sources that saved at least one article
    pub successful: Vec<String>,
    /// Sources that saved nothing, with the reason
    pub failed: Vec<(String, String)>,
    /// Sources requested
    pub total: usize,
    /// Articles archived
    pub articles_saved: usize,
    /// Articles that ended in an error article
    pub articles_failed: usize,
    /// Articles skipped
    pub articles_skipped: usize,
    /// Operations given up after their retry budget
    pub skipped_operations: Vec<SkipRecord>,
}

impl BatchSummary {
    /// Process exit code: 1 when any source saved no articles
    pub fn exit_code(&self) -> i32 {
        if self.failed.is_empty() { 0 } else { 1 }
    }
}

/// Aggregate and per-article progress of the current run
#[derive(Debug, Default)]
pub struct BatchProgress {
    total: AtomicUsize,
    completed: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    states: Mutex<HashMap<usize, FetchState>>,
}

/// Point-in-time copy of [`BatchProgress`] counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Articles queued so far
    pub total: usize,
    /// Articles finished
    pub completed: usize,
    /// Articles archived
    pub succeeded: usize,
    /// Articles failed
    pub failed: usize,
    /// Articles skipped
    pub skipped: usize,
}

impl BatchProgress {
    /// Counter values right now
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }

    /// Last state reported for an article
    pub fn state_of(&self, index: usize) -> Option<FetchState> {
        self.lock().get(&index).copied()
    }

    /// Articles currently in a non-terminal state
    pub fn in_flight(&self) -> usize {
        self.lock().values().filter(|s| !s.is_terminal()).count()
    }

    fn set_state(&self, index: usize, state: FetchState) {
        self.lock().insert(index, state);
    }

    fn record(&self, tally: Tally) {
        let counter = match tally {
            Tally::Saved => &self.succeeded,
            Tally::Failed => &self.failed,
            Tally::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn reset(&self) {
        for counter in [
            &self.total,
            &self.completed,
            &self.succeeded,
            &self.failed,
            &self.skipped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, FetchState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tally {
    Saved,
    Failed,
    Skipped,
}

impl Tally {
    fn of(report: &FetchReport) -> Self {
        if report.success() {
            Tally::Saved
        } else if matches!(report.outcome, Outcome::Failed(_))
            || report.state == FetchState::ErrorArticleSynthesized
        {
            Tally::Failed
        } else {
            Tally::Skipped
        }
    }
}

#[derive(Debug, Default)]
struct SourceTally {
    saved: usize,
    failed: usize,
    skipped: usize,
}

/// Runs registered sources through the fetch orchestrator
#[derive(Clone)]
pub struct BatchCoordinator {
    services: Services,
    storage: Arc<dyn Storage>,
    registry: Arc<SourceRegistry>,
    progress: Arc<BatchProgress>,
    next_index: Arc<AtomicUsize>,
}

impl std::fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("registry", &self.registry)
            .field("progress", &self.progress.snapshot())
            .finish_non_exhaustive()
    }
}

impl BatchCoordinator {
    /// Coordinator over the given sources
    pub fn new(services: Services, storage: Arc<dyn Storage>, registry: SourceRegistry) -> Self {
        Self {
            services,
            storage,
            registry: Arc::new(registry),
            progress: Arc::new(BatchProgress::default()),
            next_index: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Progress of the current (or last) run
    pub fn progress(&self) -> &BatchProgress {
        &self.progress
    }

    /// The registered sources
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Discover and archive articles from each source in `source_ids`
    ///
    /// Clears the session URL cache and skip log first. A source counts as
    /// failed when discovery errors, finds nothing, or saves nothing; one
    /// source failing never stops the others.
    pub async fn process_sources(&self, source_ids: &[String], options: BatchOptions) -> BatchSummary {
        let config = &self.services.config;
        let count = options.count.unwrap_or(config.batch.articles_per_source);
        let cancel = options
            .cancel
            .clone()
            .unwrap_or_else(|| self.services.cancel_token().child_token());

        self.services.session.clear();
        self.services.retry_skip.clear();
        self.progress.reset();
        self.next_index.store(0, Ordering::Relaxed);

        let mut orchestrator = FetchOrchestrator::new(self.services.clone(), self.storage.clone())
            .with_cancellation(cancel.clone());
        if let Some(download_all) = options.download_all {
            orchestrator = orchestrator.with_download_all(download_all);
        }

        tracing::info!(
            sources = source_ids.len(),
            count,
            max_workers = config.batch.max_workers,
            base = %options.base_folder.display(),
            "Starting batch"
        );

        let workers = Arc::new(Semaphore::new(config.batch.max_workers.max(1)));
        let done = cancel.child_token();
        let reporter = self.spawn_progress_reporter(done.clone());

        let results = futures::future::join_all(source_ids.iter().map(|id| {
            self.process_source(
                id,
                count,
                &options.base_folder,
                &orchestrator,
                &workers,
                &cancel,
            )
        }))
        .await;

        done.cancel();
        if let Err(e) = reporter.await {
            tracing::error!(error = %e, "Progress reporter task failed");
        }
        self.emit_progress();

        let mut summary = BatchSummary {
            total: source_ids.len(),
            skipped_operations: self.services.retry_skip.skipped(),
            ..Default::default()
        };
        for (id, result) in source_ids.iter().zip(results) {
            match result {
                Ok(tally) => {
                    summary.articles_saved += tally.saved;
                    summary.articles_failed += tally.failed;
                    summary.articles_skipped += tally.skipped;
                    if tally.saved > 0 {
                        summary.successful.push(id.clone());
                    } else {
                        summary.failed.push((
                            id.clone(),
                            format!(
                                "no articles saved ({} failed, {} skipped)",
                                tally.failed, tally.skipped
                            ),
                        ));
                    }
                }
                Err(reason) => summary.failed.push((id.clone(), reason)),
            }
        }

        for (id, reason) in &summary.failed {
            tracing::warn!(source = %id, reason = %reason, "Source failed");
        }
        tracing::info!(
            successful = summary.successful.len(),
            failed = summary.failed.len(),
            saved = summary.articles_saved,
            articles_failed = summary.articles_failed,
            skipped = summary.articles_skipped,
            "Batch finished"
        );
        summary
    }

    /// Discover one source and fetch its articles; `Err` is the failure reason
    async fn process_source(
        &self,
        id: &str,
        count: usize,
        base_folder: &std::path::Path,
        orchestrator: &FetchOrchestrator,
        workers: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> std::result::Result<SourceTally, String> {
        let adapter = self
            .registry
            .get(id)
            .ok_or_else(|| "unknown source".to_string())?;

        self.services.emit(Event::SourceStarted { id: id.to_string() });
        tracing::info!(source = id, count, "Discovering articles");

        let articles = tokio::select! {
            result = adapter.discover(count) => result.map_err(|e| {
                tracing::warn!(source = id, error = %e, "Discovery failed");
                format!("discovery failed: {e}")
            })?,
            _ = cancel.cancelled() => return Err("cancelled".to_string()),
        };
        if articles.is_empty() {
            return Err("no articles discovered".to_string());
        }
        tracing::debug!(source = id, found = articles.len(), "Articles discovered");

        let tally = self
            .fetch_all(articles, base_folder, orchestrator, workers, cancel)
            .await;

        self.services.emit(Event::SourceFinished {
            id: id.to_string(),
            saved: tally.saved,
            failed: tally.failed,
            skipped: tally.skipped,
        });
        Ok(tally)
    }

    async fn fetch_all(
        &self,
        articles: Vec<Article>,
        base_folder: &std::path::Path,
        orchestrator: &FetchOrchestrator,
        workers: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> SourceTally {
        let mut tally = SourceTally::default();
        let mut tasks = FuturesUnordered::new();
        let queued = articles.len();
        self.progress.total.fetch_add(queued, Ordering::Relaxed);

        for article in articles {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                permit = workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = cancel.cancelled() => break,
            };

            let index = self.next_index.fetch_add(1, Ordering::Relaxed);
            let progress = self.progress.clone();
            let callback: ProgressCallback =
                Arc::new(move |index, state| progress.set_state(index, state));
            let orchestrator = orchestrator.clone();
            let base_folder = base_folder.to_path_buf();

            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                orchestrator
                    .fetch(&article, index, &base_folder, Some(callback))
                    .await
            }));
        }

        // articles never started count as skipped
        let started = tasks.len();
        for _ in started..queued {
            self.progress.record(Tally::Skipped);
            tally.skipped += 1;
        }

        while let Some(joined) = tasks.next().await {
            let kind = match joined {
                Ok(report) => Tally::of(&report),
                Err(e) => {
                    tracing::error!(error = %e, "Article task failed");
                    Tally::Failed
                }
            };
            self.progress.record(kind);
            match kind {
                Tally::Saved => tally.saved += 1,
                Tally::Failed => tally.failed += 1,
                Tally::Skipped => tally.skipped += 1,
            }
        }
        tally
    }

    fn spawn_progress_reporter(&self, done: CancellationToken) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        let period = self.services.config.batch.progress_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => coordinator.emit_progress(),
                    _ = done.cancelled() => break,
                }
            }
        })
    }

    fn emit_progress(&self) {
        let snapshot = self.progress.snapshot();
        tracing::debug!(
            completed = snapshot.completed,
            total = snapshot.total,
            in_flight = self.progress.in_flight(),
            "Batch progress"
        );
        self.services.emit(Event::BatchProgress {
            completed: snapshot.completed,
            total: snapshot.total,
            succeeded: snapshot.succeeded,
            failed: snapshot.failed,
            skipped: snapshot.skipped,
        });
    }
}
