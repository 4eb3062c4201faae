//! Core types for article-archiver

use crate::error::{Error, ErrorCategory};
use crate::media::MediaKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// An article discovered by a source adapter
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    /// Headline as listed by the source
    pub title: String,
    /// Link to the article itself
    pub url: String,
    /// Link to the discussion page, when the source has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_url: Option<String>,
}

impl Article {
    /// Create an article without a comment link
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            comment_url: None,
        }
    }
}

/// Why an operation was skipped rather than failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// URL was already handled earlier in this run
    AlreadyProcessed,
    /// URL matched one of the source profile's skip patterns
    FilteredUrl {
        /// The pattern that matched
        pattern: String,
    },
    /// URL is not http(s)
    UnsupportedScheme {
        /// The scheme found
        scheme: String,
    },
    /// robots.txt disallows the URL
    RobotsDisallowed {
        /// The refused URL
        url: String,
    },
    /// Every retry failed with a transient error
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Classification of the last error
        category: ErrorCategory,
        /// HTTP status of the last error, when there was one
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// Display text of the last error
        last_error: String,
    },
    /// The run is shutting down
    Cancelled,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyProcessed => write!(f, "already processed in this run"),
            SkipReason::FilteredUrl { pattern } => write!(f, "matched skip pattern {pattern}"),
            SkipReason::UnsupportedScheme { scheme } => write!(f, "unsupported scheme {scheme}"),
            SkipReason::RobotsDisallowed { url } => write!(f, "robots.txt disallows {url}"),
            SkipReason::RetriesExhausted {
                attempts,
                last_error,
                ..
            } => write!(f, "gave up after {attempts} attempts: {last_error}"),
            SkipReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of any retryable unit of work: success, a deliberate skip, or a failure
#[derive(Debug)]
pub enum Outcome<T> {
    /// The work completed
    Success(T),
    /// The work was given up without being an error for the batch
    Skipped(SkipReason),
    /// The work failed
    Failed(Error),
}

/// Discriminant of an [`Outcome`], for events and counters
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// See [`Outcome::Success`]
    Success,
    /// See [`Outcome::Skipped`]
    Skipped,
    /// See [`Outcome::Failed`]
    Failed,
}

impl<T> Outcome<T> {
    /// True for [`Outcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// True for [`Outcome::Skipped`]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Outcome::Skipped(_))
    }

    /// True for [`Outcome::Failed`]
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    /// The discriminant
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Success(_) => OutcomeKind::Success,
            Outcome::Skipped(_) => OutcomeKind::Skipped,
            Outcome::Failed(_) => OutcomeKind::Failed,
        }
    }

    /// The success value, if any
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(v) => Some(v),
            _ => None,
        }
    }

    /// Transform the success value
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Success(v) => Outcome::Success(f(v)),
            Outcome::Skipped(reason) => Outcome::Skipped(reason),
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }
}

impl<T> From<crate::error::Result<T>> for Outcome<T> {
    fn from(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// States of the per-article fetch state machine
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    /// Nothing done yet
    Init,
    /// Cancellation, dedup and URL filters
    SkipCheck,
    /// robots.txt check
    EthicalCheck,
    /// Routing by URL extension / content type
    MediaTypeSniff,
    /// Direct link to audio, video or a document
    DirectMediaFetch,
    /// HTML page fetch, extraction and conversion
    WebContentFetch,
    /// Direct link to a PDF
    PdfFetch,
    /// Embedded media download and rewriting
    MediaPostProcess,
    /// Document written (terminal)
    Persisted,
    /// Deliberately not fetched (terminal)
    Skipped,
    /// Fetch failed and an error article was written instead (terminal)
    ErrorArticleSynthesized,
}

impl FetchState {
    /// True for states the machine never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FetchState::Persisted | FetchState::Skipped | FetchState::ErrorArticleSynthesized
        )
    }

    /// Rough completion percentage for progress displays
    pub fn percent(&self) -> u8 {
        match self {
            FetchState::Init => 0,
            FetchState::SkipCheck => 5,
            FetchState::EthicalCheck => 10,
            FetchState::MediaTypeSniff => 15,
            FetchState::DirectMediaFetch | FetchState::WebContentFetch | FetchState::PdfFetch => {
                30
            }
            FetchState::MediaPostProcess => 70,
            FetchState::Persisted | FetchState::Skipped | FetchState::ErrorArticleSynthesized => {
                100
            }
        }
    }
}

impl std::fmt::Display for FetchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FetchState::Init => "init",
            FetchState::SkipCheck => "skip_check",
            FetchState::EthicalCheck => "ethical_check",
            FetchState::MediaTypeSniff => "media_type_sniff",
            FetchState::DirectMediaFetch => "direct_media_fetch",
            FetchState::WebContentFetch => "web_content_fetch",
            FetchState::PdfFetch => "pdf_fetch",
            FetchState::MediaPostProcess => "media_post_process",
            FetchState::Persisted => "persisted",
            FetchState::Skipped => "skipped",
            FetchState::ErrorArticleSynthesized => "error_article_synthesized",
        };
        f.write_str(name)
    }
}

/// What `fetch_article` hands back
#[derive(Debug)]
pub struct FetchReport {
    /// Success carries the markdown path; an error article still yields `Failed`
    pub outcome: Outcome<PathBuf>,
    /// Best-effort title (extracted from the page, or the listed title)
    pub title: Option<String>,
    /// Article folder, when one was created
    pub folder: Option<PathBuf>,
    /// Terminal state reached
    pub state: FetchState,
}

impl FetchReport {
    /// True when the article was archived
    pub fn success(&self) -> bool {
        self.outcome.is_success()
    }
}

/// Per-article progress callback: `(article index, state entered)`
pub type ProgressCallback = Arc<dyn Fn(usize, FetchState) + Send + Sync>;

/// Events broadcast while archiving
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// An article entered the pipeline
    ArticleStarted {
        /// Index within the batch
        index: usize,
        /// Article URL
        url: String,
    },
    /// An article moved to a new state
    ArticleState {
        /// Index within the batch
        index: usize,
        /// New state
        state: FetchState,
    },
    /// An article reached a terminal state
    ArticleFinished {
        /// Index within the batch
        index: usize,
        /// Article URL
        url: String,
        /// How it ended
        outcome: OutcomeKind,
        /// Folder written, if any
        folder: Option<PathBuf>,
    },
    /// An embedded media file was saved
    MediaSaved {
        /// Remote URL
        url: String,
        /// Local file
        path: PathBuf,
        /// Media kind
        kind: MediaKind,
    },
    /// An embedded media file could not be saved
    MediaFailed {
        /// Remote URL
        url: String,
        /// Error text
        error: String,
    },
    /// A source started discovery
    SourceStarted {
        /// Source id
        id: String,
    },
    /// A source finished
    SourceFinished {
        /// Source id
        id: String,
        /// Articles archived
        saved: usize,
        /// Articles failed (error article written or nothing saved)
        failed: usize,
        /// Articles skipped
        skipped: usize,
    },
    /// Periodic aggregate progress
    BatchProgress {
        /// Articles finished so far
        completed: usize,
        /// Articles queued so far
        total: usize,
        /// Articles archived
        succeeded: usize,
        /// Articles failed
        failed: usize,
        /// Articles skipped
        skipped: usize,
    },
}
