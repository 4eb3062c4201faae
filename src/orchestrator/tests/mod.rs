// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::config::Config;
use crate::error::{ErrorCategory, Result};
use crate::storage::FsStorage;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE: &str = r#"<html><head><title>My Post</title></head><body>
<nav><a href="/">Home</a></nav>
<article>
  <h2>Heading</h2>
  <p>Hello world, this is the article body.</p>
  <img src="/img/a.jpg" width="800" height="600" alt="Photo">
</article>
<footer>Copyright</footer>
</body></html>"#;

fn config() -> Config {
    let mut config = Config::default();
    config.ethics.min_crawl_delay = Duration::ZERO;
    config.ethics.max_backoff_retries = 0;
    config.retry.max_attempts = 0;
    config.fetch.max_retries = 2;
    config.fetch.retry_delay = Duration::from_millis(10);
    config
}

fn orchestrator(config: Config) -> FetchOrchestrator {
    FetchOrchestrator::new(Services::new(config).unwrap(), Arc::new(FsStorage::new()))
}

fn recorder() -> (ProgressCallback, Arc<Mutex<Vec<FetchState>>>) {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    let callback: ProgressCallback = Arc::new(move |_, state| sink.lock().unwrap().push(state));
    (callback, states)
}

async fn mount_page(server: &MockServer, page_path: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(body),
        )
        .mount(server)
        .await;
}

async fn mount_jpeg(server: &MockServer, image_path: &str) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0]),
        )
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn web_article_is_archived_with_media() {
    let server = MockServer::start().await;
    mount_page(&server, "/post", PAGE).await;
    mount_jpeg(&server, "/img/a.jpg").await;

    let base = TempDir::new().unwrap();
    let orchestrator = orchestrator(config());
    let (callback, states) = recorder();
    let url = format!("{}/post", server.uri());

    let report = orchestrator
        .fetch_article("Listed title", &url, 7, base.path(), Some(callback))
        .await;

    assert!(report.success(), "{:?}", report.outcome);
    assert_eq!(report.state, FetchState::Persisted);
    assert_eq!(report.title.as_deref(), Some("My Post"));
    let folder = report.folder.unwrap();
    assert_eq!(folder, base.path().join("My Post"));

    let doc = std::fs::read_to_string(folder.join(ARTICLE_FILE)).unwrap();
    assert!(doc.starts_with("# My Post\n"));
    assert!(doc.contains(&format!("- Source: <{url}>")));
    assert!(doc.contains("Hello world"));
    assert!(doc.contains("](images/a.jpg)"));
    assert!(!doc.contains("Copyright"));
    assert!(folder.join("images/a.jpg").exists());
    assert!(!folder.join(RAW_HTML_FILE).exists());

    assert_eq!(
        *states.lock().unwrap(),
        vec![
            FetchState::SkipCheck,
            FetchState::EthicalCheck,
            FetchState::MediaTypeSniff,
            FetchState::WebContentFetch,
            FetchState::MediaPostProcess,
            FetchState::Persisted,
        ]
    );
}

#[tokio::test]
async fn events_bracket_each_article() {
    let server = MockServer::start().await;
    mount_page(&server, "/post", "<html><body><article><p>Text only</p></article></body></html>").await;

    let base = TempDir::new().unwrap();
    let orchestrator = orchestrator(config());
    let mut events = orchestrator.services().subscribe();
    let url = format!("{}/post", server.uri());

    let report = orchestrator.fetch_article("T", &url, 3, base.path(), None).await;
    assert!(report.success());

    let mut started = false;
    let mut finished = None;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ArticleStarted { index, .. } => {
                assert_eq!(index, 3);
                started = true;
            }
            Event::ArticleFinished { outcome, folder, .. } => finished = Some((outcome, folder)),
            _ => {}
        }
    }
    assert!(started);
    let (outcome, folder) = finished.unwrap();
    assert_eq!(outcome, crate::types::OutcomeKind::Success);
    assert!(folder.is_some());
}

#[tokio::test]
async fn robots_disallow_skips_without_a_get() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/x"))
        .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
        .expect(0)
        .mount(&server)
        .await;

    let base = TempDir::new().unwrap();
    let url = format!("{}/private/x", server.uri());
    let report = orchestrator(config())
        .fetch_article("Private", &url, 0, base.path(), None)
        .await;

    assert_eq!(report.state, FetchState::Skipped);
    assert!(report.folder.is_none());
    assert!(matches!(
        report.outcome,
        Outcome::Skipped(SkipReason::RobotsDisallowed { .. })
    ));
}

#[tokio::test]
async fn second_fetch_of_a_url_is_skipped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/post"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<article><p>Once</p></article>"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let base = TempDir::new().unwrap();
    let orchestrator = orchestrator(config());
    let url = format!("{}/post", server.uri());

    let first = orchestrator.fetch_article("A", &url, 0, base.path(), None).await;
    let second = orchestrator
        .fetch_article("A", &format!("{url}#comments"), 1, base.path(), None)
        .await;

    assert!(first.success());
    assert!(matches!(
        second.outcome,
        Outcome::Skipped(SkipReason::AlreadyProcessed)
    ));
}

#[tokio::test]
async fn discussion_links_and_other_schemes_are_skipped() {
    let base = TempDir::new().unwrap();
    let orchestrator = orchestrator(config());

    let hn = orchestrator
        .fetch_article(
            "Ask HN",
            "https://news.ycombinator.com/item?id=1",
            0,
            base.path(),
            None,
        )
        .await;
    assert!(matches!(
        hn.outcome,
        Outcome::Skipped(SkipReason::FilteredUrl { .. })
    ));

    let ftp = orchestrator
        .fetch_article("Files", "ftp://example.com/file", 1, base.path(), None)
        .await;
    match ftp.outcome {
        Outcome::Skipped(SkipReason::UnsupportedScheme { scheme }) => assert_eq!(scheme, "ftp"),
        other => panic!("expected unsupported scheme, got {other:?}"),
    }
}

#[tokio::test]
async fn not_found_becomes_an_error_article_with_feed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        r#"<html><head><link rel="alternate" type="application/rss+xml" href="/feed.xml"></head></html>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(
                    r#"<?xml version="1.0"?><rss version="2.0"><channel><title>t</title><link>https://e.com</link><description>d</description></channel></rss>"#,
                ),
        )
        .mount(&server)
        .await;

    let base = TempDir::new().unwrap();
    let url = format!("{}/gone", server.uri());
    let report = orchestrator(config())
        .fetch_article("Lost Post", &url, 0, base.path(), None)
        .await;

    assert_eq!(report.state, FetchState::ErrorArticleSynthesized);
    match &report.outcome {
        Outcome::Failed(e) => assert_eq!(e.status(), Some(404)),
        other => panic!("expected failure, got {other:?}"),
    }
    let doc = std::fs::read_to_string(report.folder.unwrap().join(ARTICLE_FILE)).unwrap();
    assert!(doc.contains("Page not found"));
    assert!(doc.contains("HTTP 404"));
    assert!(doc.contains(&format!("<{}/feed.xml>", server.uri())));
}

#[tokio::test]
async fn persistent_server_errors_skip_after_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let base = TempDir::new().unwrap();
    let mut config = config();
    config.fetch.discover_feed_alternative = false;
    config.retry.max_attempts = 3;
    let orchestrator = orchestrator(config);
    let url = format!("{}/flaky", server.uri());

    let report = orchestrator
        .fetch_article("Flaky", &url, 0, base.path(), None)
        .await;

    assert_eq!(report.state, FetchState::ErrorArticleSynthesized);
    match &report.outcome {
        Outcome::Skipped(SkipReason::RetriesExhausted {
            attempts,
            category,
            status,
            ..
        }) => {
            assert_eq!(*attempts, 2);
            assert_eq!(*category, ErrorCategory::ServerError);
            assert_eq!(*status, Some(500));
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert!(report.folder.unwrap().join(ARTICLE_FILE).exists());
    assert_eq!(orchestrator.services().retry_skip.skipped().len(), 1);
}

#[tokio::test]
async fn rate_limited_article_spends_only_the_backoff_budget() {
    let defaults = Config::default();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(503))
        .expect(u64::from(defaults.ethics.max_backoff_retries) + 1)
        .mount(&server)
        .await;

    // default retry counts everywhere, only the waits shortened
    let mut config = Config::default();
    config.ethics.min_crawl_delay = Duration::ZERO;
    config.ethics.max_backoff = Duration::from_millis(1);
    config.retry.initial_delay = Duration::from_millis(1);
    config.fetch.retry_delay = Duration::from_millis(1);
    config.fetch.discover_feed_alternative = false;
    assert_eq!(config.fetch.max_retries, defaults.fetch.max_retries);
    assert_eq!(config.retry.max_attempts, defaults.retry.max_attempts);

    let base = TempDir::new().unwrap();
    let orchestrator = orchestrator(config);
    let url = format!("{}/down", server.uri());
    let report = orchestrator
        .fetch_article("Down", &url, 0, base.path(), None)
        .await;

    assert_eq!(report.state, FetchState::ErrorArticleSynthesized);
    match &report.outcome {
        Outcome::Skipped(SkipReason::RetriesExhausted {
            attempts,
            category,
            status,
            ..
        }) => {
            assert_eq!(*attempts, defaults.ethics.max_backoff_retries + 1);
            assert_eq!(*category, ErrorCategory::RateLimited);
            assert_eq!(*status, Some(503));
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert!(report.folder.unwrap().join(ARTICLE_FILE).exists());
}

#[tokio::test]
async fn pdf_links_are_saved_with_a_stub() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/papers/paper.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.4 test".to_vec()),
        )
        .mount(&server)
        .await;

    let base = TempDir::new().unwrap();
    let (callback, states) = recorder();
    let url = format!("{}/papers/paper.pdf", server.uri());
    let report = orchestrator(config())
        .fetch_article("A Paper", &url, 0, base.path(), Some(callback))
        .await;

    assert!(report.success(), "{:?}", report.outcome);
    let folder = report.folder.unwrap();
    assert_eq!(
        std::fs::read(folder.join("documents/paper.pdf")).unwrap(),
        b"%PDF-1.4 test"
    );
    let doc = std::fs::read_to_string(folder.join(ARTICLE_FILE)).unwrap();
    assert!(doc.contains("[paper.pdf](documents/paper.pdf)"));
    assert!(states.lock().unwrap().contains(&FetchState::PdfFetch));
}

#[tokio::test]
async fn binary_responses_are_rerouted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/download"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .mount(&server)
        .await;

    let base = TempDir::new().unwrap();
    let (callback, states) = recorder();
    let url = format!("{}/download", server.uri());
    let report = orchestrator(config())
        .fetch_article("Chart", &url, 0, base.path(), Some(callback))
        .await;

    assert!(report.success(), "{:?}", report.outcome);
    let folder = report.folder.unwrap();
    assert!(folder.join("images/download.jpg").exists());
    let states = states.lock().unwrap();
    assert!(states.contains(&FetchState::WebContentFetch));
    assert!(states.contains(&FetchState::DirectMediaFetch));
}

#[tokio::test]
async fn failed_conversion_keeps_raw_html_and_plain_text() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/post",
        "<html><body><article><p>Plain words survive.</p></article></body></html>",
    )
    .await;

    let base = TempDir::new().unwrap();
    let orchestrator = orchestrator(config());
    orchestrator.services().conversion.shutdown();
    let url = format!("{}/post", server.uri());

    let report = orchestrator.fetch_article("Raw", &url, 0, base.path(), None).await;

    assert!(report.success(), "{:?}", report.outcome);
    let folder = report.folder.unwrap();
    let doc = std::fs::read_to_string(folder.join(ARTICLE_FILE)).unwrap();
    assert!(doc.contains("Plain words survive."));
    assert!(folder.join(RAW_HTML_FILE).exists());
}

/// Disk that refuses the first article document it is asked to write
struct FlakyStorage {
    inner: FsStorage,
    failed_once: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl Storage for FlakyStorage {
    async fn create_article_folder(&self, base: &Path, title: &str) -> Result<PathBuf> {
        self.inner.create_article_folder(base, title).await
    }

    async fn save(&self, folder: &Path, name: &str, contents: &[u8]) -> Result<PathBuf> {
        if name == ARTICLE_FILE
            && !self
                .failed_once
                .swap(true, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::Io(std::io::Error::other("disk full")));
        }
        self.inner.save(folder, name, contents).await
    }

    async fn remove(&self, path: &Path) -> Result<()> {
        self.inner.remove(path).await
    }

    async fn remove_folder(&self, folder: &Path) -> Result<()> {
        self.inner.remove_folder(folder).await
    }
}

#[tokio::test]
async fn write_failure_leaves_only_the_error_article() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/post",
        "<html><head><title>Broken</title></head><body><article><p>Body</p></article></body></html>",
    )
    .await;

    let base = TempDir::new().unwrap();
    let mut config = config();
    config.fetch.discover_feed_alternative = false;
    let storage = Arc::new(FlakyStorage {
        inner: FsStorage::new(),
        failed_once: std::sync::atomic::AtomicBool::new(false),
    });
    let orchestrator = FetchOrchestrator::new(Services::new(config).unwrap(), storage);
    let url = format!("{}/post", server.uri());

    let report = orchestrator
        .fetch_article("Broken", &url, 0, base.path(), None)
        .await;

    assert_eq!(report.state, FetchState::ErrorArticleSynthesized);
    let folders: Vec<String> = std::fs::read_dir(base.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(folders, vec!["Broken".to_string()]);

    let folder = report.folder.unwrap();
    assert_eq!(folder, base.path().join("Broken"));
    assert!(folder.join(ARTICLE_FILE).exists());
    assert!(!folder.join(RAW_HTML_FILE).exists());
}

#[tokio::test]
async fn cancelled_runs_skip_everything() {
    let base = TempDir::new().unwrap();
    let token = CancellationToken::new();
    token.cancel();
    let orchestrator = orchestrator(config()).with_cancellation(token);

    let report = orchestrator
        .fetch_article("Any", "https://example.com/a", 0, base.path(), None)
        .await;
    assert!(matches!(report.outcome, Outcome::Skipped(SkipReason::Cancelled)));
    assert_eq!(report.state, FetchState::Skipped);
}

#[test]
fn routes_follow_extension_and_content_type() {
    assert_eq!(Route::sniff("https://e.com/a/paper.PDF"), Route::Pdf);
    assert_eq!(
        Route::sniff("https://e.com/ep.mp3"),
        Route::Direct(MediaKind::Audio)
    );
    assert_eq!(Route::sniff("https://e.com/post"), Route::Web);
    assert_eq!(Route::from_content_type("application/pdf"), Some(Route::Pdf));
    assert_eq!(
        Route::from_content_type("video/mp4"),
        Some(Route::Direct(MediaKind::Video))
    );
    assert_eq!(Route::from_content_type("application/json"), None);
}

#[test]
fn wayback_copies_wrap_the_url() {
    assert_eq!(
        web::wayback_url("https://example.com/a"),
        "https://web.archive.org/web/https://example.com/a"
    );
}
