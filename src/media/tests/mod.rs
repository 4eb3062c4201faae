// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::config::{EthicsConfig, HttpConfig, RetryConfig};
use crate::ethical::EthicalScrapingManager;
use crate::timeout_tracker::TimeoutTracker;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn processor(config: MediaConfig) -> (MediaProcessor, broadcast::Receiver<Event>) {
    let http = HttpConfig::default();
    let ethics = EthicsConfig {
        min_crawl_delay: Duration::ZERO,
        ..Default::default()
    };
    let retry = RetryConfig {
        max_attempts: 0,
        ..Default::default()
    };
    let fetcher = HttpFetcher::new(
        &http,
        retry,
        Arc::new(TimeoutTracker::new(100, TimeoutConfig::default(), 10)),
        Arc::new(EthicalScrapingManager::new(ethics, &http).unwrap()),
    );
    let (tx, rx) = broadcast::channel(64);
    (MediaProcessor::new(config, Arc::new(fetcher), tx), rx)
}

fn jpeg() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "image/jpeg")
        .set_body_bytes(vec![0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10])
}

async fn mount_image(server: &MockServer, image_path: &str, expected_calls: u64) {
    Mock::given(method("GET"))
        .and(path(image_path))
        .respond_with(jpeg())
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn ctx(cancel: &CancellationToken, download_all: bool) -> MediaContext<'_> {
    MediaContext {
        source: "test",
        timeouts: TimeoutConfig::default(),
        crawl_delay: Duration::ZERO,
        download_all,
        cancel,
    }
}

fn files_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

#[tokio::test]
async fn tracking_pixel_is_dropped_and_real_images_saved() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/one.jpg", 1).await;
    mount_image(&server, "/img/two.jpg", 1).await;
    mount_image(&server, "/img/1x1.gif", 0).await;

    let content = r#"
        <p>Intro</p>
        <img src="/img/one.jpg" width="800" height="600" alt="One">
        <img src="/img/two.jpg" width="800" height="600" alt="Two">
        <img src="/img/1x1.gif" alt="">
    "#;
    let markdown = crate::html::to_markdown(content);
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let (processor, _rx) = processor(MediaConfig::default());

    let outcome = processor
        .process(
            MediaInput {
                markdown: &markdown,
                content_html: content,
                page_html: content,
                base_url: &base,
                folder: dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;

    assert_eq!(files_in(&dir.path().join("images")), vec!["one.jpg", "two.jpg"]);
    assert_eq!(outcome.saved.len(), 2);
    assert_eq!(outcome.rejected, 1);
    assert_eq!(outcome.markdown.matches("](images/").count(), 2);
    assert!(!outcome.markdown.contains("1x1"));
    assert_eq!(outcome.fallback_added, 0);
}

#[tokio::test]
async fn url_referenced_twice_is_fetched_once() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/shared.jpg", 1).await;

    let content = format!(
        r#"<img src="/img/shared.jpg" alt="First"><p>text</p><img src="{}/img/shared.jpg" alt="Again">"#,
        server.uri()
    );
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let markdown = format!(
        "![First](/img/shared.jpg)\n\n![Again]({}/img/shared.jpg)",
        server.uri()
    );
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let config = MediaConfig {
        fallback_enabled: false,
        ..Default::default()
    };
    let (processor, _rx) = processor(config);

    let outcome = processor
        .process(
            MediaInput {
                markdown: &markdown,
                content_html: &content,
                page_html: &content,
                base_url: &base,
                folder: dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;

    assert_eq!(outcome.saved.len(), 1);
    assert_eq!(outcome.markdown.matches("(images/shared.jpg)").count(), 2);
}

#[tokio::test]
async fn failed_and_html_responses_are_marked_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/login.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>please log in</html>"),
        )
        .mount(&server)
        .await;

    let content = r#"<img src="/img/missing.png" alt="Gone"><img src="/img/login.png" alt="Walled">"#;
    let markdown = "![Gone](/img/missing.png)\n\n![Walled](/img/login.png)";
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let config = MediaConfig {
        fallback_enabled: false,
        ..Default::default()
    };
    let (processor, mut rx) = processor(config);

    let outcome = processor
        .process(
            MediaInput {
                markdown,
                content_html: content,
                page_html: content,
                base_url: &base,
                folder: dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;

    assert!(outcome.saved.is_empty());
    assert_eq!(outcome.failed.len(), 2);
    assert!(
        outcome
            .markdown
            .contains(&format!("[Gone (unavailable)]({}/img/missing.png)", server.uri()))
    );
    assert!(outcome.markdown.contains("[Walled (unavailable)]"));
    assert!(!dir.path().join("images").join("login.png").exists());

    let mut failures = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, Event::MediaFailed { .. }) {
            failures += 1;
        }
    }
    assert_eq!(failures, 2);
}

#[tokio::test]
async fn documents_need_download_all() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/files/paper.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(b"%PDF-1.4".to_vec()),
        )
        .expect(1)
        .mount(&server)
        .await;

    let content = r#"<p>Read <a href="/files/paper.pdf">the paper</a>.</p>"#;
    let markdown = "Read [the paper](/files/paper.pdf).";
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let cancel = CancellationToken::new();
    let config = MediaConfig {
        fallback_enabled: false,
        ..Default::default()
    };
    let (processor, _rx) = processor(config);

    let restricted_dir = TempDir::new().unwrap();
    let restricted = processor
        .process(
            MediaInput {
                markdown,
                content_html: content,
                page_html: content,
                base_url: &base,
                folder: restricted_dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;
    assert!(restricted.saved.is_empty());
    assert_eq!(restricted.markdown, markdown);

    let all_dir = TempDir::new().unwrap();
    let all = processor
        .process(
            MediaInput {
                markdown,
                content_html: content,
                page_html: content,
                base_url: &base,
                folder: all_dir.path(),
            },
            &ctx(&cancel, true),
        )
        .await;
    assert_eq!(all.saved.len(), 1);
    assert_eq!(all.saved[0].kind, MediaKind::Document);
    assert_eq!(all.markdown, "Read [the paper](documents/paper.pdf).");
    assert!(all_dir.path().join("documents/paper.pdf").exists());
}

#[tokio::test]
async fn fallback_scan_adds_page_images() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/hero.jpg", 1).await;
    mount_image(&server, "/img/logo.png", 0).await;
    mount_image(&server, "/img/thumb.jpg", 0).await;

    let content = "<p>Words only.</p>";
    let page = r#"<html><body>
        <header><img src="/img/logo.png" class="site-logo"></header>
        <div class="hero"><img src="/img/hero.jpg" width="1200" height="630" alt="Hero"></div>
        <article><p>Words only.</p></article>
        <img src="/img/thumb.jpg" width="80" height="80">
    </body></html>"#;
    let markdown = "Words only.";
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let (processor, _rx) = processor(MediaConfig::default());

    let outcome = processor
        .process(
            MediaInput {
                markdown,
                content_html: content,
                page_html: page,
                base_url: &base,
                folder: dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;

    assert_eq!(outcome.fallback_added, 1);
    assert!(outcome.markdown.starts_with("Words only."));
    assert!(outcome.markdown.contains("## Additional Images"));
    assert!(outcome.markdown.contains("![Hero](images/hero.jpg)"));
    assert_eq!(files_in(&dir.path().join("images")), vec!["hero.jpg"]);
}

#[tokio::test]
async fn fallback_threshold_is_configurable() {
    let server = MockServer::start().await;
    mount_image(&server, "/img/body.jpg", 1).await;
    mount_image(&server, "/img/extra.jpg", 0).await;

    let content = r#"<img src="/img/body.jpg" alt="Body">"#;
    let page = r#"<html><body><img src="/img/body.jpg"><img src="/img/extra.jpg"></body></html>"#;
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let config = MediaConfig {
        fallback_min_images: 1,
        ..Default::default()
    };
    let (processor, _rx) = processor(config);

    let outcome = processor
        .process(
            MediaInput {
                markdown: "![Body](/img/body.jpg)",
                content_html: content,
                page_html: page,
                base_url: &base,
                folder: dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;

    assert_eq!(outcome.saved.len(), 1);
    assert_eq!(outcome.fallback_added, 0);
    assert!(!outcome.markdown.contains("Additional Images"));
}

#[tokio::test]
async fn robots_disallowed_media_is_never_requested() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private-media/\n"))
        .mount(&server)
        .await;
    mount_image(&server, "/private-media/a.jpg", 0).await;
    mount_image(&server, "/img/open.jpg", 1).await;

    let content = r#"<img src="/private-media/a.jpg" alt="Private"><img src="/img/open.jpg" alt="Open">"#;
    let markdown = "![Private](/private-media/a.jpg)\n\n![Open](/img/open.jpg)";
    let base = Url::parse(&format!("{}/post", server.uri())).unwrap();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let config = MediaConfig {
        fallback_enabled: false,
        ..Default::default()
    };
    let (processor, _rx) = processor(config);

    let outcome = processor
        .process(
            MediaInput {
                markdown,
                content_html: content,
                page_html: content,
                base_url: &base,
                folder: dir.path(),
            },
            &ctx(&cancel, false),
        )
        .await;

    assert_eq!(outcome.saved.len(), 1);
    assert_eq!(outcome.failed.len(), 1);
    assert!(outcome.failed[0].url.ends_with("/private-media/a.jpg"));
    assert!(outcome.markdown.contains("[Private (unavailable)]"));
    assert_eq!(files_in(&dir.path().join("images")), vec!["open.jpg"]);
}

#[tokio::test]
async fn page_crawl_delay_does_not_slow_other_hosts() {
    let page_server = MockServer::start().await;
    let cdn = MockServer::start().await;
    mount_image(&cdn, "/a.jpg", 1).await;
    mount_image(&cdn, "/b.jpg", 1).await;

    let content = format!(
        r#"<img src="{0}/a.jpg" alt="A"><img src="{0}/b.jpg" alt="B">"#,
        cdn.uri()
    );
    let markdown = format!("![A]({0}/a.jpg)\n\n![B]({0}/b.jpg)", cdn.uri());
    let base = Url::parse(&format!("{}/post", page_server.uri())).unwrap();
    let dir = TempDir::new().unwrap();
    let cancel = CancellationToken::new();
    let config = MediaConfig {
        fallback_enabled: false,
        max_workers: 1,
        ..Default::default()
    };
    let (processor, _rx) = processor(config);
    let slow_page = MediaContext {
        crawl_delay: Duration::from_secs(3),
        ..ctx(&cancel, false)
    };

    let started = std::time::Instant::now();
    let outcome = processor
        .process(
            MediaInput {
                markdown: &markdown,
                content_html: &content,
                page_html: &content,
                base_url: &base,
                folder: dir.path(),
            },
            &slow_page,
        )
        .await;

    assert_eq!(outcome.saved.len(), 2);
    assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
}

#[test]
fn hosts_compare_with_their_ports() {
    let page = Url::parse("http://127.0.0.1:8080/post").unwrap();
    assert!(same_host("http://127.0.0.1:8080/img/a.jpg", &page));
    assert!(!same_host("http://127.0.0.1:9090/img/a.jpg", &page));
    assert!(!same_host("https://cdn.example.com/a.jpg", &page));
    assert!(!same_host("not a url", &page));
}

#[test]
fn kinds_classify_by_extension() {
    assert_eq!(MediaKind::from_url("https://e.com/a.JPG"), Some(MediaKind::Image));
    assert_eq!(MediaKind::from_url("https://e.com/a.pdf?x=1"), Some(MediaKind::Document));
    assert_eq!(MediaKind::from_url("https://e.com/ep.mp3"), Some(MediaKind::Audio));
    assert_eq!(MediaKind::from_url("https://e.com/clip.webm"), Some(MediaKind::Video));
    assert_eq!(MediaKind::from_url("https://e.com/post"), None);
    assert_eq!(MediaKind::from_url("https://e.com/"), None);
    assert_eq!(MediaKind::Video.dir_name(), "video");
}

#[test]
fn rel_paths_use_forward_slashes() {
    assert_eq!(rel_path_string(Path::new("images").join("a.jpg").as_path()), "images/a.jpg");
}
