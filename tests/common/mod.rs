//! Common test utilities for article-archiver integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use article_archiver::{Config, FetchOrchestrator, FsStorage, Services};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A JPEG header; enough for the media pipeline, which never decodes images
pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

/// Install a test subscriber once; `RUST_LOG` controls the output
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config for mock servers: no politeness floor, no transport retries
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.ethics.min_crawl_delay = Duration::ZERO;
    config.ethics.max_backoff_retries = 0;
    config.retry.max_attempts = 0;
    config.fetch.max_retries = 2;
    config.fetch.retry_delay = Duration::from_millis(10);
    config.fetch.archive_fallback = false;
    config.batch.progress_interval = Duration::from_millis(50);
    config
}

/// Orchestrator writing to the filesystem
pub fn orchestrator(config: Config) -> FetchOrchestrator {
    FetchOrchestrator::new(Services::new(config).unwrap(), Arc::new(FsStorage::new()))
}

/// Serve `body` as HTML at `route`
pub async fn mount_html(server: &MockServer, route: &str, body: impl Into<String>) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string(body.into()),
        )
        .mount(server)
        .await;
}

/// Serve a small JPEG at `route`
pub async fn mount_jpeg(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/jpeg")
                .set_body_bytes(JPEG_BYTES.to_vec()),
        )
        .mount(server)
        .await;
}

/// Serve a robots.txt
pub async fn mount_robots(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// A page with a title and an `<article>` body
pub fn article_page(title: &str, body_html: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head><body>\
         <nav><a href=\"/\">Home</a></nav>\
         <article>{body_html}</article>\
         <footer>Site footer</footer></body></html>"
    )
}

/// RSS 2.0 document with one item per `(title, link)`
pub fn rss_feed(items: &[(&str, String)]) -> String {
    let items: String = items
        .iter()
        .map(|(title, link)| format!("<item><title>{title}</title><link>{link}</link></item>"))
        .collect();
    format!(
        "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel>\
         <title>Test feed</title><link>https://example.com</link>\
         <description>Test</description>{items}</channel></rss>"
    )
}
