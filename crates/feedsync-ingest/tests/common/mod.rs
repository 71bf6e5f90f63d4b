//! Shared helpers for feedsync integration tests
//!
//! - [`MockFeed`]: a wiremock server playing the remote listing and its archives
//! - [`zip_bytes`]: in-memory zip archives
//! - [`ingestor`]: an [`Ingestor`] wired to in-memory store and queue

#![allow(dead_code)]

use feedsync_ingest::store::{MemoryDocumentQueue, MemoryWatermarkStore};
use feedsync_ingest::{FailurePolicy, IngestConfig, Ingestor};
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zip::write::SimpleFileOptions;

/// Initialize tracing once per test binary
pub fn init_test_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,feedsync_ingest=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Zip archive holding `entries` as `(name, content)` files
pub fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(content.as_bytes()).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Directory listing page linking to every href
pub fn listing_html(hrefs: &[&str]) -> String {
    let links: String = hrefs
        .iter()
        .map(|href| format!("<tr><td><a href=\"{href}\">{href}</a></td></tr>\n"))
        .collect();
    format!(
        "<html><head><title>Index of /posts</title></head><body>\n\
         <table>\n<tr><th><a href=\"?C=N;O=D\">Name</a></th></tr>\n\
         <tr><td><a href=\"/mainstream/\">Parent Directory</a></td></tr>\n\
         {links}</table></body></html>"
    )
}

/// Remote feed served from `/posts/`
pub struct MockFeed {
    pub server: MockServer,
}

impl MockFeed {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn listing_url(&self) -> String {
        format!("{}/posts/", self.server.uri())
    }

    /// Serve a listing linking `<id>.zip` for every id
    pub async fn listing(&self, ids: &[u64]) {
        let hrefs: Vec<String> = ids.iter().map(|id| format!("{id}.zip")).collect();
        let hrefs: Vec<&str> = hrefs.iter().map(String::as_str).collect();
        self.raw_listing(&listing_html(&hrefs)).await;
    }

    pub async fn raw_listing(&self, html: &str) {
        Mock::given(method("GET"))
            .and(path("/posts/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(html))
            .mount(&self.server)
            .await;
    }

    pub async fn listing_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/posts/"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve `<id>.zip` with `body`
    pub async fn archive(&self, id: u64, body: Vec<u8>) {
        Mock::given(method("GET"))
            .and(path(format!("/posts/{id}.zip")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
            .mount(&self.server)
            .await;
    }

    /// Serve `<id>.zip` holding one document named `<id>.xml`
    pub async fn archive_with_document(&self, id: u64) {
        let name = format!("{id}.xml");
        let content = format!("<post id=\"{id}\"/>");
        self.archive(id, zip_bytes(&[(&name, &content)])).await;
    }

    pub async fn archive_status(&self, id: u64, status: u16) {
        Mock::given(method("GET"))
            .and(path(format!("/posts/{id}.zip")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Answer `<id>.zip` with `status` only after `delay`
    pub async fn archive_status_after(&self, id: u64, status: u16, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(format!("/posts/{id}.zip")))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Paths requested so far, in arrival order
    pub async fn requested_paths(&self) -> Vec<String> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| request.url.path().to_string())
            .collect()
    }
}

pub fn config(feed: &MockFeed, scratch_root: &Path) -> IngestConfig {
    IngestConfig::builder()
        .listing_url(feed.listing_url())
        .scratch_root(scratch_root)
        .concurrency(4)
        .timeout_secs(10)
        .failure_policy(FailurePolicy::WaitAll)
        .build()
}

pub fn ingestor(
    config: IngestConfig,
    store: &Arc<MemoryWatermarkStore>,
    queue: &Arc<MemoryDocumentQueue>,
) -> Ingestor {
    Ingestor::new(config, store.clone(), queue.clone()).expect("valid test config")
}

/// True when `dir` has no entries left
pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
