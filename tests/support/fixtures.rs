//! Mock-host fixtures: a logged-in client, workspace listings, and flaky responders.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use exporter_core::{ApiClient, CredentialStore, ExportConfig, RetryPolicy};
use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const SESSION: &str = "_yuque_session=test-session";

/// Meta and output directories for one test, removed on drop.
pub struct TestEnv {
    pub dir: TempDir,
    pub config: ExportConfig,
}

impl TestEnv {
    /// Config pointed at `server`, with no pacing delay and a stored session.
    pub fn logged_in(server: &MockServer) -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let mut config = ExportConfig::new(dir.path().join("meta"), dir.path().join("out"))
            .with_host(&server.uri());
        config.doc_delay = Duration::ZERO;
        config.max_retries = 1;

        CredentialStore::new(&config.meta_dir)
            .save(SESSION, Duration::from_secs(3600))
            .expect("failed to store session");
        Self { dir, config }
    }

    pub fn output_dir(&self) -> PathBuf {
        self.config.output_dir.clone()
    }

    /// Client sharing this env's credentials, retrying without delay.
    pub fn client(&self, attempts: u32) -> ApiClient {
        ApiClient::new(&self.config, CredentialStore::new(&self.config.meta_dir))
            .expect("failed to build client")
            .with_retry_policy(RetryPolicy::immediate(attempts))
    }
}

/// Serves a personal listing with the given `(name, namespace)` books.
pub async fn mount_personal_workspaces(server: &MockServer, books: &[(&str, &str)]) {
    let books: Vec<Value> = books
        .iter()
        .enumerate()
        .map(|(index, (name, namespace))| {
            json!({"id": index + 1, "name": name, "namespace": namespace, "items_count": 3})
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/api/mine/book_stacks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"name": "Stack", "books": books}]
        })))
        .mount(server)
        .await;
}

/// Serves a workspace page whose `window.bookData` carries `toc`.
pub async fn mount_workspace_page(server: &MockServer, namespace: &str, toc: &Value) {
    let page = format!(
        "<html><head></head><body><script>window.bookData = {};</script></body></html>",
        json!({"book": {"toc": toc}})
    );
    Mock::given(method("GET"))
        .and(path(format!("/{namespace}")))
        .respond_with(ResponseTemplate::new(200).set_body_string(page))
        .mount(server)
        .await;
}

/// Serves Markdown at the primary export path for `namespace/slug`.
pub async fn mount_markdown(server: &MockServer, namespace: &str, slug: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/{namespace}/{slug}/markdown")))
        .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
        .mount(server)
        .await;
}

/// Responder that fails the first `fail_count` requests with 500, then returns `body`.
pub struct FlakyResponder {
    request_count: Arc<AtomicUsize>,
    fail_count: usize,
    body: String,
}

impl FlakyResponder {
    pub fn new(fail_count: usize, body: impl Into<String>) -> (Self, Arc<AtomicUsize>) {
        let request_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                request_count: Arc::clone(&request_count),
                fail_count,
                body: body.into(),
            },
            request_count,
        )
    }
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let seen = self.request_count.fetch_add(1, Ordering::SeqCst);
        if seen < self.fail_count {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_string(self.body.clone())
        }
    }
}
