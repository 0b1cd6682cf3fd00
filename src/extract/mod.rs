//! Document list extraction.
//!
//! A workspace's catalog is recovered from its HTML page through an ordered
//! strategy chain (see [`strategies`]), falling back to the TOC endpoint when
//! the page yields nothing. Raw entries are normalized into [`Document`]s with
//! a resolved slug.

mod slug;
mod strategies;

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::error::ExportError;
use crate::model::{Document, split_namespace};
use crate::transport::ApiClient;

pub use slug::{RawTocEntry, resolve_slug};
pub use strategies::{
    PageStrategy, TocExtraction, entries_from_values, extract_from_page, find_toc,
    scrape_catalog,
};

/// Recovers document lists for workspaces.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    client: ApiClient,
}

impl ContentExtractor {
    /// Creates an extractor sharing `client`'s connection pool and session.
    #[must_use]
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// Returns the documents of `namespace` in catalog order.
    ///
    /// An empty catalog is a success with no documents. Entries whose slug
    /// cannot be resolved are dropped.
    ///
    /// # Errors
    ///
    /// [`ExportError::CredentialsExpired`] as soon as the host rejects the
    /// session, [`ExportError::InvalidNamespace`] when the page yields nothing
    /// and the namespace cannot address the TOC endpoint, and
    /// [`ExportError::ExtractionFailed`] when every strategy comes up empty.
    #[instrument(skip(self))]
    pub async fn workspace_documents(&self, namespace: &str) -> Result<Vec<Document>, ExportError> {
        let listing = self.extract(namespace).await?;
        info!(
            strategy = listing.strategy.as_str(),
            entries = listing.entries.len(),
            "document list extracted"
        );
        Ok(normalize(listing.entries))
    }

    /// Runs the strategy chain and reports which strategy succeeded.
    ///
    /// # Errors
    ///
    /// Same as [`workspace_documents`](Self::workspace_documents).
    pub async fn extract(&self, namespace: &str) -> Result<TocExtraction, ExportError> {
        let page_path = format!("/{}", namespace.trim().trim_matches('/'));
        match self.client.get_text(&page_path, true).await {
            Ok(page) => {
                if let Some(extraction) = extract_from_page(&page) {
                    return Ok(extraction);
                }
                warn!(namespace, "no catalog in workspace page; trying toc endpoint");
            }
            Err(ExportError::CredentialsExpired) => return Err(ExportError::CredentialsExpired),
            Err(error) => {
                warn!(namespace, %error, "workspace page unavailable; trying toc endpoint");
            }
        }

        self.toc_endpoint(namespace).await
    }

    async fn toc_endpoint(&self, namespace: &str) -> Result<TocExtraction, ExportError> {
        let Some((owner, slug)) = split_namespace(namespace) else {
            return Err(ExportError::invalid_namespace(namespace));
        };

        let path = format!("/api/repos/{owner}/{slug}/toc");
        match self.client.get_data::<Vec<Value>>(&path).await {
            Ok(values) => Ok(TocExtraction {
                strategy: PageStrategy::TocEndpoint,
                entries: entries_from_values(&values),
            }),
            Err(ExportError::CredentialsExpired) => Err(ExportError::CredentialsExpired),
            Err(error) => {
                warn!(namespace, %error, "toc endpoint failed");
                Err(ExportError::extraction_failed(namespace))
            }
        }
    }
}

fn normalize(entries: Vec<RawTocEntry>) -> Vec<Document> {
    entries
        .into_iter()
        .filter_map(RawTocEntry::into_document)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    use super::*;
    use crate::auth::CredentialStore;
    use crate::config::ExportConfig;
    use crate::test_support::socket_guard::start_mock_server_or_skip;
    use crate::transport::RetryPolicy;

    fn extractor_for(host: &str, meta: &Path) -> ContentExtractor {
        let config = ExportConfig::new(meta, meta.join("out")).with_host(host);
        let client = ApiClient::new(&config, CredentialStore::new(meta))
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(1));
        client
            .credentials()
            .save("_yuque_session=abc", Duration::from_secs(3600))
            .unwrap();
        ContentExtractor::new(client)
    }

    #[tokio::test]
    async fn test_page_payload_is_normalized() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let tempdir = TempDir::new().unwrap();

        let page = r#"<html><script>window.bookData = {"book":{"toc":[
            {"id":1,"title":"Intro","url":"intro","type":"DOC"},
            {"id":2,"title":"Group","type":"TITLE","uuid":"g-1"},
            {"title":"","url":""}
        ]}};</script></html>"#;
        Mock::given(method("GET"))
            .and(path("/alice/notes"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;

        let extractor = extractor_for(&server.uri(), tempdir.path());
        let docs = extractor.workspace_documents("alice/notes").await.unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].slug, "intro");
        assert_eq!(docs[0].id, "1");
        assert_eq!(docs[1].slug, "g-1");
        assert_eq!(docs[1].doc_type, "TITLE");
    }

    #[tokio::test]
    async fn test_falls_back_to_toc_endpoint() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let tempdir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/alice/notes"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nothing</html>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/repos/alice/notes/toc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": 7, "title": "From API", "slug": "from-api"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let extractor = extractor_for(&server.uri(), tempdir.path());
        let listing = extractor.extract("alice/notes").await.unwrap();
        assert_eq!(listing.strategy, PageStrategy::TocEndpoint);

        let docs = extractor.workspace_documents("alice/notes").await.unwrap();
        assert_eq!(docs[0].slug, "from-api");
        assert_eq!(docs[0].doc_type, "doc");
    }

    #[tokio::test]
    async fn test_page_error_then_toc_failure_is_extraction_failed() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let tempdir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let extractor = extractor_for(&server.uri(), tempdir.path());
        let result = extractor.workspace_documents("alice/notes").await;
        assert!(matches!(result, Err(ExportError::ExtractionFailed { .. })));
    }

    #[tokio::test]
    async fn test_unauthorized_page_propagates_credentials_expired() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let tempdir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .and(path("/alice/notes"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/repos/alice/notes/toc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .expect(0)
            .mount(&server)
            .await;

        let extractor = extractor_for(&server.uri(), tempdir.path());
        let result = extractor.workspace_documents("alice/notes").await;
        assert!(matches!(result, Err(ExportError::CredentialsExpired)));
    }

    #[tokio::test]
    async fn test_bad_namespace_without_page_catalog_is_invalid() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let tempdir = TempDir::new().unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let extractor = extractor_for(&server.uri(), tempdir.path());
        let result = extractor.workspace_documents("alice").await;
        assert!(matches!(result, Err(ExportError::InvalidNamespace { .. })));
    }
}
