//! The export run: enumerate, select, fetch, persist, then rewrite images.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, error, info, instrument, warn};

use super::filter::apply_selection;
use super::paths::{resolve_document_paths, sanitize_title};
use super::summary::{ExportObserver, ExportSummary, NoopObserver, SkipReason};
use super::workspaces::fetch_workspaces;
use crate::cache::{DocumentList, TtlCache, WorkspaceList, docs_key};
use crate::config::{ExportConfig, WorkspaceFailurePolicy};
use crate::constants::{MARKDOWN_EXPORT_FLAGS, MIN_MARKDOWN_CHARS, WORKSPACES_CACHE_KEY};
use crate::error::ExportError;
use crate::extract::ContentExtractor;
use crate::images::{ImageRewriter, markdown_files_under};
use crate::model::{Document, DownloadRequest, Workspace, split_namespace};
use crate::transport::{
    ApiClient, DOC_LIST_BACKOFF_MULTIPLIER, FailureType, RateLimiter, RetryDecision,
    retry_after_delay, retry_with_policy,
};

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

#[allow(clippy::expect_used)]
static LINEBREAK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</br>|<br\s*/?>").expect("linebreak regex is valid"));

/// Drives an export run.
///
/// Documents are fetched one at a time with a pacing delay between fetches.
/// A failed document is logged and counted; a failed workspace stops the run
/// or is skipped according to [`WorkspaceFailurePolicy`]. Expired credentials
/// always end the run.
pub struct ExportScheduler {
    config: ExportConfig,
    client: ApiClient,
    extractor: ContentExtractor,
    cache: TtlCache,
    pacing: RateLimiter,
    observer: Arc<dyn ExportObserver>,
    interrupted: Arc<AtomicBool>,
    refresh: bool,
    images_all: bool,
}

impl ExportScheduler {
    /// Creates a scheduler; the cache lives in `config.meta_dir`.
    #[must_use]
    pub fn new(config: ExportConfig, client: ApiClient) -> Self {
        Self {
            extractor: ContentExtractor::new(client.clone()),
            cache: TtlCache::new(config.meta_dir.clone()),
            pacing: RateLimiter::new(config.doc_delay),
            config,
            client,
            observer: Arc::new(NoopObserver),
            interrupted: Arc::new(AtomicBool::new(false)),
            refresh: false,
            images_all: false,
        }
    }

    /// Reports progress to `observer`.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn ExportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Checks `flag` between workspaces, documents, and image submissions.
    #[must_use]
    pub fn with_interrupt_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    /// Bypasses cache reads; fresh results are still cached.
    #[must_use]
    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// Rewrites every Markdown file under the output directory, not only
    /// those written by this run.
    #[must_use]
    pub fn with_images_all(mut self, images_all: bool) -> Self {
        self.images_all = images_all;
        self
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Lists every workspace visible to the session, cache first.
    ///
    /// # Errors
    ///
    /// [`ExportError::CredentialsExpired`] or a failure of the personal listing.
    pub async fn list_workspaces(&self) -> Result<Vec<Workspace>, ExportError> {
        if !self.refresh
            && let Some(cached) = self.cache.get::<WorkspaceList>(WORKSPACES_CACHE_KEY).await
        {
            debug!(count = cached.workspaces.len(), "workspaces from cache");
            return Ok(cached.workspaces);
        }

        let workspaces = fetch_workspaces(&self.client).await?;
        let record = WorkspaceList {
            workspaces: workspaces.clone(),
        };
        if let Err(error) = self
            .cache
            .put(WORKSPACES_CACHE_KEY, &record, self.config.cache_ttl)
            .await
        {
            warn!(%error, "could not cache workspace list");
        }
        Ok(workspaces)
    }

    /// Lists the documents of `namespace`, cache first.
    ///
    /// An empty extraction is retried with backoff up to the configured
    /// attempt count; only non-empty lists are cached.
    ///
    /// # Errors
    ///
    /// [`ExportError::CredentialsExpired`], [`ExportError::InvalidNamespace`],
    /// or the last extraction error once attempts run out.
    pub async fn document_list(&self, namespace: &str) -> Result<Vec<Document>, ExportError> {
        let key = docs_key(namespace);
        if !self.refresh
            && let Some(cached) = self.cache.get::<DocumentList>(&key).await
        {
            debug!(namespace, count = cached.docs.len(), "documents from cache");
            return Ok(cached.docs);
        }

        let policy = self
            .client
            .retry_policy()
            .clone()
            .with_multiplier(DOC_LIST_BACKOFF_MULTIPLIER);
        let mut attempt = 0u32;

        let outcome = loop {
            attempt += 1;
            let outcome = match self.extractor.workspace_documents(namespace).await {
                Ok(docs) if !docs.is_empty() => break Ok(docs),
                Err(error @ (ExportError::CredentialsExpired | ExportError::InvalidNamespace { .. })) => {
                    return Err(error);
                }
                other => other,
            };

            match policy.should_retry(FailureType::Transient, attempt) {
                RetryDecision::Retry { delay, attempt: next } => {
                    info!(namespace, attempt = next, delay_ms = delay.as_millis(), "retrying document list");
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { .. } => break outcome,
            }
        };

        let docs = outcome?;
        if !docs.is_empty() {
            let record = DocumentList { docs: docs.clone() };
            if let Err(error) = self.cache.put(&key, &record, self.config.cache_ttl).await {
                warn!(namespace, %error, "could not cache document list");
            }
        }
        Ok(docs)
    }

    /// Runs the export described by `request`.
    ///
    /// # Errors
    ///
    /// [`ExportError::CredentialsExpired`] whenever the host rejects the
    /// session, a failure to enumerate workspaces, or a failure to create the
    /// output directory. Everything else is reported in the summary.
    #[instrument(skip_all, fields(range = %request.range, limit = request.limit))]
    pub async fn run(&self, request: &DownloadRequest) -> Result<ExportSummary, ExportError> {
        let mut summary = ExportSummary::default();
        let known = self.list_workspaces().await?;
        let selected = select_workspaces(&known, request, &mut summary);
        if selected.is_empty() {
            warn!("none of the requested workspaces were found");
        }

        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| ExportError::filesystem(&self.config.output_dir, e))?;

        for workspace in selected {
            if self.is_interrupted() {
                summary.interrupted = true;
                break;
            }
            match self.export_workspace(workspace, request, &mut summary).await {
                Ok(()) => {}
                Err(ExportError::CredentialsExpired) => {
                    error!(workspace = %workspace.name, "session expired; stopping");
                    return Err(ExportError::CredentialsExpired);
                }
                Err(ExportError::Cancelled) => {
                    summary.interrupted = true;
                    break;
                }
                Err(error) => {
                    error!(workspace = %workspace.name, %error, "workspace export failed");
                    summary.workspaces_failed.push(workspace.name.clone());
                    if self.config.workspace_failure_policy == WorkspaceFailurePolicy::Abort {
                        summary.aborted = true;
                        break;
                    }
                }
            }
        }

        if self.config.download_images && !summary.interrupted {
            self.rewrite_images(&mut summary).await;
        }

        info!(
            written = summary.documents_written,
            skipped = summary.documents_skipped,
            failed = summary.documents_failed,
            "export finished"
        );
        Ok(summary)
    }

    #[instrument(skip_all, fields(workspace = %workspace.name, namespace = %workspace.namespace))]
    async fn export_workspace(
        &self,
        workspace: &Workspace,
        request: &DownloadRequest,
        summary: &mut ExportSummary,
    ) -> Result<(), ExportError> {
        if !workspace.is_downloadable() {
            warn!("workspace has no usable namespace; skipping");
            summary.workspaces_skipped += 1;
            return Ok(());
        }
        let namespace = workspace.namespace.trim();

        let docs = match self.document_list(namespace).await {
            Ok(docs) => docs,
            Err(
                error @ (ExportError::ExtractionFailed { .. } | ExportError::InvalidNamespace { .. }),
            ) => {
                warn!(%error, "document list unavailable; skipping workspace");
                summary.workspaces_skipped += 1;
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        if docs.is_empty() {
            warn!("workspace has no documents");
            summary.workspaces_skipped += 1;
            return Ok(());
        }

        let workspace_dir = self.config.output_dir.join(sanitize_title(&workspace.name));
        tokio::fs::create_dir_all(&workspace_dir)
            .await
            .map_err(|e| ExportError::filesystem(&workspace_dir, e))?;

        let selected = apply_selection(docs, request, &workspace.name);
        info!(documents = selected.len(), "exporting workspace");
        self.observer.workspace_started(workspace, selected.len());

        for doc in &selected {
            if self.is_interrupted() {
                return Err(ExportError::Cancelled);
            }
            self.export_document(namespace, &workspace_dir, doc, request, summary)
                .await?;
        }

        summary.workspaces_processed += 1;
        Ok(())
    }

    async fn export_document(
        &self,
        namespace: &str,
        workspace_dir: &Path,
        doc: &Document,
        request: &DownloadRequest,
        summary: &mut ExportSummary,
    ) -> Result<(), ExportError> {
        if doc.slug.trim().is_empty() && doc.url.trim().is_empty() {
            info!(doc = %doc.title, "no slug or url; skipping");
            self.skip(doc, SkipReason::NoIdentifier, summary);
            return Ok(());
        }
        if !doc.is_document_type() {
            info!(doc = %doc.title, kind = %doc.doc_type, "not a document; skipping");
            self.skip(doc, SkipReason::NotADocument, summary);
            return Ok(());
        }

        let paths = resolve_document_paths(workspace_dir, &doc.title);
        if request.skip_existing
            && let Some(existing) = paths.existing()
        {
            info!(doc = %doc.title, path = %existing.display(), "already exported; skipping");
            self.skip(doc, SkipReason::AlreadyExists, summary);
            return Ok(());
        }

        self.observer.document_started(doc);
        self.pacing.acquire(namespace).await;

        let result = match self
            .fetch_markdown(namespace, doc, request.preserve_linebreaks)
            .await
        {
            Ok(markdown) => tokio::fs::write(&paths.primary, markdown)
                .await
                .map_err(|e| ExportError::filesystem(&paths.primary, e)),
            Err(error) => Err(error),
        };

        match result {
            Ok(()) => {
                info!(doc = %doc.title, path = %paths.primary.display(), "document saved");
                summary.documents_written += 1;
                summary.written_files.push(paths.primary.clone());
                self.observer.document_finished(doc, &paths.primary);
            }
            Err(ExportError::CredentialsExpired) => return Err(ExportError::CredentialsExpired),
            Err(error) => {
                warn!(doc = %doc.title, %error, "document export failed");
                summary.documents_failed += 1;
                self.observer.document_failed(doc, &error);
            }
        }
        Ok(())
    }

    fn skip(&self, doc: &Document, reason: SkipReason, summary: &mut ExportSummary) {
        summary.documents_skipped += 1;
        self.observer.document_skipped(doc, reason);
    }

    /// Fetches a document's Markdown, trying each export URL in turn.
    ///
    /// A body of 10 characters or fewer counts as empty and moves on to the
    /// next URL. `<br>` tags are stripped unless `preserve_linebreaks` is set.
    ///
    /// # Errors
    ///
    /// [`ExportError::CredentialsExpired`] immediately,
    /// [`ExportError::InvalidNamespace`] for a malformed namespace, and
    /// [`ExportError::EmptyContent`] once every URL has been tried.
    pub async fn fetch_markdown(
        &self,
        namespace: &str,
        doc: &Document,
        preserve_linebreaks: bool,
    ) -> Result<String, ExportError> {
        let identifier = doc.export_identifier().trim();

        for path in export_paths(namespace, identifier, preserve_linebreaks)? {
            let path = path.as_str();
            let result = retry_with_policy(self.client.retry_policy(), "markdown export", || {
                self.client.get_text(path, false)
            })
            .await;

            match result {
                Ok(text) if text.trim().chars().count() > MIN_MARKDOWN_CHARS => {
                    return Ok(if preserve_linebreaks {
                        text
                    } else {
                        strip_linebreaks(&text)
                    });
                }
                Ok(text) => debug!(path, chars = text.len(), "export returned no content"),
                Err(ExportError::CredentialsExpired) => return Err(ExportError::CredentialsExpired),
                Err(error) => {
                    if let Some(delay) = retry_after_delay(&error) {
                        self.pacing.record_rate_limit(namespace, delay).await;
                    }
                    debug!(path, %error, "export attempt failed");
                }
            }
        }

        Err(ExportError::empty_content(namespace, identifier))
    }

    async fn rewrite_images(&self, summary: &mut ExportSummary) {
        let files = if self.images_all {
            match markdown_files_under(&self.config.output_dir) {
                Ok(files) => files,
                Err(error) => {
                    warn!(%error, "cannot list exported files for image rewriting");
                    return;
                }
            }
        } else {
            summary.written_files.clone()
        };
        if files.is_empty() {
            return;
        }

        let rewriter = ImageRewriter::new(self.client.clone(), &self.config)
            .with_observer(Arc::clone(&self.observer))
            .with_interrupt_flag(Arc::clone(&self.interrupted));
        info!(files = files.len(), workers = rewriter.workers(), "rewriting images");

        for file in files {
            if self.is_interrupted() {
                summary.interrupted = true;
                break;
            }
            match rewriter.process_file(&file).await {
                Ok(rewrite) => {
                    summary.files_rewritten += 1;
                    summary.images_downloaded += rewrite.downloaded;
                    summary.images_failed += rewrite.failed;
                    if rewrite.interrupted {
                        summary.interrupted = true;
                        break;
                    }
                    if let Some(entry) = summary.written_files.iter_mut().find(|p| **p == file) {
                        *entry = rewrite.output_path;
                    }
                }
                Err(error) => warn!(file = %file.display(), %error, "image rewrite failed"),
            }
        }
    }
}

fn select_workspaces<'a>(
    known: &'a [Workspace],
    request: &DownloadRequest,
    summary: &mut ExportSummary,
) -> Vec<&'a Workspace> {
    for name in &request.workspace_names {
        if known.iter().any(|w| &w.name == name) {
            continue;
        }
        let suggestion = closest_name(name, known);
        warn!(workspace = %name, suggestion = ?suggestion, "unknown workspace");
        summary.missing_workspaces.push((name.clone(), suggestion));
    }

    known
        .iter()
        .filter(|w| request.workspace_names.contains(&w.name))
        .collect()
}

fn closest_name(name: &str, known: &[Workspace]) -> Option<String> {
    known
        .iter()
        .map(|w| (strsim::jaro_winkler(name, &w.name), &w.name))
        .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, candidate)| candidate.clone())
}

/// Export URLs for a document, in the order they are tried.
///
/// The first is built from the identifier itself, the second is always
/// `/<owner>/<slug>/<identifier>` and is only included when it differs, and the
/// last is the API path.
///
/// # Errors
///
/// [`ExportError::InvalidNamespace`] unless `namespace` is `owner/slug`.
pub fn export_paths(
    namespace: &str,
    identifier: &str,
    preserve_linebreaks: bool,
) -> Result<Vec<String>, ExportError> {
    let (owner, slug) =
        split_namespace(namespace).ok_or_else(|| ExportError::invalid_namespace(namespace))?;
    let query = format!("{MARKDOWN_EXPORT_FLAGS}&linebreak={preserve_linebreaks}");

    let primary = if identifier.starts_with('/') {
        identifier.to_string()
    } else if identifier.starts_with(&format!("{owner}/{slug}")) || identifier.contains('/') {
        format!("/{identifier}")
    } else {
        format!("/{owner}/{slug}/{identifier}")
    };
    let alternate = format!("/{owner}/{slug}/{identifier}");

    let mut paths = vec![format!("{primary}/markdown?{query}")];
    if alternate != primary {
        paths.push(format!("{alternate}/markdown?{query}"));
    }
    paths.push(format!("/api/docs/{owner}/{slug}/{identifier}/markdown"));
    Ok(paths)
}

/// Removes `<br>`, `<br/>`, `<br />` and `</br>` tags.
#[must_use]
pub fn strip_linebreaks(markdown: &str) -> String {
    LINEBREAK_PATTERN.replace_all(markdown, "").into_owned()
}
