//! HTTP client wrapper for the workspace host.
//!
//! [`ApiClient`] owns one pooled `reqwest` client configured with a single
//! request timeout, the fixed mobile User-Agent, and the matching Referer. It
//! attaches the stored session token to every host request, maps non-success
//! responses into [`ExportError`], and persists any session the server hands
//! back on POST.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue, ORIGIN, REFERER,
    RETRY_AFTER, SET_COOKIE,
};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};

use super::rate_limiter::parse_retry_after;
use super::retry::{RetryDecision, RetryPolicy, classify_error};
use crate::auth::CredentialStore;
use crate::config::ExportConfig;
use crate::constants::{DOWNLOAD_CHUNK_SIZE, MAX_ERROR_BODY_CHARS, SHORT_PAGE_THRESHOLD};
use crate::error::ExportError;
use crate::user_agent::{HTML_ACCEPT, HTML_ACCEPT_LANGUAGE};

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Client for the workspace host.
///
/// Created once per run and shared by reference; the inner `reqwest::Client`
/// pools connections.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    host: String,
    credentials: CredentialStore,
    credentials_ttl: Duration,
    retry: RetryPolicy,
}

impl ApiClient {
    /// Builds a client from the export configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::ClientBuild`] if the TLS backend or proxy
    /// settings cannot be initialised.
    pub fn new(config: &ExportConfig, credentials: CredentialStore) -> Result<Self, ExportError> {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(&config.referer) {
            Ok(value) => {
                headers.insert(REFERER, value);
            }
            Err(_) => warn!(referer = %config.referer, "ignoring unusable Referer"),
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .gzip(true)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(ExportError::ClientBuild)?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            credentials,
            credentials_ttl: config.credentials_ttl,
            retry: RetryPolicy::with_max_attempts(config.max_retries),
        })
    }

    /// Replaces the retry policy used for file downloads.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Retry policy shared with callers that retry host requests.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// The credential store this client reads its session from.
    #[must_use]
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Absolute URL for a host path. Absolute URLs pass through unchanged.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{path}", self.host)
        } else {
            format!("{}/{path}", self.host)
        }
    }

    fn session_token(&self) -> Result<String, ExportError> {
        self.credentials
            .load()
            .map(|credentials| credentials.token)
            .ok_or(ExportError::CredentialsExpired)
    }

    fn json_request(&self, builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let mut builder = builder
            .header(CONTENT_TYPE, "application/json")
            .header(ORIGIN, self.host.as_str())
            .header("X-Requested-With", "XMLHttpRequest");
        if let Some(token) = token {
            builder = builder.header(COOKIE, token);
        }
        builder
    }

    /// GETs a JSON document and decodes the whole body.
    ///
    /// # Errors
    ///
    /// [`ExportError::CredentialsExpired`] without a valid session or on 401,
    /// [`ExportError::RequestFailed`] on other non-success statuses,
    /// [`ExportError::Transport`]/[`ExportError::Timeout`] on connection failure,
    /// and [`ExportError::InvalidResponse`] if the body does not decode as `T`.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExportError> {
        let token = self.session_token()?;
        let url = self.url_for(path);
        let request = self.json_request(self.client.get(&url), Some(&token));
        let response = send_checked(request, &url, true).await?;
        let body = response
            .text()
            .await
            .map_err(|e| ExportError::from_reqwest(&url, e))?;
        serde_json::from_str(&body).map_err(|e| ExportError::invalid_response(&url, e))
    }

    /// GETs a `{"data": ...}` envelope and returns the `data` member.
    ///
    /// # Errors
    ///
    /// Same as [`get_json`](Self::get_json).
    pub async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, ExportError> {
        let envelope: DataEnvelope<T> = self.get_json(path).await?;
        Ok(envelope.data)
    }

    /// GETs a text body. HTML fetches send browser Accept headers and warn on
    /// suspiciously short pages.
    ///
    /// # Errors
    ///
    /// Same contract as [`get_json`](Self::get_json), minus decoding.
    #[instrument(skip(self), level = "debug")]
    pub async fn get_text(&self, path: &str, as_html: bool) -> Result<String, ExportError> {
        let token = self.session_token()?;
        let url = self.url_for(path);
        let request = if as_html {
            self.client
                .get(&url)
                .header(ACCEPT, HTML_ACCEPT)
                .header(ACCEPT_LANGUAGE, HTML_ACCEPT_LANGUAGE)
                .header(COOKIE, token.as_str())
        } else {
            self.json_request(self.client.get(&url), Some(&token))
        };

        let response = send_checked(request, &url, true).await?;
        let text = response
            .text()
            .await
            .map_err(|e| ExportError::from_reqwest(&url, e))?;

        if as_html && text.len() < SHORT_PAGE_THRESHOLD {
            warn!(url = %url, bytes = text.len(), "suspiciously short page");
        }
        Ok(text)
    }

    /// POSTs a JSON body, storing any session cookies the response sets.
    ///
    /// Works without a stored session so it can drive the login exchange.
    ///
    /// # Errors
    ///
    /// Transport, status, and decoding errors as for [`get_json`](Self::get_json);
    /// [`ExportError::Filesystem`] if a returned session cannot be stored.
    #[instrument(skip(self, body), level = "debug")]
    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ExportError> {
        let url = self.url_for(path);
        let token = self.credentials.load().map(|credentials| credentials.token);
        let request = self
            .json_request(self.client.post(&url), token.as_deref())
            .body(body.to_string());

        let response = send_checked(request, &url, false).await?;
        if let Some(session) = session_from_set_cookie(response.headers()) {
            self.credentials.save(&session, self.credentials_ttl)?;
            info!("stored session issued by server");
        }

        let text = response
            .text()
            .await
            .map_err(|e| ExportError::from_reqwest(&url, e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ExportError::invalid_response(&url, e))
    }

    /// Downloads `url` to `path`, streaming in fixed-size chunks.
    ///
    /// `on_progress` receives the completed fraction (0.0 to 1.0) when the
    /// server reports a length, and a final 1.0 on success. Transient failures
    /// are retried with the client's [`RetryPolicy`]. No session cookie is
    /// sent, since images live on a public CDN.
    ///
    /// Returns `Ok(false)` when the server answers with a non-success status,
    /// so batch callers can carry on. Partial files are removed.
    ///
    /// # Errors
    ///
    /// Connection, timeout, and filesystem failures that outlast the retries.
    #[instrument(skip(self, on_progress), fields(path = %path.display()))]
    pub async fn download_to_file<F>(
        &self,
        url: &str,
        path: &Path,
        mut on_progress: F,
    ) -> Result<bool, ExportError>
    where
        F: FnMut(f64) + Send,
    {
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let error = match self.stream_to_path(url, path, &mut on_progress).await {
                Ok(bytes) => {
                    debug!(bytes, "download complete");
                    return Ok(true);
                }
                Err(error) => error,
            };

            let server_delay = match &error {
                ExportError::RequestFailed {
                    status: 429,
                    retry_after: Some(value),
                    ..
                } => parse_retry_after(value),
                _ => None,
            };

            match self.retry.should_retry(classify_error(&error), attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    let delay = server_delay.unwrap_or(delay);
                    info!(
                        attempt = next_attempt,
                        delay_ms = delay.as_millis(),
                        error = %error,
                        "retrying download"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    if let ExportError::RequestFailed { status, .. } = &error {
                        warn!(url, status, %reason, "download rejected by server");
                        return Ok(false);
                    }
                    return Err(error);
                }
            }
        }
    }

    async fn stream_to_path<F>(
        &self,
        url: &str,
        path: &Path,
        on_progress: &mut F,
    ) -> Result<u64, ExportError>
    where
        F: FnMut(f64) + Send,
    {
        let response = send_checked(self.client.get(url), url, false).await?;
        let total = response.content_length().filter(|len| *len > 0);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ExportError::filesystem(parent, e))?;
        }
        let file = File::create(path)
            .await
            .map_err(|e| ExportError::filesystem(path, e))?;

        let result = write_body(file, response, url, path, total, on_progress).await;
        if result.is_err() {
            debug!(path = %path.display(), "cleaning up partial file after error");
            let _ = tokio::fs::remove_file(path).await;
        }
        let written = result?;
        on_progress(1.0);
        Ok(written)
    }
}

#[allow(clippy::cast_precision_loss)]
async fn write_body<F>(
    file: File,
    response: Response,
    url: &str,
    path: &Path,
    total: Option<u64>,
    on_progress: &mut F,
) -> Result<u64, ExportError>
where
    F: FnMut(f64) + Send,
{
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ExportError::from_reqwest(url, e))?;
        for slice in chunk.chunks(DOWNLOAD_CHUNK_SIZE) {
            writer
                .write_all(slice)
                .await
                .map_err(|e| ExportError::filesystem(path, e))?;
            written += slice.len() as u64;
            if let Some(total) = total {
                on_progress((written as f64 / total as f64).min(1.0));
            }
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| ExportError::filesystem(path, e))?;
    Ok(written)
}

/// Sends a request and maps non-success statuses.
///
/// With `session` set, a 401 means the stored session is no longer accepted.
async fn send_checked(
    request: RequestBuilder,
    url: &str,
    session: bool,
) -> Result<Response, ExportError> {
    let response = request
        .send()
        .await
        .map_err(|e| ExportError::from_reqwest(url, e))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if session && status == StatusCode::UNAUTHORIZED {
        warn!(url, "session rejected by server");
        return Err(ExportError::CredentialsExpired);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    let body = response.text().await.unwrap_or_default();
    Err(ExportError::request_failed(
        url,
        status.as_u16(),
        truncate_chars(&body, MAX_ERROR_BODY_CHARS),
        retry_after,
    ))
}

/// Joins the `name=value` pairs of every Set-Cookie header into one Cookie value.
fn session_from_set_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('=') && !pair.ends_with('='))
        .collect();

    if pairs.is_empty() {
        None
    } else {
        Some(pairs.join("; "))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}
