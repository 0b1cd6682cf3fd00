//! Error types for exporter operations.
//!
//! Every component reports failures through [`ExportError`]. Variants carry
//! the URL or path involved so a log line is actionable on its own.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while exporting documents.
#[derive(Debug, Error)]
pub enum ExportError {
    /// No usable session token. Aborts the run; the user must re-authenticate.
    #[error(
        "[AUTH] session credentials are missing or expired\n  Suggestion: run `yuque-exporter auth token` or `yuque-exporter auth login` to re-authenticate."
    )]
    CredentialsExpired,

    /// Connection-level failure (DNS, refused connection, TLS, broken body stream).
    #[error("network error requesting {url}: {source}")]
    Transport {
        /// The URL being requested.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded the configured timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// Server answered with a non-success status.
    #[error("HTTP {status} requesting {url}")]
    RequestFailed {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// Response body was not the JSON shape we expected.
    #[error("invalid response from {url}: {source}")]
    InvalidResponse {
        /// The URL whose response could not be decoded.
        url: String,
        /// The decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// No extraction strategy produced a document list.
    #[error("no document list could be extracted for {namespace}")]
    ExtractionFailed {
        /// Namespace of the workspace.
        namespace: String,
    },

    /// Every export URL returned an empty body for a document.
    #[error("no Markdown content available for {namespace}/{identifier}")]
    EmptyContent {
        /// Namespace of the workspace.
        namespace: String,
        /// Document identifier used to build export URLs.
        identifier: String,
    },

    /// Namespace is not of the form `owner/slug`.
    #[error("invalid workspace namespace `{namespace}`: expected `owner/slug`")]
    InvalidNamespace {
        /// The offending namespace.
        namespace: String,
    },

    /// Login endpoint accepted the request but returned no user.
    #[error("login rejected for account {login}")]
    LoginRejected {
        /// Account name used for login.
        login: String,
    },

    /// Password cipher collaborator failed.
    #[error("password cipher failed: {reason}")]
    Cipher {
        /// Description of the failure.
        reason: String,
    },

    /// File system error while reading or writing output, cache, or credentials.
    #[error("IO error at {path}: {source}")]
    Filesystem {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to serialize a record destined for disk.
    #[error("failed to encode {path}: {source}")]
    Encode {
        /// Target file.
        path: PathBuf,
        /// The serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// Run was interrupted by the caller.
    #[error("export interrupted")]
    Cancelled,
}

impl ExportError {
    /// Maps a reqwest send/read error, splitting out timeouts.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::Timeout { url: url.into() }
        } else {
            Self::Transport {
                url: url.into(),
                source,
            }
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates a non-success status error.
    pub fn request_failed(
        url: impl Into<String>,
        status: u16,
        body: impl Into<String>,
        retry_after: Option<String>,
    ) -> Self {
        Self::RequestFailed {
            url: url.into(),
            status,
            body: body.into(),
            retry_after,
        }
    }

    /// Creates a response decoding error.
    pub fn invalid_response(url: impl Into<String>, source: serde_json::Error) -> Self {
        Self::InvalidResponse {
            url: url.into(),
            source,
        }
    }

    /// Creates an extraction failure for a workspace.
    pub fn extraction_failed(namespace: impl Into<String>) -> Self {
        Self::ExtractionFailed {
            namespace: namespace.into(),
        }
    }

    /// Creates an empty-content error for a document.
    pub fn empty_content(namespace: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self::EmptyContent {
            namespace: namespace.into(),
            identifier: identifier.into(),
        }
    }

    /// Creates an invalid namespace error.
    pub fn invalid_namespace(namespace: impl Into<String>) -> Self {
        Self::InvalidNamespace {
            namespace: namespace.into(),
        }
    }

    /// Creates a filesystem error.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Creates an encoding error.
    pub fn encode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Encode {
            path: path.into(),
            source,
        }
    }

    /// True for the one error class that aborts a whole run.
    #[must_use]
    pub fn is_credentials_expired(&self) -> bool {
        matches!(self, Self::CredentialsExpired)
    }

    /// Whether a retry might succeed: connection failures, timeouts, 408, 429 and 5xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } => true,
            Self::RequestFailed { status, .. } => {
                matches!(status, 408 | 429) || (500..600).contains(status)
            }
            _ => false,
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs the
// URL or path, which the source errors do not carry.
