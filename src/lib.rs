//! Yuque Exporter Core Library
//!
//! This library batch-exports knowledge bases from a Yuque workspace host into
//! local Markdown files, optionally pulling embedded images down next to each
//! exported document.
//!
//! # Architecture
//!
//! The library is organized into the following modules, leaves first:
//! - [`auth`] - Session credential persistence and the login exchange
//! - [`cache`] - File-backed TTL cache for workspace and document lists
//! - [`transport`] - HTTP client, retry policy, and request pacing
//! - [`extract`] - Ordered strategy chain recovering a document list from workspace pages
//! - [`export`] - Workspace enumeration, selection filters, and document persistence
//! - [`images`] - Markdown image scanning and the bounded download pool
//!
//! Configuration flows through an explicit [`ExportConfig`] handed to each
//! component constructor. Diagnostics are emitted through `tracing`; callers
//! install whatever subscriber they want.

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod export;
pub mod extract;
pub mod images;
pub mod model;
#[cfg(test)]
pub mod test_support;
pub mod transport;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use auth::{CommandCipher, CredentialStore, Credentials, PasswordCipher, UserProfile};
pub use cache::TtlCache;
pub use config::{ConfigError, ExportConfig, FileConfig, WorkspaceFailurePolicy};
pub use error::ExportError;
pub use export::{
    ExportObserver, ExportScheduler, ExportSummary, NoopObserver, apply_selection,
    resolve_document_paths, sanitize_title,
};
pub use extract::{ContentExtractor, PageStrategy, RawTocEntry, resolve_slug};
pub use images::{FileRewrite, ImageRewriter, scan_markdown};
pub use model::{
    Document, DownloadRange, DownloadRequest, ImageTask, OwnerType, RenameMode, Workspace,
};
pub use transport::{ApiClient, FailureType, RateLimiter, RetryDecision, RetryPolicy};
