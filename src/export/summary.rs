//! Run summary and progress reporting hooks.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::ExportError;
use crate::model::{Document, Workspace};

/// Why a document was not fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Output already exists at the direct or relocated path.
    AlreadyExists,
    /// Catalog node is a group header or link, not a document.
    NotADocument,
    /// Entry has neither slug nor URL to export from.
    NoIdentifier,
}

impl SkipReason {
    /// Stable label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyExists => "already exists",
            Self::NotADocument => "not a document",
            Self::NoIdentifier => "no identifier",
        }
    }
}

/// Receives progress events from a running export.
///
/// Every method has an empty default so implementors pick what they need.
pub trait ExportObserver: Send + Sync {
    /// A workspace is about to be exported with `documents` selected entries.
    fn workspace_started(&self, _workspace: &Workspace, _documents: usize) {}

    /// A document fetch is starting.
    fn document_started(&self, _document: &Document) {}

    /// A document was written to `path`.
    fn document_finished(&self, _document: &Document, _path: &Path) {}

    /// A document was skipped.
    fn document_skipped(&self, _document: &Document, _reason: SkipReason) {}

    /// A document failed; the run continues.
    fn document_failed(&self, _document: &Document, _error: &ExportError) {}

    /// Image downloads for one Markdown file advanced.
    fn image_progress(&self, _downloaded: usize, _total: usize) {}
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ExportObserver for NoopObserver {}

/// Outcome of an export run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportSummary {
    /// Workspaces whose document loop completed.
    pub workspaces_processed: usize,
    /// Workspaces skipped for lacking a usable namespace, a readable catalog, or documents.
    pub workspaces_skipped: usize,
    /// Names of workspaces that failed.
    pub workspaces_failed: Vec<String>,
    /// Requested names that matched no workspace, with the closest known name.
    pub missing_workspaces: Vec<(String, Option<String>)>,
    /// Documents written this run.
    pub documents_written: usize,
    /// Documents skipped.
    pub documents_skipped: usize,
    /// Documents that failed.
    pub documents_failed: usize,
    /// Markdown files passed through the image rewriter.
    pub files_rewritten: usize,
    /// Images downloaded.
    pub images_downloaded: usize,
    /// Images that could not be downloaded.
    pub images_failed: usize,
    /// Paths written this run, in order.
    pub written_files: Vec<PathBuf>,
    /// The run stopped early on request.
    pub interrupted: bool,
    /// The run stopped after a workspace failure under the abort policy.
    pub aborted: bool,
}

impl ExportSummary {
    /// True when nothing failed and the run was not cut short.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.workspaces_failed.is_empty()
            && self.missing_workspaces.is_empty()
            && self.documents_failed == 0
            && self.images_failed == 0
            && !self.interrupted
            && !self.aborted
    }
}

impl fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Workspaces: {} exported, {} skipped, {} failed",
            self.workspaces_processed,
            self.workspaces_skipped,
            self.workspaces_failed.len()
        )?;
        write!(
            f,
            "Documents: {} written, {} skipped, {} failed",
            self.documents_written, self.documents_skipped, self.documents_failed
        )?;
        if self.files_rewritten > 0 || self.images_failed > 0 {
            write!(
                f,
                "\nImages: {} downloaded, {} failed across {} files",
                self.images_downloaded, self.images_failed, self.files_rewritten
            )?;
        }
        for (name, suggestion) in &self.missing_workspaces {
            match suggestion {
                Some(suggestion) => {
                    write!(f, "\nUnknown workspace `{name}` (did you mean `{suggestion}`?)")?;
                }
                None => write!(f, "\nUnknown workspace `{name}`")?,
            }
        }
        if self.aborted {
            write!(f, "\nRun aborted after a workspace failure")?;
        }
        if self.interrupted {
            write!(f, "\nRun interrupted")?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_summary_is_success() {
        assert!(ExportSummary::default().is_success());
    }

    #[test]
    fn test_failures_and_interrupts_are_not_success() {
        let failed = ExportSummary {
            documents_failed: 1,
            ..ExportSummary::default()
        };
        assert!(!failed.is_success());

        let interrupted = ExportSummary {
            interrupted: true,
            ..ExportSummary::default()
        };
        assert!(!interrupted.is_success());
    }

    #[test]
    fn test_display_lists_missing_workspaces() {
        let summary = ExportSummary {
            documents_written: 3,
            missing_workspaces: vec![("Note".to_string(), Some("Notes".to_string()))],
            ..ExportSummary::default()
        };
        let text = summary.to_string();
        assert!(text.contains("3 written"));
        assert!(text.contains("did you mean `Notes`"));
        assert!(!text.contains("Images"));
    }
}
