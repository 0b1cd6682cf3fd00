//! Export orchestration.
//!
//! - [`ExportScheduler`] - the run loop from workspace enumeration to persisted files
//! - [`apply_selection`] - `All`/`Recent`/`Custom`/`Selected` document filters
//! - [`resolve_document_paths`] - the output layout shared with the image rewriter
//! - [`ExportObserver`] - progress hooks for a UI

mod filter;
mod paths;
mod scheduler;
mod summary;
mod workspaces;

pub use filter::apply_selection;
pub use paths::{DocumentPaths, paths_for_markdown_file, resolve_document_paths, sanitize_title};
pub use scheduler::{ExportScheduler, export_paths, strip_linebreaks};
pub use summary::{ExportObserver, ExportSummary, NoopObserver, SkipReason};
pub use workspaces::{books_from_listing, fetch_workspaces};
