//! Output file naming.
//!
//! The exporter writes `<workspace>/<title>.md`; the image rewriter later moves
//! that file to `<workspace>/<title>/<title>.md` next to its images. Both sides
//! go through [`resolve_document_paths`] so the layouts cannot drift apart.

use std::path::{Path, PathBuf};

const FORBIDDEN_CHARS: [char; 9] = ['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const UNTITLED: &str = "untitled";

/// Makes `title` safe to use as a single path component.
///
/// Forbidden characters become `_`, surrounding whitespace and dots are
/// trimmed, and an empty result becomes `untitled`.
///
/// # Example
///
/// ```
/// use exporter_core::sanitize_title;
///
/// assert_eq!(sanitize_title("a/b:c*d"), "a_b_c_d");
/// assert_eq!(sanitize_title(""), "untitled");
/// ```
#[must_use]
pub fn sanitize_title(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c.is_whitespace() || c == '.');
    if trimmed.is_empty() {
        UNTITLED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Where a document's Markdown can live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPaths {
    /// `<workspace>/<title>.md`, written by the exporter.
    pub primary: PathBuf,
    /// `<workspace>/<title>/<title>.md`, after image relocation.
    pub relocated: PathBuf,
    /// `<workspace>/<title>/`, holding downloaded images.
    pub asset_dir: PathBuf,
}

impl DocumentPaths {
    /// The first of the two layouts that exists on disk.
    #[must_use]
    pub fn existing(&self) -> Option<&Path> {
        [&self.primary, &self.relocated]
            .into_iter()
            .find(|path| path.is_file())
            .map(PathBuf::as_path)
    }
}

/// Resolves both layouts for a document titled `title` under `workspace_dir`.
#[must_use]
pub fn resolve_document_paths(workspace_dir: &Path, title: &str) -> DocumentPaths {
    let name = sanitize_title(title);
    let file_name = format!("{name}.md");
    let asset_dir = workspace_dir.join(&name);
    DocumentPaths {
        primary: workspace_dir.join(&file_name),
        relocated: asset_dir.join(&file_name),
        asset_dir,
    }
}

/// Resolves the layouts for an existing Markdown file from its location.
///
/// A file already sitting in its same-named directory resolves to itself as
/// `relocated`, so it is rewritten in place.
#[must_use]
pub fn paths_for_markdown_file(path: &Path) -> DocumentPaths {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    let already_relocated = parent
        .file_name()
        .is_some_and(|dir| dir.to_string_lossy() == stem);

    if already_relocated {
        DocumentPaths {
            primary: path.to_path_buf(),
            relocated: path.to_path_buf(),
            asset_dir: parent.to_path_buf(),
        }
    } else {
        let asset_dir = parent.join(&stem);
        DocumentPaths {
            primary: path.to_path_buf(),
            relocated: asset_dir.join(format!("{stem}.md")),
            asset_dir,
        }
    }
}
