//! Local copies of images embedded in exported Markdown.
//!
//! Processing a file is two passes: [`scan_markdown`] finds image URLs and
//! rewrites them to local names, then [`ImageRewriter`] downloads them with a
//! bounded worker pool and moves the Markdown into the per-document directory
//! holding the images.

mod rewriter;
mod scan;

pub use rewriter::{FileRewrite, ImageRewriter, markdown_files_under};
pub use scan::{ScanResult, scan_markdown};
