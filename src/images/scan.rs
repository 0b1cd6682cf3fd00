//! Scan pass: find image URLs in Markdown and rewrite them to local names.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use crate::model::{ImageTask, RenameMode};

#[allow(clippy::expect_used)]
static PNG_FRAGMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"png#.*").expect("png fragment regex is valid"));

#[allow(clippy::expect_used)]
static IMAGE_URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)https?://[^\s<>"\)\]]+\.(png|jpeg|jpg)"#).expect("image url regex is valid")
});

/// Output of [`scan_markdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    /// Markdown with image URLs replaced by local names.
    pub rewritten: String,
    /// One download per distinct image URL, in order of first appearance.
    pub tasks: Vec<ImageTask>,
}

/// Scans `markdown` line by line for image URLs.
///
/// Only the first image URL on a line is taken. A `png#...` fragment is cut
/// back to `png)` before matching, which drops the rest of that line. Each
/// new image URL gets the next zero-based index and is replaced, everywhere
/// on its line, by `<url_prefix><name>` where the name follows `rename_mode`.
/// A URL seen on an earlier line reuses its first name without a second
/// download. Distinct URLs that would land on the same file name, which can
/// happen in `Preserve` mode, get `-1`, `-2`, ... appended to the later names.
///
/// # Example
///
/// ```
/// use std::path::Path;
/// use exporter_core::{RenameMode, scan_markdown};
///
/// let scan = scan_markdown(
///     "![a](https://cdn.example.com/x/a.png)\n",
///     Path::new("out/Doc"),
///     RenameMode::Sequential,
///     "image-",
///     "",
/// );
/// assert_eq!(scan.rewritten, "![a](image-0.png)\n");
/// assert_eq!(scan.tasks.len(), 1);
/// ```
#[must_use]
pub fn scan_markdown(
    markdown: &str,
    target_dir: &Path,
    rename_mode: RenameMode,
    file_prefix: &str,
    url_prefix: &str,
) -> ScanResult {
    let mut rewritten = String::with_capacity(markdown.len());
    let mut tasks: Vec<ImageTask> = Vec::new();
    let mut names_by_url: HashMap<String, String> = HashMap::new();
    let mut used_names: HashSet<String> = HashSet::new();

    for line in markdown.split_inclusive('\n') {
        let line = PNG_FRAGMENT_PATTERN.replace_all(line, "png)");
        let Some(captures) = IMAGE_URL_PATTERN.captures(&line) else {
            rewritten.push_str(&line);
            continue;
        };

        let url = captures
            .get(0)
            .map_or("", |m| m.as_str())
            .trim_end_matches(['.', ',', ';', ':', '!', '?']);
        if let Some(name) = names_by_url.get(url) {
            rewritten.push_str(&line.replace(url, &format!("{url_prefix}{name}")));
            continue;
        }

        let suffix = captures
            .get(1)
            .map(|m| format!(".{}", m.as_str().to_ascii_lowercase()))
            .unwrap_or_default();

        let mut task = ImageTask {
            url: url.to_string(),
            target_dir: target_dir.to_path_buf(),
            rename_mode,
            index: tasks.len(),
            suffix,
            file_prefix: file_prefix.to_string(),
            name_clash: 0,
        };
        while used_names.contains(&task.file_name()) {
            task.name_clash += 1;
        }
        let name = task.file_name();
        used_names.insert(name.clone());
        rewritten.push_str(&line.replace(url, &format!("{url_prefix}{name}")));
        names_by_url.insert(task.url.clone(), name);
        tasks.push(task);
    }

    ScanResult { rewritten, tasks }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    const DOC: &str = "# Title\n\
        ![one](https://cdn.nlark.com/yuque/0/2024/png/1/one.png)\n\
        text only\n\
        ![two](https://cdn.nlark.com/yuque/0/2024/png/1/two.PNG?x=1)\n";

    #[test]
    fn test_sequential_names_in_order_of_appearance() {
        let scan = scan_markdown(DOC, Path::new("out/Doc"), RenameMode::Sequential, "image-", "");
        assert_eq!(scan.tasks.len(), 2);
        assert_eq!(scan.tasks[0].file_name(), "image-0.png");
        assert_eq!(scan.tasks[1].file_name(), "image-1.png");
        assert_eq!(scan.tasks[1].url, "https://cdn.nlark.com/yuque/0/2024/png/1/two.PNG");
        assert_eq!(scan.tasks[0].target_path(), PathBuf::from("out/Doc/image-0.png"));
        assert!(scan.rewritten.contains("![one](image-0.png)"));
        assert!(scan.rewritten.contains("![two](image-1.png?x=1)"));
        assert!(scan.rewritten.contains("text only\n"));
    }

    #[test]
    fn test_preserve_mode_keeps_last_segment_with_prefix() {
        let scan = scan_markdown(DOC, Path::new("d"), RenameMode::Preserve, "image-", "./assets/");
        assert!(scan.rewritten.contains("![one](./assets/one.png)"));
        assert_eq!(scan.tasks[0].file_name(), "one.png");
    }

    #[test]
    fn test_png_fragment_is_collapsed() {
        let line = "![x](https://cdn.nlark.com/a/b.png#averageHue=%23f00&width=10)\n";
        let scan = scan_markdown(line, Path::new("d"), RenameMode::Sequential, "img", "");
        assert_eq!(scan.rewritten, "![x](img0.png)\n");
    }

    #[test]
    fn test_only_first_url_per_line_and_jpeg_suffix() {
        let line = "https://a.com/1.JPEG and https://a.com/2.png";
        let scan = scan_markdown(line, Path::new("d"), RenameMode::Sequential, "i-", "");
        assert_eq!(scan.tasks.len(), 1);
        assert_eq!(scan.tasks[0].suffix, ".jpeg");
        assert_eq!(scan.rewritten, "i-0.jpeg and https://a.com/2.png");
    }

    #[test]
    fn test_repeated_url_reuses_first_name_and_downloads_once() {
        let text = "![a](https://a.com/x/pic.png)\nagain ![b](https://a.com/x/pic.png)\n";
        for mode in [RenameMode::Sequential, RenameMode::Preserve] {
            let scan = scan_markdown(text, Path::new("d"), mode, "image-", "");
            assert_eq!(scan.tasks.len(), 1);
            let name = scan.tasks[0].file_name();
            assert_eq!(
                scan.rewritten,
                format!("![a]({name})\nagain ![b]({name})\n")
            );
        }
    }

    #[test]
    fn test_preserve_mode_same_name_from_different_urls_gets_suffix() {
        let text = "![a](https://a.com/a/image.png)\n\
            ![b](https://a.com/b/image.png)\n\
            ![c](https://a.com/c/image.png)\n";
        let scan = scan_markdown(text, Path::new("d"), RenameMode::Preserve, "image-", "");
        let names: Vec<String> = scan.tasks.iter().map(ImageTask::file_name).collect();
        assert_eq!(names, ["image.png", "image-1.png", "image-2.png"]);
        assert_eq!(
            scan.rewritten,
            "![a](image.png)\n![b](image-1.png)\n![c](image-2.png)\n"
        );
    }

    #[test]
    fn test_preserve_suffix_skips_names_already_taken() {
        let text = "![a](https://a.com/x/image-1.png)\n\
            ![b](https://a.com/a/image.png)\n\
            ![c](https://a.com/b/image.png)\n";
        let scan = scan_markdown(text, Path::new("d"), RenameMode::Preserve, "image-", "");
        let names: Vec<String> = scan.tasks.iter().map(ImageTask::file_name).collect();
        assert_eq!(names, ["image-1.png", "image.png", "image-2.png"]);
    }

    #[test]
    fn test_no_images_leaves_text_untouched() {
        let text = "plain\nlines without http links\n";
        let scan = scan_markdown(text, Path::new("d"), RenameMode::Sequential, "image-", "");
        assert_eq!(scan.rewritten, text);
        assert!(scan.tasks.is_empty());
    }
}
