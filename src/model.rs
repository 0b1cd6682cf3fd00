//! Data model shared by the extractor, scheduler, and image rewriter.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// How the current user relates to a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerType {
    /// Personal knowledge base.
    #[default]
    Owner,
    /// Knowledge base owned by a team.
    Team,
    /// Knowledge base shared with the user.
    Collab,
}

impl OwnerType {
    /// Stable label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Team => "team",
            Self::Collab => "collab",
        }
    }
}

/// A knowledge base, addressed by its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Workspace {
    /// Remote identifier.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Display name; also the selection key in a [`DownloadRequest`].
    pub name: String,
    /// `owner/slug` address. Empty means the workspace cannot be exported.
    pub namespace: String,
    /// Relationship to the current user.
    pub owner_type: OwnerType,
    /// Number of documents reported by the listing endpoint.
    pub document_count: u64,
    /// Last update timestamp as reported by the host.
    pub updated_at: Option<String>,
}

impl Workspace {
    /// Returns true if the workspace has an address we can export from.
    #[must_use]
    pub fn is_downloadable(&self) -> bool {
        split_namespace(&self.namespace).is_some()
    }
}

/// Splits an `owner/slug` namespace into its two parts.
///
/// Returns `None` unless there are exactly two non-empty parts.
///
/// # Example
///
/// ```
/// use exporter_core::model::split_namespace;
///
/// assert_eq!(split_namespace("alice/notes"), Some(("alice", "notes")));
/// assert_eq!(split_namespace("alice"), None);
/// assert_eq!(split_namespace("a/b/c"), None);
/// ```
#[must_use]
pub fn split_namespace(namespace: &str) -> Option<(&str, &str)> {
    let (owner, slug) = namespace.trim().split_once('/')?;
    if owner.is_empty() || slug.is_empty() || slug.contains('/') {
        return None;
    }
    Some((owner, slug))
}

/// A single document inside a workspace.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Document {
    /// Remote identifier; the key used by [`DownloadRange::Selected`].
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Resolved slug, unique within the workspace.
    pub slug: String,
    /// Title as shown in the catalog.
    pub title: String,
    /// Raw catalog URL, often a bare slug.
    pub url: String,
    /// Document UUID.
    pub uuid: String,
    /// UUID of the parent catalog node.
    pub parent_uuid: String,
    /// Catalog node type (`DOC`, `TITLE`, `LINK`, ...).
    #[serde(rename = "type")]
    pub doc_type: String,
    /// Last update timestamp, when the catalog provides one.
    pub updated_at: Option<String>,
}

impl Document {
    /// Identifier used to build export URLs: the catalog URL, else the slug.
    #[must_use]
    pub fn export_identifier(&self) -> &str {
        if self.url.trim().is_empty() {
            &self.slug
        } else {
            &self.url
        }
    }

    /// Catalog nodes without a type, or typed `DOC`/`document` in any case, are exportable.
    /// Group headers and external links are not.
    #[must_use]
    pub fn is_document_type(&self) -> bool {
        let kind = self.doc_type.trim();
        kind.is_empty()
            || kind.eq_ignore_ascii_case("doc")
            || kind.eq_ignore_ascii_case("document")
    }
}

/// Which documents of a selected workspace get exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownloadRange {
    /// Every document.
    #[default]
    All,
    /// The `limit` most recently updated documents, newest first.
    Recent,
    /// The first `limit` documents in catalog order.
    Custom,
    /// Only documents listed in `selected_docs` for the workspace.
    Selected,
}

impl DownloadRange {
    /// Stable label for display output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Recent => "recent",
            Self::Custom => "custom",
            Self::Selected => "selected",
        }
    }
}

impl fmt::Display for DownloadRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DownloadRange {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Self::All),
            "recent" => Ok(Self::Recent),
            "custom" => Ok(Self::Custom),
            "selected" => Ok(Self::Selected),
            other => Err(format!(
                "unknown range `{other}`; expected one of: all, recent, custom, selected"
            )),
        }
    }
}

/// Selection and output policy for one export run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    /// Workspace names to export.
    pub workspace_names: BTreeSet<String>,
    /// Skip documents whose output file already exists.
    pub skip_existing: bool,
    /// Keep `<br>` tags in exported Markdown.
    pub preserve_linebreaks: bool,
    /// Selection policy.
    pub range: DownloadRange,
    /// Upper bound for `Recent`/`Custom`; 0 means unbounded.
    pub limit: usize,
    /// Workspace name to selected document ids, for `Selected`.
    pub selected_docs: HashMap<String, HashSet<String>>,
}

impl DownloadRequest {
    /// Creates a request exporting every document of the named workspaces.
    #[must_use]
    pub fn new<I, S>(workspace_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            workspace_names: workspace_names.into_iter().map(Into::into).collect(),
            skip_existing: true,
            preserve_linebreaks: true,
            range: DownloadRange::All,
            limit: 0,
            selected_docs: HashMap::new(),
        }
    }

    /// Sets the selection range and limit.
    #[must_use]
    pub fn with_range(mut self, range: DownloadRange, limit: usize) -> Self {
        self.range = range;
        self.limit = limit;
        self
    }

    /// Sets the skip-existing flag.
    #[must_use]
    pub fn with_skip_existing(mut self, skip_existing: bool) -> Self {
        self.skip_existing = skip_existing;
        self
    }

    /// Sets the linebreak preservation flag.
    #[must_use]
    pub fn with_preserve_linebreaks(mut self, preserve: bool) -> Self {
        self.preserve_linebreaks = preserve;
        self
    }

    /// Adds selected document ids for a workspace.
    #[must_use]
    pub fn with_selected<I, S>(mut self, workspace: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_docs
            .entry(workspace.into())
            .or_default()
            .extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Naming policy for downloaded images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenameMode {
    /// `<prefix><index><suffix>`, e.g. `image-0.png`.
    #[default]
    Sequential,
    /// Final path segment of the source URL.
    Preserve,
}

impl FromStr for RenameMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sequential" | "asc" => Ok(Self::Sequential),
            "preserve" | "raw" => Ok(Self::Preserve),
            other => Err(format!(
                "unknown rename mode `{other}`; expected `sequential` or `preserve`"
            )),
        }
    }
}

/// One image to download for a Markdown file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageTask {
    /// Source URL.
    pub url: String,
    /// Directory the image is written into.
    pub target_dir: PathBuf,
    /// Naming policy.
    pub rename_mode: RenameMode,
    /// Zero-based order of first appearance in the file.
    pub index: usize,
    /// File extension including the dot.
    pub suffix: String,
    /// Prefix for sequential names.
    pub file_prefix: String,
    /// Earlier images in the same file whose preserved name is identical.
    /// A non-zero count becomes a `-<count>` suffix on the file stem.
    pub name_clash: usize,
}

impl ImageTask {
    /// File name the image is stored under.
    #[must_use]
    pub fn file_name(&self) -> String {
        match self.rename_mode {
            RenameMode::Sequential => format!("{}{}{}", self.file_prefix, self.index, self.suffix),
            RenameMode::Preserve => {
                let name = last_path_segment(&self.url);
                if self.name_clash == 0 {
                    return name.to_string();
                }
                match name.rsplit_once('.') {
                    Some((stem, ext)) if !stem.is_empty() => {
                        format!("{stem}-{}.{ext}", self.name_clash)
                    }
                    _ => format!("{name}-{}", self.name_clash),
                }
            }
        }
    }

    /// Full output path of the image.
    #[must_use]
    pub fn target_path(&self) -> PathBuf {
        self.target_dir.join(self.file_name())
    }
}

/// Final `/`-separated segment of a URL, ignoring query and fragment.
#[must_use]
pub(crate) fn last_path_segment(url: &str) -> &str {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(without_query)
}

/// Accepts ids as JSON strings or numbers; null becomes empty.
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_from_value(&Value::deserialize(deserializer)?))
}

/// Renders an id-like JSON value as a string.
#[must_use]
pub(crate) fn id_from_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
