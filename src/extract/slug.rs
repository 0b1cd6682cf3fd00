//! Raw catalog entries and slug resolution.

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::model::{Document, deserialize_id, id_from_value};

/// A catalog entry as it appears in a page payload or the TOC endpoint.
///
/// Every field is optional on the wire; nulls and numbers decode to strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RawTocEntry {
    /// Remote identifier.
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    /// Explicit slug, rarely present in page payloads.
    #[serde(deserialize_with = "lenient_string")]
    pub slug: String,
    /// Catalog title.
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    /// Catalog URL; usually the bare document slug.
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    /// Node UUID.
    #[serde(deserialize_with = "lenient_string")]
    pub uuid: String,
    /// Document UUID, distinct from the node UUID when present.
    #[serde(deserialize_with = "lenient_string")]
    pub doc_uuid: String,
    /// Parent node UUID.
    #[serde(deserialize_with = "lenient_string")]
    pub parent_uuid: String,
    /// Node type; missing means a plain document.
    #[serde(rename = "type", deserialize_with = "lenient_string")]
    pub doc_type: String,
    /// Last update timestamp.
    #[serde(alias = "updatedAt", deserialize_with = "lenient_optional_string")]
    pub updated_at: Option<String>,
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(id_from_value(&Value::deserialize(deserializer)?))
}

fn lenient_optional_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = id_from_value(&Value::deserialize(deserializer)?);
    Ok((!value.is_empty()).then_some(value))
}

impl RawTocEntry {
    /// Normalizes the entry, resolving its slug.
    ///
    /// Returns `None`, with a log line, when no slug can be resolved.
    #[must_use]
    pub fn into_document(self) -> Option<Document> {
        let Some(slug) = resolve_slug(&self) else {
            info!(title = %self.title, "skipping catalog entry without a resolvable slug");
            return None;
        };
        let doc_type = if self.doc_type.is_empty() {
            "doc".to_string()
        } else {
            self.doc_type
        };
        Some(Document {
            id: self.id,
            slug,
            title: self.title,
            url: self.url,
            uuid: self.uuid,
            parent_uuid: self.parent_uuid,
            doc_type,
            updated_at: self.updated_at,
        })
    }
}

/// Resolves a document slug.
///
/// Priority: explicit `slug`, trailing segment of `url`, `doc_uuid`/`uuid`,
/// then the first 8 hex characters of the SHA-256 of the title. The hash is
/// collision-tolerant, not collision-free.
///
/// # Example
///
/// ```
/// use exporter_core::{RawTocEntry, resolve_slug};
///
/// let entry = RawTocEntry {
///     slug: "explicit".into(),
///     url: "alice/notes/derived".into(),
///     ..RawTocEntry::default()
/// };
/// assert_eq!(resolve_slug(&entry).as_deref(), Some("explicit"));
/// ```
#[must_use]
pub fn resolve_slug(entry: &RawTocEntry) -> Option<String> {
    let explicit = entry.slug.trim();
    if !explicit.is_empty() {
        return Some(explicit.to_string());
    }

    if let Some(segment) = trailing_segment(&entry.url) {
        debug!(slug = segment, "slug from url");
        return Some(segment.to_string());
    }

    let uuid = [entry.doc_uuid.trim(), entry.uuid.trim()]
        .into_iter()
        .find(|candidate| !candidate.is_empty());
    if let Some(uuid) = uuid {
        debug!(slug = uuid, "slug from uuid");
        return Some(uuid.to_string());
    }

    let title = entry.title.trim();
    if title.is_empty() {
        return None;
    }
    let digest = Sha256::digest(title.as_bytes());
    let slug: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
    debug!(slug = %slug, title, "slug from title hash");
    Some(slug)
}

fn trailing_segment(url: &str) -> Option<&str> {
    let path = url.trim().split(['?', '#']).next()?;
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    (!segment.is_empty()).then_some(segment)
}
