//! Page strategies for locating the catalog embedded in a workspace page.
//!
//! Workspace pages are unversioned HTML that carries the catalog as JSON in one
//! of several shapes. Each payload pattern is tried in a fixed order; a pattern
//! succeeds only when its capture decodes to a non-empty JSON value *and* that
//! value holds a `toc` array. When no payload pattern succeeds, the sidebar
//! markup is scraped instead.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use serde_json::Value;
use tracing::debug;

use super::slug::RawTocEntry;

/// Where a document list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    /// `decodeURIComponent("...")` wrapped, URL-encoded JSON.
    EncodedPayload,
    /// `window.bookData = {...};`
    BookData,
    /// `JSON.parse(decodeURIComponent("..."))`
    ParsedEncodedPayload,
    /// `window.__INITIAL_STATE__ = {...};`
    InitialState,
    /// `var bookInfo = {...};`
    BookInfo,
    /// Sidebar catalog anchors.
    CatalogMarkup,
    /// The secondary TOC endpoint.
    TocEndpoint,
}

impl PageStrategy {
    /// Stable label for log output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EncodedPayload => "encoded-payload",
            Self::BookData => "book-data",
            Self::ParsedEncodedPayload => "parsed-encoded-payload",
            Self::InitialState => "initial-state",
            Self::BookInfo => "book-info",
            Self::CatalogMarkup => "catalog-markup",
            Self::TocEndpoint => "toc-endpoint",
        }
    }
}

/// Catalog entries recovered from a page, with the strategy that found them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocExtraction {
    /// Winning strategy.
    pub strategy: PageStrategy,
    /// Entries in catalog order.
    pub entries: Vec<RawTocEntry>,
}

struct PayloadPattern {
    strategy: PageStrategy,
    regex: Regex,
    url_encoded: bool,
}

#[allow(clippy::expect_used)]
static PAYLOAD_PATTERNS: LazyLock<Vec<PayloadPattern>> = LazyLock::new(|| {
    [
        (
            PageStrategy::EncodedPayload,
            r#"(?s)decodeURIComponent\("([^"]+)"\)"#,
            true,
        ),
        (
            PageStrategy::BookData,
            r"(?s)window\.bookData\s*=\s*(\{.*?\})\s*;",
            false,
        ),
        (
            PageStrategy::ParsedEncodedPayload,
            r#"(?s)JSON\.parse\(decodeURIComponent\("([^"]+)"\)\)"#,
            true,
        ),
        (
            PageStrategy::InitialState,
            r"(?s)window\.__INITIAL_STATE__\s*=\s*(\{.*?\});",
            false,
        ),
        (
            PageStrategy::BookInfo,
            r"(?s)var\s+bookInfo\s*=\s*(\{.*?\})\s*;",
            false,
        ),
    ]
    .into_iter()
    .map(|(strategy, pattern, url_encoded)| PayloadPattern {
        strategy,
        regex: Regex::new(pattern).expect("page payload regex is valid"),
        url_encoded,
    })
    .collect()
});

#[allow(clippy::expect_used)]
static CATALOG_ITEM_SELECTOR: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(".catalog-item, .sidebar-item, .doc-catalog-item")
        .expect("catalog item selector is valid")
});

#[allow(clippy::expect_used)]
static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a").expect("anchor selector is valid"));

#[allow(clippy::expect_used)]
static HREF_SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/([^/]+)$").expect("href slug regex is valid"));

/// Runs the page strategies in order and returns the first success.
#[must_use]
pub fn extract_from_page(page: &str) -> Option<TocExtraction> {
    for pattern in PAYLOAD_PATTERNS.iter() {
        let Some(payload) = locate_payload(pattern, page) else {
            continue;
        };
        match find_toc(&payload) {
            Some(toc) => {
                return Some(TocExtraction {
                    strategy: pattern.strategy,
                    entries: entries_from_values(toc),
                });
            }
            None => debug!(
                strategy = pattern.strategy.as_str(),
                "payload parsed but holds no toc"
            ),
        }
    }

    let entries = scrape_catalog(page);
    if entries.is_empty() {
        debug!(bytes = page.len(), "no catalog found in page");
        None
    } else {
        Some(TocExtraction {
            strategy: PageStrategy::CatalogMarkup,
            entries,
        })
    }
}

fn locate_payload(pattern: &PayloadPattern, page: &str) -> Option<Value> {
    let captured = pattern.regex.captures(page)?.get(1)?.as_str();
    let strategy = pattern.strategy.as_str();

    let json = if pattern.url_encoded {
        match urlencoding::decode(captured) {
            Ok(decoded) => decoded.into_owned(),
            Err(error) => {
                debug!(strategy, %error, "payload is not valid percent-encoded UTF-8");
                return None;
            }
        }
    } else {
        captured.to_string()
    };

    match serde_json::from_str::<Value>(&json) {
        Ok(value) if is_substantive(&value) => {
            debug!(strategy, bytes = json.len(), "payload located");
            Some(value)
        }
        Ok(_) => {
            debug!(strategy, "payload is empty");
            None
        }
        Err(error) => {
            debug!(strategy, %error, "payload is not valid JSON");
            None
        }
    }
}

fn is_substantive(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// Finds the catalog array under `book.toc`, `toc`, or `data.book.toc`, in that order.
#[must_use]
pub fn find_toc(payload: &Value) -> Option<&Vec<Value>> {
    [
        payload.get("book").and_then(|book| book.get("toc")),
        payload.get("toc"),
        payload
            .get("data")
            .and_then(|data| data.get("book"))
            .and_then(|book| book.get("toc")),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_array)
}

/// Decodes catalog values, dropping those that are not entry objects.
#[must_use]
pub fn entries_from_values(values: &[Value]) -> Vec<RawTocEntry> {
    values
        .iter()
        .filter(|value| value.is_object())
        .filter_map(|value| match serde_json::from_value(value.clone()) {
            Ok(entry) => Some(entry),
            Err(error) => {
                debug!(%error, "undecodable catalog entry");
                None
            }
        })
        .collect()
}

/// Scrapes sidebar catalog anchors into minimal entries.
#[must_use]
pub fn scrape_catalog(page: &str) -> Vec<RawTocEntry> {
    let document = Html::parse_document(page);
    document
        .select(&CATALOG_ITEM_SELECTOR)
        .filter_map(|item| {
            let link = item.select(&ANCHOR_SELECTOR).next()?;
            let href = link.value().attr("href").unwrap_or_default().to_string();
            let title = link.text().collect::<String>().trim().to_string();
            let slug = HREF_SLUG_PATTERN
                .captures(&href)
                .and_then(|captures| captures.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            Some(RawTocEntry {
                title,
                slug,
                doc_type: "doc".to_string(),
                url: href,
                ..RawTocEntry::default()
            })
        })
        .collect()
}
