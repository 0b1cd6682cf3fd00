//! Selection policy applied to a workspace's document list.

use std::cmp::Reverse;

use tracing::{debug, warn};

use crate::model::{Document, DownloadRange, DownloadRequest};

/// Narrows `docs` to the documents `request` selects for `workspace_name`.
///
/// - `All` keeps everything.
/// - `Recent` keeps the `limit` newest by `updated_at`, newest first. When any
///   document lacks a timestamp the catalog order is kept instead.
/// - `Custom` keeps the first `limit` in catalog order.
/// - `Selected` keeps documents whose id is listed for the workspace; a
///   workspace with no listed ids selects nothing.
///
/// A `limit` of 0 leaves `Recent` and `Custom` unbounded.
#[must_use]
pub fn apply_selection(
    mut docs: Vec<Document>,
    request: &DownloadRequest,
    workspace_name: &str,
) -> Vec<Document> {
    let before = docs.len();
    let limit = request.limit;

    match request.range {
        DownloadRange::All => {}
        DownloadRange::Recent if limit > 0 => {
            let all_dated = docs
                .iter()
                .all(|doc| doc.updated_at.as_deref().is_some_and(|ts| !ts.is_empty()));
            if all_dated {
                docs.sort_by_key(|doc| Reverse(doc.updated_at.clone()));
            } else {
                debug!(workspace = workspace_name, "missing timestamps; keeping catalog order");
            }
            docs.truncate(limit);
        }
        DownloadRange::Custom if limit > 0 => docs.truncate(limit),
        DownloadRange::Recent | DownloadRange::Custom => {}
        DownloadRange::Selected => match request.selected_docs.get(workspace_name) {
            Some(ids) => docs.retain(|doc| ids.contains(&doc.id)),
            None => {
                warn!(workspace = workspace_name, "no documents selected for workspace");
                docs.clear();
            }
        },
    }

    debug!(
        workspace = workspace_name,
        range = %request.range,
        before,
        after = docs.len(),
        "selection applied"
    );
    docs
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn docs() -> Vec<Document> {
        [
            ("1", "2024-01-03"),
            ("2", "2024-01-05"),
            ("3", "2024-01-01"),
            ("4", "2024-01-04"),
            ("5", "2024-01-02"),
        ]
        .into_iter()
        .map(|(id, updated)| Document {
            id: id.to_string(),
            slug: format!("doc-{id}"),
            title: format!("Doc {id}"),
            updated_at: Some(format!("{updated}T00:00:00.000Z")),
            ..Document::default()
        })
        .collect()
    }

    fn ids(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d.id.as_str()).collect()
    }

    #[test]
    fn test_all_keeps_everything() {
        let request = DownloadRequest::new(["Notes"]);
        assert_eq!(apply_selection(docs(), &request, "Notes").len(), 5);
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let request = DownloadRequest::new(["Notes"]).with_range(DownloadRange::Recent, 2);
        assert_eq!(ids(&apply_selection(docs(), &request, "Notes")), vec!["2", "4"]);
    }

    #[test]
    fn test_custom_keeps_catalog_order() {
        let request = DownloadRequest::new(["Notes"]).with_range(DownloadRange::Custom, 2);
        let selected = apply_selection(docs(), &request, "Notes");
        assert_eq!(ids(&selected), vec!["1", "2"]);

        let recent = DownloadRequest::new(["Notes"]).with_range(DownloadRange::Recent, 2);
        assert_ne!(ids(&selected), ids(&apply_selection(docs(), &recent, "Notes")));
    }

    #[test]
    fn test_zero_limit_is_unbounded() {
        let request = DownloadRequest::new(["Notes"]).with_range(DownloadRange::Recent, 0);
        assert_eq!(ids(&apply_selection(docs(), &request, "Notes")), vec!["1", "2", "3", "4", "5"]);
    }

    #[test]
    fn test_recent_without_timestamps_keeps_catalog_order() {
        let mut input = docs();
        input[0].updated_at = None;
        let request = DownloadRequest::new(["Notes"]).with_range(DownloadRange::Recent, 3);
        assert_eq!(ids(&apply_selection(input, &request, "Notes")), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_selected_filters_by_id() {
        let request = DownloadRequest::new(["Notes"])
            .with_range(DownloadRange::Selected, 0)
            .with_selected("Notes", ["4", "1", "99"]);
        assert_eq!(ids(&apply_selection(docs(), &request, "Notes")), vec!["1", "4"]);
        assert!(apply_selection(docs(), &request, "Other").is_empty());
    }
}
