//! Workspace enumeration across the personal, team, and collaboration listings.

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::constants::{COLLAB_WORKSPACES_PATH, PERSONAL_WORKSPACES_PATH, TEAM_WORKSPACES_PATH};
use crate::error::ExportError;
use crate::model::{OwnerType, Workspace, id_from_value};
use crate::transport::ApiClient;

/// Fetches and merges the three workspace listings.
///
/// The personal listing is required; the team and collaboration listings are
/// best effort and contribute nothing when they fail.
///
/// # Errors
///
/// [`ExportError::CredentialsExpired`] from any listing, or whatever the
/// personal listing fails with.
pub async fn fetch_workspaces(client: &ApiClient) -> Result<Vec<Workspace>, ExportError> {
    let personal: Value = client.get_data(PERSONAL_WORKSPACES_PATH).await?;
    let mut workspaces = books_from_listing(&personal, OwnerType::Owner);

    for (path, owner_type) in [
        (TEAM_WORKSPACES_PATH, OwnerType::Team),
        (COLLAB_WORKSPACES_PATH, OwnerType::Collab),
    ] {
        match client.get_data::<Value>(path).await {
            Ok(data) => workspaces.extend(books_from_listing(&data, owner_type)),
            Err(ExportError::CredentialsExpired) => return Err(ExportError::CredentialsExpired),
            Err(error) => {
                warn!(listing = owner_type.as_str(), %error, "workspace listing unavailable");
            }
        }
    }

    info!(count = workspaces.len(), "workspaces enumerated");
    Ok(workspaces)
}

/// Flattens a listing that is either grouped (`[{books: [...]}]`) or flat.
#[must_use]
pub fn books_from_listing(data: &Value, owner_type: OwnerType) -> Vec<Workspace> {
    let Some(items) = data.as_array() else {
        debug!(listing = owner_type.as_str(), "listing is not an array");
        return Vec::new();
    };

    items
        .iter()
        .flat_map(|item| match item.get("books").and_then(Value::as_array) {
            Some(books) => books.iter().collect::<Vec<_>>(),
            None => vec![item],
        })
        .filter(|book| book.is_object())
        .map(|book| workspace_from_book(book, owner_type))
        .collect()
}

fn workspace_from_book(book: &Value, owner_type: OwnerType) -> Workspace {
    let field = |key: &str| book.get(key).map(id_from_value).unwrap_or_default();

    let mut namespace = field("namespace");
    if namespace.trim().is_empty() {
        let login = book
            .get("user")
            .and_then(|user| user.get("login"))
            .map(id_from_value)
            .unwrap_or_default();
        let slug = field("slug");
        if !login.is_empty() && !slug.is_empty() {
            namespace = format!("{login}/{slug}");
        }
    }

    let updated_at = field("updated_at");
    Workspace {
        id: field("id"),
        name: field("name"),
        namespace,
        owner_type,
        document_count: book.get("items_count").and_then(Value::as_u64).unwrap_or(0),
        updated_at: (!updated_at.is_empty()).then_some(updated_at),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_grouped_listing_is_flattened() {
        let data = json!([
            {"name": "Stack A", "books": [
                {"id": 1, "name": "Notes", "namespace": "alice/notes", "items_count": 4},
                {"id": 2, "name": "Drafts", "slug": "drafts", "user": {"login": "alice"}}
            ]},
            {"name": "Stack B", "books": []}
        ]);
        let workspaces = books_from_listing(&data, OwnerType::Owner);
        assert_eq!(workspaces.len(), 2);
        assert_eq!(workspaces[0].namespace, "alice/notes");
        assert_eq!(workspaces[0].document_count, 4);
        assert_eq!(workspaces[1].namespace, "alice/drafts");
        assert_eq!(workspaces[1].id, "2");
    }

    #[test]
    fn test_flat_listing_keeps_owner_type() {
        let data = json!([{"id": 9, "name": "Team KB", "namespace": "acme/kb"}]);
        let workspaces = books_from_listing(&data, OwnerType::Team);
        assert_eq!(workspaces[0].owner_type, OwnerType::Team);
        assert!(workspaces[0].is_downloadable());
    }

    #[test]
    fn test_book_without_namespace_sources_is_not_downloadable() {
        let data = json!([{"id": 3, "name": "Orphan", "slug": "orphan"}]);
        let workspaces = books_from_listing(&data, OwnerType::Collab);
        assert!(workspaces[0].namespace.is_empty());
        assert!(!workspaces[0].is_downloadable());
    }

    #[test]
    fn test_non_array_listing_is_empty() {
        assert!(books_from_listing(&json!({"books": []}), OwnerType::Owner).is_empty());
    }
}
