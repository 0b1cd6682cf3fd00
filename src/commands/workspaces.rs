//! Workspace listing and cache maintenance.

use anyhow::{Context, Result};
use exporter_core::{ApiClient, CredentialStore, ExportConfig, ExportError, ExportScheduler, TtlCache};
use tracing::info;

pub async fn run_workspaces_command(config: ExportConfig, refresh: bool) -> Result<()> {
    let store = CredentialStore::new(&config.meta_dir);
    if store.load().is_none() {
        return Err(ExportError::CredentialsExpired).context("no valid session stored");
    }
    let client = ApiClient::new(&config, store).context("cannot build HTTP client")?;
    let scheduler = ExportScheduler::new(config, client).with_refresh(refresh);

    let workspaces = scheduler
        .list_workspaces()
        .await
        .context("cannot list workspaces")?;
    for workspace in &workspaces {
        println!(
            "{:<8} {:<40} {:>6}  {}",
            workspace.owner_type.as_str(),
            workspace.namespace,
            workspace.document_count,
            workspace.name
        );
    }
    info!(count = workspaces.len(), "Listed workspaces");
    Ok(())
}

pub async fn run_clean_cache_command(config: &ExportConfig) -> Result<()> {
    let cache = TtlCache::new(config.meta_dir.clone());
    let removed = cache.clean().await.context("cannot clean cache")?;
    info!(removed, dir = %cache.dir().display(), "Cache cleaned");
    Ok(())
}
