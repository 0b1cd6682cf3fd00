//! Export command handler.

use std::io::{self, IsTerminal};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use exporter_core::{
    ApiClient, CredentialStore, DownloadRequest, ExportConfig, ExportError, ExportObserver,
    ExportScheduler, ExportSummary, NoopObserver,
};
use tracing::{info, warn};

use crate::app::progress::ProgressObserver;
use crate::app::terminal;
use crate::cli::ExportArgs;

pub(crate) fn build_request(args: &ExportArgs) -> DownloadRequest {
    let mut request = DownloadRequest::new(args.workspaces.iter().cloned())
        .with_range(args.range, args.limit)
        .with_skip_existing(!args.no_skip_existing)
        .with_preserve_linebreaks(!args.strip_linebreaks);
    for (workspace, ids) in &args.selected {
        request = request.with_selected(workspace.clone(), ids.iter().cloned());
    }
    request
}

pub async fn run_export_command(
    config: ExportConfig,
    args: &ExportArgs,
    quiet: bool,
) -> Result<ExportSummary> {
    let store = CredentialStore::new(&config.meta_dir);
    if store.load().is_none() {
        return Err(ExportError::CredentialsExpired).context("no valid session stored");
    }
    let client = ApiClient::new(&config, store).context("cannot build HTTP client")?;

    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_signal = Arc::clone(&interrupted);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupted_signal.store(true, Ordering::SeqCst);
            warn!("Interrupt received; finishing in-flight work");
        }
    });

    let use_bars = terminal::should_use_progress_bars(
        io::stderr().is_terminal(),
        quiet,
        terminal::is_dumb_terminal(),
    );
    let progress = use_bars.then(|| Arc::new(ProgressObserver::new()));
    let observer: Arc<dyn ExportObserver> = match &progress {
        Some(progress) => Arc::clone(progress) as Arc<dyn ExportObserver>,
        None => Arc::new(NoopObserver),
    };

    let request = build_request(args);
    info!(
        workspaces = request.workspace_names.len(),
        range = %request.range,
        output_dir = %config.output_dir.display(),
        "Export starting"
    );

    let scheduler = ExportScheduler::new(config, client)
        .with_observer(observer)
        .with_interrupt_flag(interrupted)
        .with_refresh(args.refresh)
        .with_images_all(args.images_all);
    let result = scheduler.run(&request).await;

    if let Some(progress) = &progress {
        progress.finish();
    }
    let summary = result.context("export failed")?;

    if !quiet {
        println!("{summary}");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use exporter_core::DownloadRange;

    use super::*;
    use crate::cli::{Cli, Command};

    fn args(argv: &[&str]) -> ExportArgs {
        let mut full = vec!["yuque-exporter", "export"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Export(args) => args,
            other => panic!("expected export, got {other:?}"),
        }
    }

    #[test]
    fn test_build_request_maps_flags() {
        let request = build_request(&args(&[
            "Notes",
            "Wiki",
            "--range",
            "selected",
            "--select",
            "Notes=10,11",
            "--no-skip-existing",
            "--strip-linebreaks",
        ]));
        assert_eq!(request.workspace_names.len(), 2);
        assert_eq!(request.range, DownloadRange::Selected);
        assert!(!request.skip_existing);
        assert!(!request.preserve_linebreaks);
        let ids = &request.selected_docs["Notes"];
        assert!(ids.contains("10") && ids.contains("11"));
        assert!(!request.selected_docs.contains_key("Wiki"));
    }

    #[test]
    fn test_build_request_defaults_keep_existing_files() {
        let request = build_request(&args(&["Notes"]));
        assert!(request.skip_existing);
        assert!(request.preserve_linebreaks);
        assert_eq!(request.range, DownloadRange::All);
    }
}
