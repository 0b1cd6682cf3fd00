//! Config resolution: defaults, then the TOML file, then CLI flags.

use std::path::PathBuf;

use anyhow::{Context, Result};
use exporter_core::config::{
    CONFIG_FILE_NAME, default_config_dir, load_default_file_config, load_file_config,
};
use exporter_core::constants::DEFAULT_OUTPUT_DIR;
use exporter_core::{ExportConfig, FileConfig};
use tracing::debug;

use crate::cli::{Cli, ExportArgs};

/// Builds the effective configuration for a command.
///
/// `export` is `None` for commands that only need the session and cache.
pub(crate) fn resolve_config(cli: &Cli, export: Option<&ExportArgs>) -> Result<ExportConfig> {
    let (meta_dir, file) = load_file_layer(cli)?;

    let mut config = ExportConfig::new(meta_dir, DEFAULT_OUTPUT_DIR);
    if let Some(file) = &file {
        config.apply_file(file);
    }
    // --meta-dir beats a meta_dir key in the file
    if let Some(meta_dir) = &cli.meta_dir {
        config.meta_dir.clone_from(meta_dir);
    }
    if let Some(host) = &cli.host {
        config = config.with_host(host);
    }
    if let Some(args) = export {
        apply_export_args(&mut config, args);
    }

    config.validate().context("invalid configuration")?;
    debug!(
        host = %config.host,
        meta_dir = %config.meta_dir.display(),
        output_dir = %config.output_dir.display(),
        "configuration resolved"
    );
    Ok(config)
}

fn load_file_layer(cli: &Cli) -> Result<(PathBuf, Option<FileConfig>)> {
    if let Some(path) = &cli.config {
        let file = load_file_config(path)
            .with_context(|| format!("cannot load config file {}", path.display()))?;
        let meta_dir = meta_dir_for(cli)?;
        return Ok((meta_dir, Some(file)));
    }

    if let Some(meta_dir) = &cli.meta_dir {
        let path = meta_dir.join(CONFIG_FILE_NAME);
        let file = if path.exists() {
            Some(
                load_file_config(&path)
                    .with_context(|| format!("cannot load config file {}", path.display()))?,
            )
        } else {
            None
        };
        return Ok((meta_dir.clone(), file));
    }

    let file = load_default_file_config().context("cannot load default config file")?;
    if let Some((path, _)) = &file {
        debug!(path = %path.display(), "loaded config file");
    }
    Ok((meta_dir_for(cli)?, file.map(|(_, file)| file)))
}

fn meta_dir_for(cli: &Cli) -> Result<PathBuf> {
    match &cli.meta_dir {
        Some(dir) => Ok(dir.clone()),
        None => default_config_dir().context("no config directory; pass --meta-dir"),
    }
}

fn apply_export_args(config: &mut ExportConfig, args: &ExportArgs) {
    if let Some(output) = &args.output {
        config.output_dir.clone_from(output);
    }
    if args.images {
        config.download_images = true;
    }
    if let Some(workers) = args.image_workers {
        config.image_workers = usize::from(workers);
    }
    if let Some(mode) = args.rename_mode {
        config.image_rename_mode = mode;
    }
    if let Some(prefix) = &args.image_prefix {
        config.image_file_prefix.clone_from(prefix);
    }
    if let Some(prefix) = &args.image_url_prefix {
        config.image_url_prefix.clone_from(prefix);
    }
    if let Some(ms) = args.doc_delay_ms {
        config.doc_delay = std::time::Duration::from_millis(ms);
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(policy) = args.failure_policy() {
        config.workspace_failure_policy = policy;
    }
}
