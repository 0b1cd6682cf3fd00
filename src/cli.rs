//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use exporter_core::{DownloadRange, RenameMode, WorkspaceFailurePolicy};

/// Batch export Yuque knowledge bases to local Markdown.
///
/// Workspaces are enumerated through the logged-in session, each selected
/// document is exported as Markdown, and embedded images can be pulled down
/// next to the files that reference them.
#[derive(Parser, Debug)]
#[command(name = "yuque-exporter")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Directory holding credentials, cache files, and config.toml
    #[arg(long, global = true, value_name = "DIR")]
    pub meta_dir: Option<PathBuf>,

    /// Config file to load instead of the default location
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Workspace host, e.g. https://www.yuque.com
    #[arg(long, global = true, value_name = "URL")]
    pub host: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Export documents from one or more workspaces
    Export(ExportArgs),

    /// List workspaces visible to the current session
    Workspaces {
        /// Ignore cached listings
        #[arg(long)]
        refresh: bool,
    },

    /// Manage the stored session
    #[command(subcommand)]
    Auth(AuthCommand),

    /// Remove cached workspace and document lists
    CleanCache,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommand {
    /// Log in with account and password
    Login {
        /// Account name (phone number or e-mail)
        account: String,

        /// Command that reads a password on stdin and prints the encrypted token
        #[arg(long, value_name = "COMMAND")]
        cipher: String,
    },

    /// Store a session cookie copied from a browser (reads stdin when omitted)
    Token {
        /// Cookie header value
        cookie: Option<String>,
    },

    /// Show whether a valid session is stored
    Status,

    /// Delete stored credentials
    Logout,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Workspace names to export
    #[arg(required = true, value_name = "WORKSPACE")]
    pub workspaces: Vec<String>,

    /// Output directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Which documents to export: all, recent, custom, selected
    #[arg(long, default_value_t = DownloadRange::All)]
    pub range: DownloadRange,

    /// Document limit for the recent and custom ranges (0 for no limit)
    #[arg(long, default_value_t = 0)]
    pub limit: usize,

    /// Selected document ids as WORKSPACE=ID[,ID...] (repeatable)
    #[arg(long = "select", value_name = "WORKSPACE=IDS", value_parser = parse_selection)]
    pub selected: Vec<(String, Vec<String>)>,

    /// Re-export documents whose output already exists
    #[arg(long)]
    pub no_skip_existing: bool,

    /// Remove <br> tags from exported Markdown
    #[arg(long)]
    pub strip_linebreaks: bool,

    /// Download embedded images after export
    #[arg(long)]
    pub images: bool,

    /// Process every Markdown file under the output directory for images
    #[arg(long, requires = "images")]
    pub images_all: bool,

    /// Ignore cached workspace and document lists
    #[arg(long)]
    pub refresh: bool,

    /// Concurrent image downloads (1-30)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=30))]
    pub image_workers: Option<u8>,

    /// Image naming: sequential or preserve
    #[arg(long, value_name = "MODE")]
    pub rename_mode: Option<RenameMode>,

    /// Prefix for sequential image file names
    #[arg(long, value_name = "PREFIX")]
    pub image_prefix: Option<String>,

    /// Prefix written before image names in rewritten Markdown
    #[arg(long, value_name = "PREFIX")]
    pub image_url_prefix: Option<String>,

    /// Minimum delay between document requests in milliseconds (max 60000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub doc_delay_ms: Option<u64>,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=10))]
    pub max_retries: Option<u32>,

    /// Move on to the next workspace when one fails
    #[arg(long)]
    pub continue_on_error: bool,
}

impl ExportArgs {
    /// Failure policy requested on the command line, if any.
    pub fn failure_policy(&self) -> Option<WorkspaceFailurePolicy> {
        self.continue_on_error
            .then_some(WorkspaceFailurePolicy::Continue)
    }
}

fn parse_selection(raw: &str) -> Result<(String, Vec<String>), String> {
    let Some((workspace, ids)) = raw.split_once('=') else {
        return Err(format!("expected WORKSPACE=ID[,ID...], got `{raw}`"));
    };
    let workspace = workspace.trim();
    if workspace.is_empty() {
        return Err("workspace name must not be empty".to_string());
    }
    let ids: Vec<String> = ids
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    Ok((workspace.to_string(), ids))
}
