//! CLI entry point for the Yuque exporter.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{debug, error};

mod app;
mod cli;
mod commands;

use app::{context, exit_handler, terminal};
use cli::{AuthCommand, Cli, Command};

/// Process outcome mapped to the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Everything selected was exported.
    Success,
    /// Some documents, workspaces, or images failed.
    Partial,
    /// The command could not run.
    Failure,
    /// The session is missing or expired.
    CredentialsExpired,
}

impl ProcessExit {
    fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Partial | Self::Failure => 1,
            Self::CredentialsExpired => 2,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    terminal::init_tracing(terminal::resolve_default_log_level(cli.quiet, cli.verbose));
    debug!(?cli, "CLI arguments parsed");

    let outcome = match run(&cli).await {
        Ok(outcome) => outcome,
        Err(err) => {
            let outcome = exit_handler::exit_for_error(&err);
            if outcome == ProcessExit::CredentialsExpired {
                error!(
                    "{err:#}; re-authenticate with `yuque-exporter auth login` or `yuque-exporter auth token`"
                );
            } else {
                error!("{err:#}");
            }
            outcome
        }
    };

    ExitCode::from(outcome.code())
}

async fn run(cli: &Cli) -> Result<ProcessExit> {
    match &cli.command {
        Command::Export(args) => {
            let config = context::resolve_config(cli, Some(args))?;
            let summary = commands::run_export_command(config, args, cli.quiet).await?;
            Ok(exit_handler::determine_exit_outcome(&summary))
        }
        Command::Workspaces { refresh } => {
            let config = context::resolve_config(cli, None)?;
            commands::run_workspaces_command(config, *refresh).await?;
            Ok(ProcessExit::Success)
        }
        Command::Auth(auth) => {
            let config = context::resolve_config(cli, None)?;
            match auth {
                AuthCommand::Login { account, cipher } => {
                    commands::run_login_command(&config, account, cipher).await?;
                }
                AuthCommand::Token { cookie } => {
                    commands::run_token_command(&config, cookie.as_deref()).await?;
                }
                AuthCommand::Status => commands::run_status_command(&config).await?,
                AuthCommand::Logout => commands::run_logout_command(&config)?,
            }
            Ok(ProcessExit::Success)
        }
        Command::CleanCache => {
            let config = context::resolve_config(cli, None)?;
            commands::run_clean_cache_command(&config).await?;
            Ok(ProcessExit::Success)
        }
    }
}
