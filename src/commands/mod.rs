//! CLI command handlers.

mod auth;
mod export;
mod workspaces;

pub use auth::{run_login_command, run_logout_command, run_status_command, run_token_command};
pub use export::run_export_command;
pub use workspaces::{run_clean_cache_command, run_workspaces_command};
