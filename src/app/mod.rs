//! Runtime glue between the CLI and the exporter library.

pub(crate) mod context;
pub(crate) mod exit_handler;
pub(crate) mod progress;
pub(crate) mod terminal;
