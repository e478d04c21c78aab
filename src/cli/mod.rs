//! Command-line interface: the `server` and `call` subcommands.

pub mod commands;
pub mod handlers;

pub use handlers::{init_logging, run_call, run_server};
