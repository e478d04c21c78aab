pub mod call;
pub mod server;

pub use call::CallCommand;
pub use server::ServerCommand;

use clap::{Args, Subcommand};

#[derive(Subcommand)]
pub enum Commands {
    /// Start the engine and serve it over Arrow Flight
    Server(ServerCommand),
    /// Send one action to a running engine and print the response
    Call(CallCommand),
}

/// Logging flags shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct LoggingArgs {
    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long = "log-level", env = "AIENGINE_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log filter directives
    #[arg(long = "log-filter", env = "AIENGINE_LOG_FILTER")]
    pub log_filter: Option<String>,
}

impl LoggingArgs {
    /// Level implied by the flags, falling back to `configured`
    pub fn effective_level<'a>(&'a self, configured: &'a str) -> &'a str {
        match (self.verbose, self.log_level.as_deref()) {
            (v, _) if v >= 2 => "trace",
            (1, _) => "debug",
            (_, Some(level)) => level,
            _ => configured,
        }
    }
}
