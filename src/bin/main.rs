//! AI engine binary.
//!
//! `aiengine server` runs the per-pod training engine behind Arrow Flight;
//! `aiengine call` sends it a single action.

use aiengine_core::cli::commands::Commands;
use aiengine_core::cli::{init_logging, run_call, run_server};
use aiengine_core::config::{LoggingSettings, Settings};
use clap::Parser;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(cmd) => {
            let mut settings = Settings::load(cmd.config.as_deref())?;
            cmd.apply(&mut settings);
            let _guard = init_logging(&settings.logging)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(settings.worker_threads())
                .thread_name("aiengine-worker")
                .enable_all()
                .build()?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                workers = settings.worker_threads(),
                "AI engine starting up"
            );
            runtime.block_on(run_server(settings))
        }
        Commands::Call(cmd) => {
            let logging = LoggingSettings {
                level: cmd.logging.effective_level("warn").to_string(),
                filter: cmd.logging.log_filter.clone(),
                dir: None,
            };
            let _guard = init_logging(&logging)?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_call(cmd))
        }
    }
}
