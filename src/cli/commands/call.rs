use super::LoggingArgs;
use clap::Args;

#[derive(Args)]
pub struct CallCommand {
    /// Engine endpoint
    #[arg(long, default_value = "http://127.0.0.1:8004")]
    pub endpoint: String,

    /// Action to run, e.g. GetHealth or StartTraining. Omit to list actions.
    pub action: Option<String>,

    /// JSON request body
    #[arg(long, short = 'b')]
    pub body: Option<String>,

    #[command(flatten)]
    pub logging: LoggingArgs,
}
