use super::LoggingArgs;
use crate::config::{Settings, SlotGranularity};
use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SlotArg {
    Global,
    Pod,
}

impl From<SlotArg> for SlotGranularity {
    fn from(slot: SlotArg) -> Self {
        match slot {
            SlotArg::Global => SlotGranularity::Global,
            SlotArg::Pod => SlotGranularity::Pod,
        }
    }
}

#[derive(Args)]
pub struct ServerCommand {
    /// Configuration file layered over the defaults
    #[arg(short = 'c', long, env = "AIENGINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen host
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Directory trained models are written under
    #[arg(long, value_name = "DIR")]
    pub models_root: Option<PathBuf>,

    /// Training concurrency: one job per process or one per pod
    #[arg(long, value_enum)]
    pub slot: Option<SlotArg>,

    /// Path to the TLS certificate (PEM)
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// Path to the TLS private key (PEM)
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,

    /// Base URL episode reports are posted under
    #[arg(long)]
    pub report_url: Option<String>,

    /// Do not post episode reports
    #[arg(long)]
    pub no_report: bool,

    /// Keep running when the parent process exits
    #[arg(long)]
    pub no_watch_parent: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl ServerCommand {
    /// Override loaded settings with the flags that were given
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(root) = &self.models_root {
            settings.storage.models_root = root.clone();
        }
        if let Some(slot) = self.slot {
            settings.training.slot = slot.into();
        }
        if self.tls_cert.is_some() {
            settings.server.tls_cert = self.tls_cert.clone();
            settings.server.tls_key = self.tls_key.clone();
        }
        if let Some(url) = &self.report_url {
            settings.reporting.base_url = url.clone();
        }
        if self.no_report {
            settings.reporting.enabled = false;
        }
        if self.no_watch_parent {
            settings.shutdown.watch_parent = false;
        }
        settings.logging.level = self.logging.effective_level(&settings.logging.level).to_string();
        if self.logging.log_filter.is_some() {
            settings.logging.filter = self.logging.log_filter.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        server: ServerCommand,
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::parse_from([
            "aiengine", "--port", "9100", "--slot", "pod", "--no-report", "-v",
        ]);
        let mut settings = Settings::default();
        cli.server.apply(&mut settings);

        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.training.slot, SlotGranularity::Pod);
        assert!(!settings.reporting.enabled);
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.shutdown.watch_parent);
    }

    #[test]
    fn test_tls_flags_go_together() {
        assert!(Cli::try_parse_from(["aiengine", "--tls-cert", "cert.pem"]).is_err());
    }
}
