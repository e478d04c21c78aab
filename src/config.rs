//! Configuration management for the AI engine.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/aiengine/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (`AIENGINE__<SECTION>__<KEY>`, e.g. `AIENGINE__SERVER__PORT`)
//! 5. Command-line arguments (applied by the CLI handlers)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub reporting: ReportingSettings,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Network and request handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on concurrently handled requests per connection
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Runtime worker threads; 0 means one per CPU
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    #[serde(default)]
    pub tls_cert: Option<PathBuf>,
    #[serde(default)]
    pub tls_key: Option<PathBuf>,
}

/// How many training jobs may run at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotGranularity {
    /// One training job per process, whatever the pod
    Global,
    /// One training job per pod
    Pod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSettings {
    #[serde(default = "default_algorithm")]
    pub default_algorithm: String,
    #[serde(default = "default_episodes")]
    pub default_episodes: u32,
    #[serde(default = "default_slot")]
    pub slot: SlotGranularity,
    /// How long shutdown waits for an in-flight training job
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory under which trained artifacts are written
    #[serde(default = "default_models_root")]
    pub models_root: PathBuf,
    /// Most filled rows a pod may hold; larger `AddData` batches are rejected
    #[serde(default = "default_max_filled_rows")]
    pub max_filled_rows: usize,
}

/// Out-of-band episode and failure reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_reporting_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownSettings {
    /// Terminate when the supervising parent process exits
    #[serde(default = "default_true")]
    pub watch_parent: bool,
    #[serde(default = "default_parent_poll_ms")]
    pub parent_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `EnvFilter` directives, e.g. `aiengine_core=debug,tonic=info`
    #[serde(default)]
    pub filter: Option<String>,
    /// Write logs to a daily rolling file in this directory as well
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from all file and environment sources
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/aiengine/config.toml").required(false));

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("AIENGINE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.server.tls_cert.is_some() != self.server.tls_key.is_some() {
            return Err(Error::Config(
                "server.tls_cert and server.tls_key must be set together".into(),
            ));
        }
        if self.training.default_episodes == 0 {
            return Err(Error::Config("training.default_episodes must be positive".into()));
        }
        Ok(())
    }

    /// Socket address the service listens on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {}", e)))
    }

    /// Number of runtime worker threads to start
    pub fn worker_threads(&self) -> usize {
        match self.server.worker_threads {
            0 => num_cpus::get(),
            n => n,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            worker_threads: default_worker_threads(),
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            default_algorithm: default_algorithm(),
            default_episodes: default_episodes(),
            slot: default_slot(),
            join_timeout_secs: default_join_timeout_secs(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            models_root: default_models_root(),
            max_filled_rows: default_max_filled_rows(),
        }
    }
}

impl Default for ReportingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_base_url(),
            timeout_secs: default_reporting_timeout_secs(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            watch_parent: true,
            parent_poll_ms: default_parent_poll_ms(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            filter: None,
            dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8004
}

fn default_max_concurrent_requests() -> usize {
    10
}

fn default_worker_threads() -> usize {
    10
}

fn default_algorithm() -> String {
    "dql".to_string()
}

fn default_episodes() -> u32 {
    30
}

fn default_slot() -> SlotGranularity {
    SlotGranularity::Global
}

fn default_join_timeout_secs() -> u64 {
    30
}

fn default_models_root() -> PathBuf {
    std::env::temp_dir().join("aiengine").join("models")
}

fn default_max_filled_rows() -> usize {
    crate::data::DEFAULT_MAX_FILLED_ROWS
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://localhost:8000/api/v0.1/pods".to_string()
}

fn default_reporting_timeout_secs() -> u64 {
    10
}

fn default_parent_poll_ms() -> u64 {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_defaults() {
        let settings = Settings::load(None).unwrap();
        assert_eq!(settings.server.port, 8004);
        assert_eq!(settings.server.max_concurrent_requests, 10);
        assert_eq!(settings.training.default_episodes, 30);
        assert_eq!(settings.training.default_algorithm, "dql");
        assert_eq!(settings.training.slot, SlotGranularity::Global);
        assert!(settings.reporting.enabled);
        assert!(settings.shutdown.watch_parent);
    }

    #[test]
    fn test_user_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[training]\nslot = \"pod\"\ndefault_episodes = 5").unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.training.slot, SlotGranularity::Pod);
        assert_eq!(settings.training.default_episodes, 5);
        assert_eq!(settings.server.port, 8004);
    }

    #[test]
    fn test_tls_requires_both_paths() {
        let mut settings = Settings::default();
        settings.server.tls_cert = Some(PathBuf::from("cert.pem"));
        assert!(settings.validate().is_err());
        settings.server.tls_key = Some(PathBuf::from("key.pem"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_listen_addr() {
        let mut settings = Settings::default();
        settings.server.host = "127.0.0.1".into();
        settings.server.port = 9000;
        assert_eq!(settings.listen_addr().unwrap().to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_worker_threads_zero_means_cpus() {
        let mut settings = Settings::default();
        settings.server.worker_threads = 0;
        assert_eq!(settings.worker_threads(), num_cpus::get());
    }
}
