//! Out-of-band reporting of training progress and failures.
//!
//! Reports go to `{base_url}/{pod}/training_runs/{flight}/episodes` as JSON
//! POSTs, with the pod and flight names percent-encoded as path segments.
//! Delivery is best effort: a failed delivery is logged and dropped.

use crate::config::ReportingSettings;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Summary of one training episode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeReport {
    pub episode: u32,
    pub start: i64,
    pub end: i64,
    pub score: f64,
    /// How often each action was taken
    pub actions_taken: BTreeMap<String, u64>,
}

/// Body posted when a training run dies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingFailure {
    pub error: String,
    pub error_message: String,
}

impl TrainingFailure {
    pub const UNEXPECTED: &'static str = "unexpected_exception";

    pub fn unexpected(trace: impl Into<String>) -> Self {
        Self {
            error: Self::UNEXPECTED.to_string(),
            error_message: trace.into(),
        }
    }
}

#[async_trait]
pub trait TrainingReporter: Send + Sync {
    async fn report_episode(&self, pod: &str, flight: &str, report: &EpisodeReport);

    async fn report_failure(&self, pod: &str, flight: &str, failure: &TrainingFailure);
}

/// Posts reports to the pod's training run endpoint.
pub struct HttpReporter {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpReporter {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid reporting base_url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!("reporting base_url '{}' cannot hold a path", base_url)));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client, base_url })
    }

    pub fn episodes_url(&self, pod: &str, flight: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend([pod, "training_runs", flight, "episodes"]);
        }
        url
    }

    async fn post<T: Serialize + Sync>(&self, url: Url, body: &T) {
        match self.client.post(url.clone()).json(body).send().await {
            Ok(response) if response.status().is_success() => {
                trace!("report accepted by {}", url);
            }
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("report to {} returned non-success status {}: {}", url, status, body);
            }
            Err(e) => warn!("failed to deliver report to {}: {}", url, e),
        }
    }
}

#[async_trait]
impl TrainingReporter for HttpReporter {
    async fn report_episode(&self, pod: &str, flight: &str, report: &EpisodeReport) {
        self.post(self.episodes_url(pod, flight), report).await;
    }

    async fn report_failure(&self, pod: &str, flight: &str, failure: &TrainingFailure) {
        self.post(self.episodes_url(pod, flight), failure).await;
    }
}

/// Logs reports instead of sending them. Used when reporting is disabled.
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl TrainingReporter for LogReporter {
    async fn report_episode(&self, pod: &str, flight: &str, report: &EpisodeReport) {
        debug!(
            pod = %pod,
            flight = %flight,
            episode = report.episode,
            score = report.score,
            "Training episode finished"
        );
    }

    async fn report_failure(&self, pod: &str, flight: &str, failure: &TrainingFailure) {
        info!(
            pod = %pod,
            flight = %flight,
            error = %failure.error,
            "Training failed: {}",
            failure.error_message
        );
    }
}

/// Reporter selected by configuration
pub fn reporter_from_settings(settings: &ReportingSettings) -> Result<Box<dyn TrainingReporter>> {
    if !settings.enabled {
        return Ok(Box::new(LogReporter));
    }
    Ok(Box::new(HttpReporter::new(
        &settings.base_url,
        Duration::from_secs(settings.timeout_secs),
    )?))
}
