//! Training jobs: the trainer contract, the single-flight dispatcher that
//! runs them, and the reporting channel for their progress.

mod dispatcher;
mod local;
pub mod report;

pub use dispatcher::{DispatchOutcome, TrainingDispatcher};
pub use local::{remove_partial_artifacts, LocalTrainer};
pub use report::{
    reporter_from_settings, EpisodeReport, HttpReporter, LogReporter, TrainingFailure,
    TrainingReporter,
};

use crate::connector::ConnectorManager;
use crate::data::DataManager;
use crate::registry::Pod;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One training run. Holds the pod's handles for as long as it runs.
#[derive(Debug, Clone)]
pub struct TrainingJob {
    pub pod: String,
    pub algorithm: String,
    pub episodes: u32,
    pub flight: String,
    /// Expression over `score` and `episode`; training stops once it holds
    pub goal: String,
    pub data: Arc<DataManager>,
    pub connectors: Arc<ConnectorManager>,
}

impl TrainingJob {
    pub fn new(pod: &Pod, algorithm: &str, episodes: u32, flight: &str, goal: &str) -> Self {
        Self {
            pod: pod.name().to_string(),
            algorithm: algorithm.to_string(),
            episodes,
            flight: flight.to_string(),
            goal: goal.to_string(),
            data: pod.data().clone(),
            connectors: pod.connectors().clone(),
        }
    }
}

/// Where a running trainer sends its episode reports.
#[derive(Debug, Clone)]
pub struct EpisodeSink {
    tx: mpsc::UnboundedSender<EpisodeReport>,
}

impl EpisodeSink {
    pub fn new(tx: mpsc::UnboundedSender<EpisodeReport>) -> Self {
        Self { tx }
    }

    /// Dropped silently if nobody is listening anymore
    pub fn send(&self, report: EpisodeReport) {
        let _ = self.tx.send(report);
    }
}

/// Runs a training job to completion on the calling thread.
///
/// Called from a blocking thread. Returns the directory of the committed
/// artifact.
pub trait Trainer: Send + Sync + 'static {
    fn train(&self, job: &TrainingJob, episodes: &EpisodeSink) -> anyhow::Result<PathBuf>;
}
