use super::{EpisodeSink, Trainer, TrainingFailure, TrainingJob, TrainingReporter};
use crate::config::SlotGranularity;
use crate::error::panic_message;
use crate::registry::ModelRegistry;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info};

const GLOBAL_SLOT: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Started,
    AlreadyTraining,
}

#[derive(Default)]
struct Slots {
    held: Mutex<HashSet<String>>,
    released: Notify,
}

/// A held training slot. Dropping it frees the slot, also while unwinding.
struct SlotGuard {
    slots: Arc<Slots>,
    key: String,
}

impl SlotGuard {
    fn acquire(slots: &Arc<Slots>, key: String) -> Option<Self> {
        if !slots.held.lock().insert(key.clone()) {
            return None;
        }
        Some(Self {
            slots: slots.clone(),
            key,
        })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.held.lock().remove(&self.key);
        self.slots.released.notify_waiters();
    }
}

/// Runs training jobs in the background, at most one per slot.
///
/// With the default global granularity a single slot covers the whole
/// process; with per-pod granularity each pod has its own. A dispatch to a
/// busy slot is refused rather than queued. Successful runs are recorded in
/// the model registry before the slot is released; failures are sent to the
/// reporter and never reach the caller.
pub struct TrainingDispatcher {
    trainer: Arc<dyn Trainer>,
    reporter: Arc<dyn TrainingReporter>,
    models: Arc<ModelRegistry>,
    granularity: SlotGranularity,
    slots: Arc<Slots>,
}

impl TrainingDispatcher {
    pub fn new(
        trainer: Arc<dyn Trainer>,
        reporter: Arc<dyn TrainingReporter>,
        models: Arc<ModelRegistry>,
        granularity: SlotGranularity,
    ) -> Self {
        Self {
            trainer,
            reporter,
            models,
            granularity,
            slots: Arc::new(Slots::default()),
        }
    }

    fn slot_key(&self, pod: &str) -> String {
        match self.granularity {
            SlotGranularity::Global => GLOBAL_SLOT.to_string(),
            SlotGranularity::Pod => pod.to_string(),
        }
    }

    /// Start `job` unless its slot is taken. Must be called from within a
    /// tokio runtime.
    pub fn dispatch(&self, job: TrainingJob) -> DispatchOutcome {
        let Some(guard) = SlotGuard::acquire(&self.slots, self.slot_key(&job.pod)) else {
            info!(pod = %job.pod, flight = %job.flight, "Training already in progress");
            return DispatchOutcome::AlreadyTraining;
        };

        info!(
            pod = %job.pod,
            flight = %job.flight,
            algorithm = %job.algorithm,
            episodes = job.episodes,
            "Dispatching training"
        );
        tokio::spawn(supervise(
            job,
            self.trainer.clone(),
            self.reporter.clone(),
            self.models.clone(),
            guard,
        ));
        DispatchOutcome::Started
    }

    /// Whether any slot is held
    pub fn is_training(&self) -> bool {
        !self.slots.held.lock().is_empty()
    }

    /// Wait until no slot is held. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let released = self.slots.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.is_training() {
                return true;
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return !self.is_training();
            }
        }
    }
}

async fn supervise(
    job: TrainingJob,
    trainer: Arc<dyn Trainer>,
    reporter: Arc<dyn TrainingReporter>,
    models: Arc<ModelRegistry>,
    guard: SlotGuard,
) {
    let pod = job.pod.clone();
    let flight = job.flight.clone();

    let (tx, mut episodes) = mpsc::unbounded_channel();
    let sink = EpisodeSink::new(tx);
    let mut training = tokio::task::spawn_blocking(move || trainer.train(&job, &sink));

    let result = loop {
        tokio::select! {
            Some(report) = episodes.recv() => {
                reporter.report_episode(&pod, &flight, &report).await;
            }
            result = &mut training => break result,
        }
    };
    while let Ok(report) = episodes.try_recv() {
        reporter.report_episode(&pod, &flight, &report).await;
    }

    let failure = match result {
        Ok(Ok(path)) => {
            models.record(&pod, &path);
            info!(pod = %pod, flight = %flight, path = %path.display(), "Recorded trained model");
            None
        }
        Ok(Err(e)) => Some(format!("{:?}", e)),
        Err(e) if e.is_panic() => Some(format!("trainer panicked: {}", panic_message(e.into_panic().as_ref()))),
        Err(e) => Some(format!("training task failed: {}", e)),
    };
    // Free the slot before the possibly slow report.
    drop(guard);

    if let Some(trace) = failure {
        error!(pod = %pod, flight = %flight, "Training failed: {}", trace);
        reporter
            .report_failure(&pod, &flight, &TrainingFailure::unexpected(trace))
            .await;
    }
}
