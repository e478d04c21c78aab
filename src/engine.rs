//! Wiring of the engine's components and their teardown.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::queue::{command_queue, CommandOutcome, EventLoop};
use crate::registry::{ModelRegistry, PodRegistry};
use crate::service::{AiEngine, AiEngineFlightService};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::training::{
    remove_partial_artifacts, reporter_from_settings, LocalTrainer, Trainer, TrainingDispatcher,
    TrainingReporter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Assembles an [`Engine`]. Trainer and reporter default to the ones the
/// settings describe.
pub struct EngineBuilder {
    settings: Settings,
    trainer: Option<Arc<dyn Trainer>>,
    reporter: Option<Arc<dyn TrainingReporter>>,
    observer: Option<mpsc::UnboundedSender<CommandOutcome>>,
    shutdown: Option<ShutdownCoordinator>,
}

impl EngineBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            trainer: None,
            reporter: None,
            observer: None,
            shutdown: None,
        }
    }

    pub fn with_trainer(mut self, trainer: Arc<dyn Trainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn TrainingReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Receive the outcome of every command the event loop processes
    pub fn with_observer(mut self, observer: mpsc::UnboundedSender<CommandOutcome>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownCoordinator) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Build the components and start the event loop. Must be called from
    /// within a tokio runtime.
    pub fn start(self) -> Result<Engine> {
        let settings = self.settings;
        let trainer = match self.trainer {
            Some(trainer) => trainer,
            None => Arc::new(LocalTrainer::new(settings.storage.models_root.clone())),
        };
        let reporter = match self.reporter {
            Some(reporter) => reporter,
            None => Arc::from(reporter_from_settings(&settings.reporting)?),
        };
        let shutdown = self.shutdown.unwrap_or_default();

        let pods = Arc::new(PodRegistry::new());
        let models = Arc::new(ModelRegistry::new());
        let dispatcher = Arc::new(TrainingDispatcher::new(
            trainer,
            reporter,
            models.clone(),
            settings.training.slot,
        ));

        let (sender, receiver) = command_queue();
        let mut event_loop = EventLoop::new(receiver, pods.clone())
            .with_max_filled_rows(settings.storage.max_filled_rows);
        if let Some(observer) = self.observer {
            event_loop = event_loop.with_observer(observer);
        }
        let event_loop = tokio::spawn(event_loop.run(shutdown.listener()));

        let gateway = Arc::new(AiEngine::new(
            pods.clone(),
            models.clone(),
            sender,
            dispatcher.clone(),
            settings.training.clone(),
        ));

        info!(
            slot = ?settings.training.slot,
            models_root = %settings.storage.models_root.display(),
            "Engine started"
        );
        Ok(Engine {
            settings,
            pods,
            models,
            dispatcher,
            gateway,
            shutdown,
            event_loop: Some(event_loop),
        })
    }
}

/// A running engine.
pub struct Engine {
    settings: Settings,
    pods: Arc<PodRegistry>,
    models: Arc<ModelRegistry>,
    dispatcher: Arc<TrainingDispatcher>,
    gateway: Arc<AiEngine>,
    shutdown: ShutdownCoordinator,
    event_loop: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn builder(settings: Settings) -> EngineBuilder {
        EngineBuilder::new(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn gateway(&self) -> &Arc<AiEngine> {
        &self.gateway
    }

    pub fn flight_service(&self) -> AiEngineFlightService {
        AiEngineFlightService::new(self.gateway.clone())
    }

    pub fn pods(&self) -> &Arc<PodRegistry> {
        &self.pods
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn dispatcher(&self) -> &Arc<TrainingDispatcher> {
        &self.dispatcher
    }

    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.shutdown
    }

    /// Stop the event loop, give an active training job up to
    /// `training.join_timeout_secs` to finish, then clean up once.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.shutdown.trigger(ShutdownReason::Requested);

        if let Some(event_loop) = self.event_loop.take() {
            event_loop
                .await
                .map_err(|e| Error::Runtime(format!("event loop task failed: {}", e)))?;
        }

        let timeout = Duration::from_secs(self.settings.training.join_timeout_secs);
        if !self.dispatcher.wait_idle(timeout).await {
            warn!(timeout_secs = timeout.as_secs(), "Training still running at shutdown");
        }

        let dispatcher = &self.dispatcher;
        let models_root = &self.settings.storage.models_root;
        self.shutdown.cleanup_once(|| {
            if dispatcher.is_training() {
                warn!("Leaving partial artifacts in place, training still running");
                return;
            }
            match remove_partial_artifacts(models_root) {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed partial artifacts"),
                Err(e) => warn!(error = %e, "Failed to remove partial artifacts"),
            }
        });
        info!("Engine stopped");
        Ok(())
    }
}
