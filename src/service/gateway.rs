//! The eight engine operations, independent of transport.

use super::messages::{
    AddDataRequest, AddInterpretationsRequest, ExportModelRequest, ExportModelResult,
    ImportModelRequest, InferenceRequest, InferenceResult, InitRequest, Response, ResultCode,
    StartTrainingRequest, LATEST_TAG,
};
use crate::agents::{get_agent, ModelMetadata};
use crate::config::TrainingSettings;
use crate::data::EpochUpdate;
use crate::error::Result;
use crate::inference::InferenceHandler;
use crate::queue::{Command, CommandSender};
use crate::registry::{ModelRegistry, PodRegistry};
use crate::reward::validate_rewards;
use crate::training::{DispatchOutcome, TrainingDispatcher, TrainingJob};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Validates requests, serves reads from the registries and hands
/// state-mutating work to the command queue or the training dispatcher.
///
/// No operation waits for queued work or training to finish. Validation
/// failures come back as a [`Response`] with an error code; `Err` is reserved
/// for unknown pods and a stopped queue.
pub struct AiEngine {
    pods: Arc<PodRegistry>,
    models: Arc<ModelRegistry>,
    queue: CommandSender,
    dispatcher: Arc<TrainingDispatcher>,
    inference: InferenceHandler,
    training: TrainingSettings,
}

impl AiEngine {
    pub fn new(
        pods: Arc<PodRegistry>,
        models: Arc<ModelRegistry>,
        queue: CommandSender,
        dispatcher: Arc<TrainingDispatcher>,
        training: TrainingSettings,
    ) -> Self {
        let inference = InferenceHandler::new(pods.clone(), models.clone());
        Self {
            pods,
            models,
            queue,
            dispatcher,
            inference,
            training,
        }
    }

    pub fn get_health(&self) -> Response {
        Response::ok()
    }

    /// Queue a CSV batch. An unknown pod is only noticed by the event loop.
    pub fn add_data(&self, req: AddDataRequest) -> Result<Response> {
        debug!(pod = %req.pod, bytes = req.csv_data.len(), "Queueing data");
        self.queue.enqueue(Command::AddData(req))?;
        Ok(Response::ok())
    }

    pub fn add_interpretations(&self, req: AddInterpretationsRequest) -> Response {
        let Ok(pod) = self.pods.get(&req.pod) else {
            return Response::new(ResultCode::PodNotInitialized);
        };
        debug!(
            pod = %req.pod,
            count = req.indexed_interpretations.len(),
            "Adding interpretations"
        );
        pod.data().add_interpretations(req.indexed_interpretations);
        Response::ok()
    }

    pub fn init(&self, req: InitRequest) -> Result<Response> {
        if req.actions.is_empty() {
            return Ok(Response::new(ResultCode::MissingActions));
        }
        if req.fields.is_empty() {
            return Ok(Response::new(ResultCode::MissingFields));
        }
        let fields: Vec<String> = req.fields.iter().map(|f| f.name.clone()).collect();
        if let Err(e) = validate_rewards(&req.actions, &req.external_reward_funcs, &fields) {
            warn!(pod = %req.pod, error = %e, "Rejected reward functions");
            return Ok(Response::new(ResultCode::InvalidRewardFunction).with_message(e.to_string()));
        }

        debug!(pod = %req.pod, "Queueing init");
        self.queue.enqueue(Command::Init(req))?;
        Ok(Response::ok())
    }

    /// Fails with `UnknownPod` if the pod's `Init` has not been processed.
    pub fn start_training(&self, req: StartTrainingRequest) -> Result<Response> {
        let pod = self.pods.get(&req.pod)?;
        let data = pod.data();

        if req.epoch_time != 0 {
            if let EpochUpdate::Rejected { minimum } = data.advance_epoch(req.epoch_time) {
                return Ok(Response::new(ResultCode::EpochTimeInvalid)
                    .with_message(format!("epoch time should be after {}", minimum)));
            }
        }

        let available = data.rows_from_epoch();
        if available < data.window_span() {
            debug!(pod = %req.pod, available, window_span = data.window_span(), "Not enough data");
            return Ok(Response::new(ResultCode::NotEnoughDataForTraining));
        }

        let algorithm = if req.learning_algorithm.is_empty() {
            self.training.default_algorithm.as_str()
        } else {
            req.learning_algorithm.as_str()
        };
        let episodes = match req.number_episodes {
            0 => self.training.default_episodes,
            n => n,
        };
        let job = TrainingJob::new(&pod, algorithm, episodes, &req.flight, &req.training_goal);

        let code = match self.dispatcher.dispatch(job) {
            DispatchOutcome::Started => ResultCode::StartedTraining,
            DispatchOutcome::AlreadyTraining => ResultCode::AlreadyTraining,
        };
        Ok(Response::new(code))
    }

    /// Loads the model from disk unless it is cached for the pod.
    pub fn get_inference(&self, req: InferenceRequest) -> InferenceResult {
        self.inference.infer(&req)
    }

    pub fn export_model(&self, req: ExportModelRequest) -> ExportModelResult {
        let Ok(path) = self.models.get(&req.pod) else {
            return Response::new(ResultCode::PodNotTrained)
                .with_message("Unable to export a model that hasn't finished at least one training run")
                .into();
        };
        if !self.pods.contains(&req.pod) {
            return Response::new(ResultCode::PodNotInitialized).into();
        }
        if req.tag != LATEST_TAG {
            return Response::new(ResultCode::TagNotYetSupported)
                .with_message("Support for multiple tags coming soon!")
                .into();
        }

        ExportModelResult {
            response: Response::ok(),
            model_path: path.display().to_string(),
        }
    }

    /// Reads the artifact from disk to check it loads.
    pub fn import_model(&self, req: ImportModelRequest) -> Response {
        let Ok(pod) = self.pods.get(&req.pod) else {
            return Response::new(ResultCode::PodNotInitialized);
        };
        let import_path = Path::new(&req.import_path);

        let meta = match ModelMetadata::read(import_path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %import_path.display(), error = %e, "Unreadable model metadata");
                return Response::new(ResultCode::UnableToLoadModelMetadata)
                    .with_message(format!("Unable to find meta data at {}", import_path.display()));
            }
        };

        let data = pod.data();
        let loaded = match get_agent(&meta.algorithm, data.shape(), data.action_names().len()) {
            Ok(mut agent) => agent.load(import_path),
            Err(e) => {
                debug!(error = %e, "Unable to build agent for imported model");
                false
            }
        };
        if !loaded {
            return Response::new(ResultCode::UnableToLoadModel)
                .with_message(format!("Unable to find a model at {}", import_path.display()));
        }

        self.models.record(&req.pod, import_path);
        info!(pod = %req.pod, path = %import_path.display(), "Imported model");
        Response::ok()
    }

    pub fn dispatcher(&self) -> &Arc<TrainingDispatcher> {
        &self.dispatcher
    }
}
