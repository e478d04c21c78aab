//! `GetInference`: the pod's latest model applied to its latest data window.

use crate::agents::{get_agent, Agent, ModelMetadata};
use crate::registry::{ModelRecord, ModelRegistry, PodRegistry};
use crate::service::messages::{InferenceRequest, InferenceResult, Response, ResultCode, LATEST_TAG};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

type SharedAgent = Arc<Mutex<Box<dyn Agent>>>;

/// A loaded agent and what it was loaded for
struct CachedAgent {
    version: u64,
    shape: (usize, usize),
    action_count: usize,
    agent: SharedAgent,
}

/// Answers inference requests. Keeps one loaded agent per pod and replaces
/// it when the pod's model record or input shape changes.
pub struct InferenceHandler {
    pods: Arc<PodRegistry>,
    models: Arc<ModelRegistry>,
    agents: Mutex<HashMap<String, CachedAgent>>,
}

impl InferenceHandler {
    pub fn new(pods: Arc<PodRegistry>, models: Arc<ModelRegistry>) -> Self {
        Self {
            pods,
            models,
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// May read the model from disk; call off the async workers.
    pub fn infer(&self, req: &InferenceRequest) -> InferenceResult {
        let Ok(pod) = self.pods.get(&req.pod) else {
            return Response::new(ResultCode::PodNotInitialized).into();
        };
        let tag = if req.tag.is_empty() { LATEST_TAG } else { req.tag.as_str() };
        if tag != LATEST_TAG {
            return Response::new(ResultCode::TagNotYetSupported)
                .with_message("Support for multiple tags coming soon!")
                .into();
        }
        let Ok(model) = self.models.latest(&req.pod) else {
            return Response::new(ResultCode::PodNotTrained)
                .with_message("No model has finished training for this pod")
                .into();
        };
        let Some(window) = pod.data().latest_window() else {
            return Response::new(ResultCode::NotEnoughData)
                .with_message(format!(
                    "At least {} rows are needed for inference",
                    pod.data().window_span()
                ))
                .into();
        };

        let actions = pod.data().action_names();
        let Some(agent) = self.agent(&req.pod, &model, pod.data().shape(), actions.len()) else {
            return Response::new(ResultCode::UnableToLoadModel)
                .with_message(format!("Unable to load a model from {}", model.path.display()))
                .into();
        };

        let (action, confidence) = agent.lock().act(&window.rows);
        InferenceResult {
            response: Response::ok(),
            start: window.start,
            end: window.end,
            action: actions.get(action).cloned().unwrap_or_default(),
            confidence,
            tag: tag.to_string(),
        }
    }

    /// Pods with a loaded agent
    pub fn cached_pods(&self) -> usize {
        self.agents.lock().len()
    }

    fn agent(
        &self,
        pod: &str,
        model: &ModelRecord,
        shape: (usize, usize),
        action_count: usize,
    ) -> Option<SharedAgent> {
        if let Some(cached) = self.agents.lock().get(pod) {
            if cached.version == model.version
                && cached.shape == shape
                && cached.action_count == action_count
            {
                return Some(cached.agent.clone());
            }
        }

        let meta = ModelMetadata::read(&model.path).ok()?;
        let mut agent = get_agent(&meta.algorithm, shape, action_count).ok()?;
        if !agent.load(&model.path) {
            return None;
        }
        debug!(pod, path = %model.path.display(), algorithm = %meta.algorithm, "Loaded model for inference");

        let agent = Arc::new(Mutex::new(agent));
        self.agents.lock().insert(
            pod.to_string(),
            CachedAgent {
                version: model.version,
                shape,
                action_count,
                agent: agent.clone(),
            },
        );
        Some(agent)
    }
}
