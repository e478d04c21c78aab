//! Request and response bodies carried as JSON in Flight actions.

use crate::connector::DataSource;
use crate::data::{FieldSpec, Interpretation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag naming a pod's most recent model
pub const LATEST_TAG: &str = "latest";

/// Outcome codes reported in [`Response::result`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ok,
    EpochTimeInvalid,
    NotEnoughDataForTraining,
    AlreadyTraining,
    StartedTraining,
    MissingActions,
    InvalidRewardFunction,
    MissingFields,
    PodNotTrained,
    PodNotInitialized,
    TagNotYetSupported,
    UnableToLoadModelMetadata,
    UnableToLoadModel,
    NotEnoughData,
}

impl ResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultCode::Ok => "ok",
            ResultCode::EpochTimeInvalid => "epoch_time_invalid",
            ResultCode::NotEnoughDataForTraining => "not_enough_data_for_training",
            ResultCode::AlreadyTraining => "already_training",
            ResultCode::StartedTraining => "started_training",
            ResultCode::MissingActions => "missing_actions",
            ResultCode::InvalidRewardFunction => "invalid_reward_function",
            ResultCode::MissingFields => "missing_fields",
            ResultCode::PodNotTrained => "pod_not_trained",
            ResultCode::PodNotInitialized => "pod_not_initialized",
            ResultCode::TagNotYetSupported => "tag_not_yet_supported",
            ResultCode::UnableToLoadModelMetadata => "unable_to_load_model_metadata",
            ResultCode::UnableToLoadModel => "unable_to_load_model",
            ResultCode::NotEnoughData => "not_enough_data",
        }
    }

    /// Whether the code reports a rejected request. `already_training` is an
    /// answer, not a failure.
    pub fn is_error(&self) -> bool {
        !matches!(
            self,
            ResultCode::Ok | ResultCode::StartedTraining | ResultCode::AlreadyTraining
        )
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub result: ResultCode,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub error: bool,
}

impl Response {
    pub fn new(result: ResultCode) -> Self {
        Self {
            result,
            message: String::new(),
            error: result.is_error(),
        }
    }

    pub fn ok() -> Self {
        Self::new(ResultCode::Ok)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl From<ResultCode> for Response {
    fn from(code: ResultCode) -> Self {
        Response::new(code)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InitRequest {
    pub pod: String,
    pub period: i64,
    pub interval: i64,
    pub granularity: i64,
    pub epoch_time: i64,
    /// Action name to reward statement
    pub actions: BTreeMap<String, String>,
    pub actions_order: BTreeMap<String, i64>,
    pub fields: Vec<FieldSpec>,
    pub external_reward_funcs: BTreeMap<String, String>,
    pub laws: Vec<String>,
    pub datasources: Vec<DataSource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddDataRequest {
    pub pod: String,
    pub csv_data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AddInterpretationsRequest {
    pub pod: String,
    pub indexed_interpretations: Vec<Interpretation>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StartTrainingRequest {
    pub pod: String,
    /// 0 keeps the current epoch
    pub epoch_time: i64,
    pub learning_algorithm: String,
    /// 0 means the configured default
    pub number_episodes: u32,
    pub flight: String,
    pub training_goal: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceRequest {
    pub pod: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub response: Response,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tag: String,
}

impl From<Response> for InferenceResult {
    fn from(response: Response) -> Self {
        Self {
            response,
            start: 0,
            end: 0,
            action: String::new(),
            confidence: 0.0,
            tag: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportModelRequest {
    pub pod: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportModelResult {
    pub response: Response,
    #[serde(default)]
    pub model_path: String,
}

impl From<Response> for ExportModelResult {
    fn from(response: Response) -> Self {
        Self {
            response,
            model_path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportModelRequest {
    pub pod: String,
    pub import_path: String,
    pub tag: String,
}
