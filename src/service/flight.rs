//! Arrow Flight transport for the engine.
//!
//! Every operation is a Flight action named after it (`StartTraining`,
//! `ExportModel`, ...) with a JSON request body. The single result carries
//! the JSON response. Other Flight RPCs are not offered.

use super::gateway::AiEngine;
use crate::error::Error;
use arrow_flight::{
    flight_service_server::{FlightService, FlightServiceServer},
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaResult, Ticket,
};
use bytes::Bytes;
use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tonic::{Request, Response, Status, Streaming};
use tracing::debug;

/// Operations offered through `DoAction`, with their descriptions
pub const ACTIONS: [(&str, &str); 8] = [
    ("GetHealth", "Report service health"),
    ("AddData", "Queue a CSV batch of observations for a pod"),
    ("AddInterpretations", "Attach labelled time ranges to a pod"),
    ("StartTraining", "Start a training run for a pod"),
    ("GetInference", "Recommend an action from the pod's latest model"),
    ("Init", "Declare or replace a pod"),
    ("ExportModel", "Locate the pod's latest trained model"),
    ("ImportModel", "Install a model artifact as the pod's latest"),
];

/// Flight service wrapping an [`AiEngine`]
#[derive(Clone)]
pub struct AiEngineFlightService {
    engine: Arc<AiEngine>,
}

impl AiEngineFlightService {
    pub fn new(engine: Arc<AiEngine>) -> Self {
        Self { engine }
    }

    pub fn into_server(self) -> FlightServiceServer<Self> {
        FlightServiceServer::new(self)
    }

    /// Run one action and return the encoded response
    async fn handle_action(&self, action: &Action) -> Result<Bytes, Status> {
        let engine = &self.engine;
        match action.r#type.as_str() {
            "GetHealth" => encode(&engine.get_health()),
            "AddData" => encode(&engine.add_data(decode(&action.body)?)?),
            "AddInterpretations" => encode(&engine.add_interpretations(decode(&action.body)?)),
            "StartTraining" => encode(&engine.start_training(decode(&action.body)?)?),
            "GetInference" => {
                let req = decode(&action.body)?;
                let engine = engine.clone();
                encode(&blocking(move || engine.get_inference(req)).await?)
            }
            "Init" => encode(&engine.init(decode(&action.body)?)?),
            "ExportModel" => encode(&engine.export_model(decode(&action.body)?)),
            "ImportModel" => {
                let req = decode(&action.body)?;
                let engine = engine.clone();
                encode(&blocking(move || engine.import_model(req)).await?)
            }
            other => Err(Status::unimplemented(format!("Action '{}' not supported", other))),
        }
    }
}

/// Run an operation that reads model artifacts on the blocking pool
async fn blocking<T, F>(operation: F) -> Result<T, Status>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|e| Error::Internal(format!("request task failed: {}", e)).into())
}

/// Empty bodies decode to the request's defaults
fn decode<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, Status> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| Status::invalid_argument(format!("Invalid JSON: {}", e)))
}

fn encode<T: Serialize>(response: &T) -> Result<Bytes, Status> {
    serde_json::to_vec(response)
        .map(Bytes::from)
        .map_err(|e| Status::internal(format!("Failed to encode response: {}", e)))
}

#[tonic::async_trait]
impl FlightService for AiEngineFlightService {
    type HandshakeStream = Pin<Box<dyn Stream<Item = Result<HandshakeResponse, Status>> + Send>>;
    type ListFlightsStream = Pin<Box<dyn Stream<Item = Result<FlightInfo, Status>> + Send>>;
    type DoGetStream = Pin<Box<dyn Stream<Item = Result<FlightData, Status>> + Send>>;
    type DoPutStream = Pin<Box<dyn Stream<Item = Result<PutResult, Status>> + Send>>;
    type DoActionStream = Pin<Box<dyn Stream<Item = Result<arrow_flight::Result, Status>> + Send>>;
    type ListActionsStream = Pin<Box<dyn Stream<Item = Result<ActionType, Status>> + Send>>;
    type DoExchangeStream = Pin<Box<dyn Stream<Item = Result<FlightData, Status>> + Send>>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("Handshake not supported"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        Err(Status::unimplemented("ListFlights not supported"))
    }

    async fn get_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        Err(Status::unimplemented("GetFlightInfo not supported"))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("PollFlightInfo not supported"))
    }

    async fn get_schema(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        Err(Status::unimplemented("GetSchema not supported"))
    }

    async fn do_get(&self, _request: Request<Ticket>) -> Result<Response<Self::DoGetStream>, Status> {
        Err(Status::unimplemented("DoGet not supported"))
    }

    async fn do_put(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        Err(Status::unimplemented("DoPut not supported"))
    }

    async fn do_exchange(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        Err(Status::unimplemented("DoExchange not supported"))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        let actions = ACTIONS.iter().map(|(name, description)| {
            Ok(ActionType {
                r#type: name.to_string(),
                description: description.to_string(),
            })
        });
        let actions: Vec<_> = actions.collect();
        Ok(Response::new(Box::pin(stream::iter(actions))))
    }

    async fn do_action(
        &self,
        request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        let action = request.into_inner();
        debug!(action = %action.r#type, bytes = action.body.len(), "Handling action");

        let body = self.handle_action(&action).await?;
        let result = arrow_flight::Result { body };
        Ok(Response::new(Box::pin(stream::iter(vec![Ok(result)]))))
    }
}
