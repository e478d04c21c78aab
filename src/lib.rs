//! Per-pod training orchestration engine.
//!
//! Pods are declared with `Init`, fed CSV observations with `AddData` and
//! trained in the background with `StartTraining`. Trained models answer
//! `GetInference` and can be moved between engines with `ExportModel` and
//! `ImportModel`. All operations are served as Arrow Flight actions.
//!
//! State-mutating work flows through a single command queue drained by one
//! event loop; training runs off the request path under a single-flight
//! dispatcher.

pub mod agents;
pub mod cli;
pub mod config;
pub mod connector;
pub mod data;
pub mod engine;
pub mod error;
pub mod inference;
pub mod queue;
pub mod registry;
pub mod reward;
pub mod service;
pub mod shutdown;
pub mod training;

pub use config::Settings;
pub use engine::{Engine, EngineBuilder};
pub use error::{Error, Result};
pub use service::{AiEngine, AiEngineFlightService};
pub use shutdown::{ShutdownCoordinator, ShutdownReason};
