//! Service surface of the engine: request handling and its Flight transport.

pub mod flight;
pub mod gateway;
pub mod messages;

pub use flight::AiEngineFlightService;
pub use gateway::AiEngine;
