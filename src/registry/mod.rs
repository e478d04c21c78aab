//! Pod-scoped state shared by the gateway, the event loop and the training
//! dispatcher.

mod model;
mod pod;

pub use model::{ModelRecord, ModelRegistry};
pub use pod::{Pod, PodRegistry};
