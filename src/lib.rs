pub mod app;
pub mod gateway;
pub mod infra;
mod shared;

pub use gateway::errors::{GatewayError, TransportError};
pub use gateway::WorkloadGateway;
pub use infra::settings::GatewaySettings;
