//! HTTP adapters.

mod prediction_gateway;

pub use prediction_gateway::PredictionGateway;
