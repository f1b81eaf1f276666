//! # Infrastructure Layer
//!
//! External adapters for subflow-fanout: the HTTP prediction gateway
//! that implements the application's `BranchGateway` port, and the
//! TOML configuration loader.

pub mod config;
pub mod http;

pub use config::{ConfigLoader, FileConfig};
pub use http::PredictionGateway;
