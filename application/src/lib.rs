//! Application layer for subflow-fanout
//!
//! This crate contains use cases, port definitions, and the orchestration
//! coordinator. It depends only on the domain layer.

pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use ports::{
    branch_gateway::{BranchGateway, BranchReply, BranchRequest, GatewayError},
    progress::{FanoutProgress, NoProgress},
};
pub use use_cases::run_fanout::{RunFanoutError, RunFanoutInput, RunFanoutUseCase};
