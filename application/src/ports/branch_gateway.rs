//! Branch Gateway port
//!
//! Defines the interface for invoking one remote branch computation.
//! Implementations (adapters) live in the infrastructure layer.

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

/// Transport-level errors from a branch invocation.
///
/// Note the deliberate asymmetry with the outcome taxonomy: a non-2xx
/// response is NOT a gateway error - classification of status codes
/// belongs to the invoker, so the gateway returns such replies as `Ok`
/// with the body preserved.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,
}

/// Fully rendered outbound call for one branch.
#[derive(Debug, Clone)]
pub struct BranchRequest {
    /// Target identifier, substituted into `/prediction/{id}`.
    pub branch_id: String,
    /// Rendered question text.
    pub question: String,
    /// `{correlation_id}-{label}`, keeps branch sessions distinct.
    pub session_id: String,
    /// Variables forwarded in `overrideConfig.vars`.
    pub vars: Map<String, Value>,
    /// Bearer token, already resolved through the per-branch ->
    /// run-default fallback chain. `None` sends no auth header.
    pub credential: Option<String>,
}

/// Raw reply from a branch target.
#[derive(Debug, Clone)]
pub struct BranchReply {
    pub status: u16,
    /// Body parsed as JSON; unparseable bodies arrive as `{"raw": text}`.
    pub body: Value,
}

impl BranchReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Gateway for branch invocation.
#[async_trait]
pub trait BranchGateway: Send + Sync {
    /// Issue one branch call and return the raw reply.
    async fn invoke(&self, request: &BranchRequest) -> Result<BranchReply, GatewayError>;
}
