//! HTTP prediction gateway
//!
//! Implements the `BranchGateway` port over the prediction REST API:
//! `POST {base_url}/prediction/{branch_id}` with a JSON body carrying
//! the question, the per-branch session id and forwarded vars.
//!
//! No timeout lives here: the invoker wraps each call in its own
//! budget. Only transport-level timeouts surface as `GatewayError::Timeout`.

use async_trait::async_trait;
use fanout_application::{BranchGateway, BranchReply, BranchRequest, GatewayError};
use serde_json::{Value, json};
use tracing::debug;

/// Gateway adapter speaking the prediction wire protocol.
pub struct PredictionGateway {
    client: reqwest::Client,
    base_url: String,
}

impl PredictionGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Endpoint URL for one branch; the id travels as a single encoded
    /// path segment.
    fn endpoint(&self, branch_id: &str) -> Result<reqwest::Url, GatewayError> {
        let base = self.base_url.trim_end_matches('/');
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| GatewayError::Network(format!("invalid base URL '{base}': {e}")))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Network(format!("base URL '{base}' cannot hold a path")))?
            .pop_if_empty()
            .push("prediction")
            .push(branch_id);
        Ok(url)
    }
}

/// Outbound JSON body for one branch call.
fn request_body(request: &BranchRequest) -> Value {
    json!({
        "question": request.question,
        "streaming": false,
        "overrideConfig": {
            "sessionId": request.session_id,
            "vars": request.vars,
        }
    })
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout
    } else {
        GatewayError::Network(e.to_string())
    }
}

#[async_trait]
impl BranchGateway for PredictionGateway {
    async fn invoke(&self, request: &BranchRequest) -> Result<BranchReply, GatewayError> {
        let url = self.endpoint(&request.branch_id)?;
        debug!(branch_id = %request.branch_id, url = %url, "Dispatching prediction request");

        let mut outbound = self.client.post(url).json(&request_body(request));
        if let Some(credential) = &request.credential {
            outbound = outbound.bearer_auth(credential);
        }

        let response = outbound.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(map_transport_error)?;

        // Any body is acceptable; unparseable text is preserved raw so
        // the invoker can still surface it in failure reports.
        let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({ "raw": text }));
        Ok(BranchReply { status, body })
    }
}
