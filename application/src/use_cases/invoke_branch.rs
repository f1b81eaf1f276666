//! Branch Invoker - executes one branch's remote call.
//!
//! Renders the outbound request from the question template, applies the
//! per-branch timeout capped by the remaining overall budget, and
//! classifies the result into a [`BranchOutcome`]. Classification order
//! (first match wins):
//!
//! 1. cancellation signal already set -> `Cancelled`, zero elapsed
//! 2. transport failure -> `Network`
//! 3. deadline elapsed -> `Timeout`
//! 4. non-2xx status -> `HttpStatus` (status + body preserved)
//! 5. otherwise -> `Success`, missing body fields default to empty
//!
//! Under fail-fast, any failure of kinds 2-4 sets the shared
//! cancellation signal before returning: queued siblings are never
//! admitted, and in-flight siblings abort mid-call (the timed call
//! races the signal), settling as `Cancelled` with their real elapsed
//! time.

use crate::ports::branch_gateway::{BranchGateway, BranchReply, BranchRequest, GatewayError};
use fanout_domain::{
    BranchOutcome, BranchSpec, BranchTiming, FailureKind, RunContext, render_template,
};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Run-wide state shared by every branch task.
pub(crate) struct SharedRun {
    pub context: RunContext,
    /// Run-level question template; `{{input}}` by default.
    pub question_template: String,
    /// Raw input text substituted for `{{input}}`.
    pub input: String,
    /// Runtime vars exposed to templates as `{{vars.*}}`.
    pub input_vars: Map<String, Value>,
    /// Run-level bearer token fallback.
    pub default_credential: Option<String>,
    /// Monotonic run start; all relative timings derive from this.
    pub run_start: Instant,
    /// Monotonic overall deadline, when a budget is configured.
    pub deadline: Option<Instant>,
}

impl SharedRun {
    pub(crate) fn rel_now_ms(&self) -> u64 {
        self.run_start.elapsed().as_millis() as u64
    }
}

/// Invoke one admitted branch and settle it.
pub(crate) async fn invoke_branch<G: BranchGateway + ?Sized>(
    gateway: &G,
    spec: &BranchSpec,
    run: &SharedRun,
    token: &CancellationToken,
) -> BranchOutcome {
    // Rule 1: signal set before the call started.
    if token.is_cancelled() {
        return BranchOutcome::cancelled(
            &spec.label,
            "cancelled (fail-fast)",
            BranchTiming::unstarted(chrono::Utc::now().timestamp_millis(), run.rel_now_ms()),
        );
    }

    let request = build_request(spec, run);
    let effective_timeout = effective_timeout(spec, run);

    let started_at_ms = chrono::Utc::now().timestamp_millis();
    let rel_start_ms = run.rel_now_ms();
    let started = Instant::now();

    // The timed call also races the cancellation signal so an in-flight
    // branch aborts as soon as a fail-fast sibling trips it.
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = tokio::time::timeout(effective_timeout, gateway.invoke(&request)) => Some(result),
    };

    let timing = BranchTiming {
        started_at_ms,
        ended_at_ms: chrono::Utc::now().timestamp_millis(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        rel_start_ms,
        rel_end_ms: run.rel_now_ms(),
    };

    let outcome = match result {
        None => failure(
            spec,
            FailureKind::Cancelled,
            "aborted (fail-fast)".to_string(),
            None,
            None,
            timing,
        ),
        Some(Err(_)) => failure(
            spec,
            FailureKind::Timeout,
            format!("timed out after {}ms", effective_timeout.as_millis()),
            None,
            None,
            timing,
        ),
        Some(Ok(Err(GatewayError::Timeout))) => failure(
            spec,
            FailureKind::Timeout,
            "transport timed out".to_string(),
            None,
            None,
            timing,
        ),
        Some(Ok(Err(GatewayError::Network(message)))) => {
            failure(spec, FailureKind::Network, message, None, None, timing)
        }
        Some(Ok(Ok(reply))) if !reply.is_success() => {
            let message = http_error_message(&reply);
            failure(
                spec,
                FailureKind::HttpStatus,
                message,
                Some(reply.status),
                Some(reply.body),
                timing,
            )
        }
        Some(Ok(Ok(reply))) => success(spec, reply, timing),
    };

    if run.context.failure_policy.is_fail_fast() && outcome.trips_fail_fast() {
        warn!(
            label = %spec.label,
            "Branch failed under fail-fast policy, cancelling siblings"
        );
        token.cancel();
    }

    outcome
}

/// Render the question and assemble the outbound request.
fn build_request(spec: &BranchSpec, run: &SharedRun) -> BranchRequest {
    // Branch vars carry the run id and label so subflows can correlate.
    let mut branch_vars = spec.vars.clone();
    branch_vars.insert(
        "runId".to_string(),
        json!(run.context.correlation_id.as_str()),
    );
    branch_vars.insert("label".to_string(), json!(spec.label));

    // Template scope: {{input}}, {{vars.*}} from the runtime vars, and
    // branch vars spread at the top level.
    let mut scope = Map::new();
    scope.insert("input".to_string(), json!(run.input));
    scope.insert("vars".to_string(), Value::Object(run.input_vars.clone()));
    for (key, value) in &branch_vars {
        scope.insert(key.clone(), value.clone());
    }

    let template = spec
        .question_template
        .as_deref()
        .unwrap_or(&run.question_template);
    let question = render_template(template, &Value::Object(scope));
    debug!(label = %spec.label, id = %spec.id, "Rendered branch question");

    BranchRequest {
        branch_id: spec.id.clone(),
        question,
        session_id: run.context.correlation_id.session_id(&spec.label),
        vars: branch_vars,
        credential: spec
            .credential
            .clone()
            .or_else(|| run.default_credential.clone()),
    }
}

/// Per-branch budget capped by whatever remains of the overall budget.
fn effective_timeout(spec: &BranchSpec, run: &SharedRun) -> Duration {
    let branch_budget = Duration::from_millis(spec.timeout_ms);
    match run.deadline {
        Some(deadline) => branch_budget.min(deadline.saturating_duration_since(Instant::now())),
        None => branch_budget,
    }
}

fn http_error_message(reply: &BranchReply) -> String {
    reply
        .body
        .get("message")
        .or_else(|| reply.body.get("error"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", reply.status))
}

fn failure(
    spec: &BranchSpec,
    kind: FailureKind,
    message: String,
    status: Option<u16>,
    body: Option<Value>,
    timing: BranchTiming,
) -> BranchOutcome {
    BranchOutcome::Failure {
        label: spec.label.clone(),
        kind,
        message,
        status,
        body,
        timing,
    }
}

/// Read the success fields off the reply body; absence of any field is
/// tolerated and defaults to empty, never to an error.
fn success(spec: &BranchSpec, reply: BranchReply, timing: BranchTiming) -> BranchOutcome {
    let body = &reply.body;
    BranchOutcome::Success {
        label: spec.label.clone(),
        status: reply.status,
        text: body
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        json: body.get("json").cloned().unwrap_or_else(|| json!({})),
        source_documents: body
            .get("sourceDocuments")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        used_tools: body
            .get("usedTools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        session_id: body
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        timing,
    }
}
