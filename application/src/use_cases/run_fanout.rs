//! Run Fanout use case
//!
//! Orchestrates one fan-out run: normalizes the branch-set description,
//! dispatches every branch concurrently under the admission cap, races
//! the overall deadline, and aggregates settled outcomes into the final
//! report.
//!
//! Per-branch state machine: Queued -> Admitted -> Settled. Admission
//! goes through a FIFO-fair semaphore; a queued branch whose run is
//! cancelled settles as `Cancelled` without ever being admitted. The
//! caller receives exactly one of {structured report, single error} -
//! on overall timeout, partial results are discarded, and the deadline
//! wins over any fail-fast cancellation racing it.

use crate::ports::branch_gateway::BranchGateway;
use crate::ports::progress::{FanoutProgress, NoProgress};
use crate::use_cases::invoke_branch::{SharedRun, invoke_branch};
use fanout_domain::{
    BranchOutcome, BranchSpec, BranchTiming, ConfigError, FailurePolicy, ReturnSelection,
    RunContext, RunReport, aggregate, normalize_branches,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors that escape the orchestrator as a whole. Everything
/// branch-local is recovered into a Failure outcome instead.
#[derive(Error, Debug)]
pub enum RunFanoutError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Overall timeout after {0}ms")]
    OverallTimeout(u64),
}

/// Input for the RunFanout use case.
#[derive(Debug, Clone)]
pub struct RunFanoutInput {
    /// Raw branch-set description: id array, record array, or label map,
    /// possibly still a textual blob.
    pub branch_set: Value,
    /// Input text substituted for `{{input}}`.
    pub input: String,
    /// Runtime vars: the `{{$vars.*}}` scope for normalization and the
    /// `{{vars.*}}` scope for templates.
    pub input_vars: Map<String, Value>,
    /// Run-level question template.
    pub question_template: String,
    /// Run-level bearer token fallback.
    pub default_credential: Option<String>,
    /// Admission cap; 0 means "as many as there are branches".
    pub concurrency_cap: usize,
    /// Overall wall-clock budget; `None` or 0 means unbounded.
    pub overall_timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
    pub return_selection: ReturnSelection,
    /// Whether the `pretty` timing block is rendered.
    pub emit_timing: bool,
}

impl RunFanoutInput {
    pub fn new(branch_set: Value, input: impl Into<String>) -> Self {
        Self {
            branch_set,
            input: input.into(),
            input_vars: Map::new(),
            question_template: "{{input}}".to_string(),
            default_credential: None,
            concurrency_cap: 0,
            overall_timeout_ms: None,
            failure_policy: FailurePolicy::default(),
            return_selection: ReturnSelection::default(),
            emit_timing: true,
        }
    }

    /// Split a raw tool input into text and vars: a JSON object
    /// `{"input": ..., "vars": {...}}` is unpacked, anything else is
    /// treated as plain question text.
    pub fn parse_tool_input(raw: &str) -> (String, Map<String, Value>) {
        if let Ok(Value::Object(payload)) = serde_json::from_str::<Value>(raw) {
            let input = payload
                .get("input")
                .and_then(Value::as_str)
                .unwrap_or(raw)
                .to_string();
            let vars = match payload.get("vars") {
                Some(Value::Object(vars)) => vars.clone(),
                _ => Map::new(),
            };
            return (input, vars);
        }
        (raw.to_string(), Map::new())
    }

    pub fn with_vars(mut self, vars: Map<String, Value>) -> Self {
        self.input_vars = vars;
        self
    }

    pub fn with_question_template(mut self, template: impl Into<String>) -> Self {
        self.question_template = template.into();
        self
    }

    pub fn with_default_credential(mut self, credential: impl Into<String>) -> Self {
        self.default_credential = Some(credential.into());
        self
    }

    pub fn with_concurrency_cap(mut self, cap: usize) -> Self {
        self.concurrency_cap = cap;
        self
    }

    pub fn with_overall_timeout_ms(mut self, ms: u64) -> Self {
        self.overall_timeout_ms = Some(ms);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_return_selection(mut self, selection: ReturnSelection) -> Self {
        self.return_selection = selection;
        self
    }

    pub fn without_timing(mut self) -> Self {
        self.emit_timing = false;
        self
    }
}

/// Use case for running a fan-out orchestration.
pub struct RunFanoutUseCase<G: BranchGateway + 'static> {
    gateway: Arc<G>,
}

impl<G: BranchGateway + 'static> RunFanoutUseCase<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Execute the use case with default (no-op) progress.
    pub async fn execute(&self, input: RunFanoutInput) -> Result<RunReport, RunFanoutError> {
        self.execute_with_progress(input, &NoProgress).await
    }

    /// Execute the use case with progress callbacks.
    pub async fn execute_with_progress(
        &self,
        input: RunFanoutInput,
        progress: &dyn FanoutProgress,
    ) -> Result<RunReport, RunFanoutError> {
        let specs = normalize_branches(&input.branch_set, &input.input_vars)?;

        let cap = if input.concurrency_cap == 0 {
            specs.len()
        } else {
            input.concurrency_cap
        };
        let context = RunContext::new(cap, input.overall_timeout_ms, input.failure_policy);

        info!(
            correlation_id = %context.correlation_id,
            branches = specs.len(),
            cap = context.concurrency_cap,
            policy = ?context.failure_policy,
            "Starting fan-out run"
        );
        progress.on_run_start(specs.len());

        let run_start = Instant::now();
        let shared = Arc::new(SharedRun {
            deadline: context
                .overall_timeout_ms
                .map(|ms| run_start + Duration::from_millis(ms)),
            context,
            question_template: input.question_template,
            input: input.input,
            input_vars: input.input_vars,
            default_credential: input.default_credential,
            run_start,
        });

        // The only mutable state shared across branch tasks: the
        // admission semaphore and the set-once cancellation signal.
        let token = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(shared.context.concurrency_cap));

        let mut join_set = JoinSet::new();
        for (index, spec) in specs.iter().enumerate() {
            join_set.spawn(run_branch(
                Arc::clone(&self.gateway),
                index,
                spec.clone(),
                Arc::clone(&shared),
                Arc::clone(&semaphore),
                token.clone(),
            ));
        }

        let settled = match shared.context.overall_timeout_ms {
            Some(budget_ms) => {
                let gathered = tokio::time::timeout(
                    Duration::from_millis(budget_ms),
                    gather_outcomes(&mut join_set, &specs, &shared, progress),
                )
                .await;
                match gathered {
                    Ok(outcomes) => outcomes,
                    Err(_) => {
                        warn!(
                            correlation_id = %shared.context.correlation_id,
                            budget_ms,
                            "Overall deadline fired, aborting run"
                        );
                        token.cancel();
                        join_set.abort_all();
                        return Err(RunFanoutError::OverallTimeout(budget_ms));
                    }
                }
            }
            None => gather_outcomes(&mut join_set, &specs, &shared, progress).await,
        };

        let report = aggregate(&settled, input.return_selection, input.emit_timing);
        info!(
            correlation_id = %shared.context.correlation_id,
            total_ms = report.timing.total_ms,
            successes = report.reports.len(),
            failures = report.errors.len(),
            speedup = report.timing.speedup_factor,
            "Fan-out run complete"
        );
        progress.on_run_complete(report.timing.total_ms);
        Ok(report)
    }
}

/// One branch task: wait for admission (or cancellation), invoke, settle.
/// The permit is freed on every path by dropping at scope end.
async fn run_branch<G: BranchGateway + 'static>(
    gateway: Arc<G>,
    index: usize,
    spec: BranchSpec,
    shared: Arc<SharedRun>,
    semaphore: Arc<Semaphore>,
    token: CancellationToken,
) -> (usize, BranchOutcome) {
    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = Arc::clone(&semaphore).acquire_owned() => permit.ok(),
    };

    let Some(_permit) = permit else {
        debug!(label = %spec.label, "Branch cancelled before admission");
        let outcome = BranchOutcome::cancelled(
            &spec.label,
            "cancelled (fail-fast)",
            BranchTiming::unstarted(chrono::Utc::now().timestamp_millis(), shared.rel_now_ms()),
        );
        return (index, outcome);
    };

    let outcome = invoke_branch(gateway.as_ref(), &spec, &shared, &token).await;
    (index, outcome)
}

/// Collect settled outcomes back into declaration order.
async fn gather_outcomes(
    join_set: &mut JoinSet<(usize, BranchOutcome)>,
    specs: &[BranchSpec],
    shared: &SharedRun,
    progress: &dyn FanoutProgress,
) -> Vec<BranchOutcome> {
    let mut slots: Vec<Option<BranchOutcome>> = vec![None; specs.len()];

    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, outcome)) => {
                if outcome.is_success() {
                    info!(label = %outcome.label(), elapsed_ms = outcome.elapsed_ms(), "Branch settled");
                } else {
                    warn!(label = %outcome.label(), elapsed_ms = outcome.elapsed_ms(), "Branch failed");
                }
                progress.on_branch_settled(
                    outcome.label(),
                    outcome.is_success(),
                    outcome.elapsed_ms(),
                );
                slots[index] = Some(outcome);
            }
            Err(e) => {
                warn!("Branch task join error: {e}");
            }
        }
    }

    // Every submitted branch settles exactly once, even if its task
    // never produced an outcome.
    for (index, slot) in slots.iter_mut().enumerate() {
        if slot.is_none() {
            *slot = Some(BranchOutcome::cancelled(
                &specs[index].label,
                "branch task aborted",
                BranchTiming::unstarted(chrono::Utc::now().timestamp_millis(), shared.rel_now_ms()),
            ));
        }
    }
    slots.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::branch_gateway::{BranchReply, BranchRequest, GatewayError};
    use async_trait::async_trait;
    use fanout_domain::FailureKind;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum MockReply {
        Status(u16),
        Network,
    }

    #[derive(Clone)]
    struct MockBranch {
        latency_ms: u64,
        reply: MockReply,
    }

    /// Scripted gateway: per-id latency and reply, plus an in-flight
    /// high-water mark to observe the admission cap.
    struct MockGateway {
        branches: HashMap<String, MockBranch>,
        invocations: AtomicUsize,
        in_flight: AtomicUsize,
        high_water: AtomicUsize,
    }

    impl MockGateway {
        fn new() -> Self {
            Self {
                branches: HashMap::new(),
                invocations: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                high_water: AtomicUsize::new(0),
            }
        }

        fn with_branch(mut self, id: &str, latency_ms: u64, status: u16) -> Self {
            self.branches.insert(
                id.to_string(),
                MockBranch {
                    latency_ms,
                    reply: MockReply::Status(status),
                },
            );
            self
        }

        fn with_network_failure(mut self, id: &str, latency_ms: u64) -> Self {
            self.branches.insert(
                id.to_string(),
                MockBranch {
                    latency_ms,
                    reply: MockReply::Network,
                },
            );
            self
        }
    }

    #[async_trait]
    impl BranchGateway for MockGateway {
        async fn invoke(&self, request: &BranchRequest) -> Result<BranchReply, GatewayError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);

            let branch = self
                .branches
                .get(&request.branch_id)
                .cloned()
                .unwrap_or(MockBranch {
                    latency_ms: 0,
                    reply: MockReply::Status(200),
                });
            tokio::time::sleep(Duration::from_millis(branch.latency_ms)).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            match branch.reply {
                MockReply::Network => Err(GatewayError::Network("connection refused".to_string())),
                MockReply::Status(status) => Ok(BranchReply {
                    status,
                    body: json!({
                        "text": format!("answer from {}", request.branch_id),
                        "json": { "id": request.branch_id },
                        "sessionId": request.session_id,
                    }),
                }),
            }
        }
    }

    fn use_case(gateway: MockGateway) -> (Arc<MockGateway>, RunFanoutUseCase<MockGateway>) {
        let gateway = Arc::new(gateway);
        (Arc::clone(&gateway), RunFanoutUseCase::new(Arc::clone(&gateway)))
    }

    // ==================== Scenario Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_scenario_a_uniform_parallel() {
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 100, 200)
                .with_branch("Y", 100, 200)
                .with_branch("Z", 100, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q").with_concurrency_cap(3);

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.reports.len(), 3);
        assert_eq!(report.errors.len(), 0);
        assert_eq!(report.timing.total_ms, 100);
        assert_eq!(report.timing.sum_ms, 300);
        assert_eq!(report.timing.max_ms, 100);
        assert_eq!(report.timing.speedup_factor, 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_b_single_http_failure_under_continue() {
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 100, 200)
                .with_branch("Y", 100, 500)
                .with_branch("Z", 100, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q");

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.reports.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].kind, FailureKind::HttpStatus);
        assert_eq!(report.errors[0].status, Some(500));
        assert_eq!(report.errors[0].label, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_c_fail_fast_cancels_queued_siblings() {
        // Cap 1: the 500 settles before B and C are ever admitted.
        let (gateway, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 10, 500)
                .with_branch("Y", 100, 200)
                .with_branch("Z", 100, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q")
            .with_concurrency_cap(1)
            .with_failure_policy(FailurePolicy::FailFast);

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.reports.len() + report.errors.len(), 3);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].kind, FailureKind::HttpStatus);
        assert_eq!(report.errors[1].kind, FailureKind::Cancelled);
        assert_eq!(report.errors[2].kind, FailureKind::Cancelled);
        // Never-admitted branches show zero elapsed and one invocation
        // ever reached the gateway.
        assert_eq!(report.errors[1].elapsed_ms, 0);
        assert_eq!(report.errors[2].elapsed_ms, 0);
        assert_eq!(gateway.invocations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_d_overall_timeout_returns_single_error() {
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 500, 200)
                .with_branch("Y", 500, 200)
                .with_branch("Z", 500, 200),
        );
        let input =
            RunFanoutInput::new(json!(["X", "Y", "Z"]), "q").with_overall_timeout_ms(50);

        let started = Instant::now();
        let result = uc.execute(input).await;
        assert!(matches!(result, Err(RunFanoutError::OverallTimeout(50))));
        // The deadline fires at ~50ms, not at branch completion (~500ms).
        assert_eq!(started.elapsed(), Duration::from_millis(50));
    }

    // ==================== Property Tests ====================

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_never_exceeded() {
        let mut gateway = MockGateway::new();
        for id in ["a", "b", "c", "d", "e", "f"] {
            gateway = gateway.with_branch(id, 100, 200);
        }
        let (gateway, uc) = use_case(gateway);
        let input = RunFanoutInput::new(json!(["a", "b", "c", "d", "e", "f"]), "q")
            .with_concurrency_cap(2);

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.reports.len(), 6);
        assert!(gateway.high_water.load(Ordering::SeqCst) <= 2);
        // 6 branches of 100ms through 2 slots: 3 serial waves.
        assert_eq!(report.timing.total_ms, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_policy_settles_every_branch() {
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 50, 200)
                .with_network_failure("Y", 20)
                .with_branch("Z", 80, 503),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q");

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.reports.len() + report.errors.len(), 3);
        let kinds: Vec<_> = report.errors.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&FailureKind::Network));
        assert!(kinds.contains(&FailureKind::HttpStatus));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_aborts_in_flight_siblings() {
        // All three admitted at once; the failure at 50ms aborts the
        // two siblings mid-call instead of letting them run to 100ms.
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 50, 500)
                .with_branch("Y", 100, 200)
                .with_branch("Z", 100, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q")
            .with_failure_policy(FailurePolicy::FailFast);

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.reports.len(), 0);
        assert_eq!(report.errors.len(), 3);
        assert_eq!(report.errors[0].kind, FailureKind::HttpStatus);
        assert_eq!(report.errors[1].kind, FailureKind::Cancelled);
        assert_eq!(report.errors[2].kind, FailureKind::Cancelled);
        // Aborted siblings keep their real in-flight time and the run
        // ends at the failure, not at the siblings' full latency.
        assert_eq!(report.errors[1].elapsed_ms, 50);
        assert_eq!(report.errors[2].elapsed_ms, 50);
        assert_eq!(report.timing.total_ms, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_timeout_beats_fail_fast() {
        // Both the failing branch (100ms) and the deadline (50ms) want to
        // end this run; the deadline wins and discards the partial report.
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 100, 500)
                .with_branch("Y", 400, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y"]), "q")
            .with_failure_policy(FailurePolicy::FailFast)
            .with_overall_timeout_ms(50);

        let result = uc.execute(input).await;
        assert!(matches!(result, Err(RunFanoutError::OverallTimeout(50))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_outcomes_keep_declaration_order() {
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 300, 200)
                .with_branch("Y", 100, 200)
                .with_branch("Z", 200, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q").with_concurrency_cap(3);

        let report = uc.execute(input).await.unwrap();
        let labels: Vec<_> = report.reports.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, ["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serial_run_speedup_near_one() {
        let (_, uc) = use_case(
            MockGateway::new()
                .with_branch("X", 100, 200)
                .with_branch("Y", 100, 200)
                .with_branch("Z", 100, 200),
        );
        let input = RunFanoutInput::new(json!(["X", "Y", "Z"]), "q").with_concurrency_cap(1);

        let report = uc.execute(input).await.unwrap();
        assert_eq!(report.timing.total_ms, 300);
        assert_eq!(report.timing.speedup_factor, 1.0);
    }

    #[tokio::test]
    async fn test_config_error_before_any_dispatch() {
        let (gateway, uc) = use_case(MockGateway::new());
        let input = RunFanoutInput::new(json!([]), "q");

        let result = uc.execute(input).await;
        assert!(matches!(
            result,
            Err(RunFanoutError::Config(ConfigError::NoBranches))
        ));
        assert_eq!(gateway.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_ids_scoped_per_branch() {
        let (_, uc) = use_case(MockGateway::new().with_branch("X", 10, 200));
        let input = RunFanoutInput::new(json!({ "lead": "X" }), "q");

        let report = uc.execute(input).await.unwrap();
        let session_id = report.reports[0].session_id.as_deref().unwrap();
        assert!(session_id.ends_with("-lead"));
    }

    // ==================== Tool Input Tests ====================

    #[test]
    fn test_parse_tool_input_json_payload() {
        let (input, vars) =
            RunFanoutInput::parse_tool_input(r#"{"input": "hi", "vars": {"role": "B"}}"#);
        assert_eq!(input, "hi");
        assert_eq!(vars["role"], json!("B"));
    }

    #[test]
    fn test_parse_tool_input_plain_text() {
        let (input, vars) = RunFanoutInput::parse_tool_input("just a question");
        assert_eq!(input, "just a question");
        assert!(vars.is_empty());
    }
}
