//! Branch outcome value objects - one settled result per submitted branch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a branch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transport-level failure: connection refused, DNS, broken pipe.
    Network,
    /// Response received with a status outside the success range.
    HttpStatus,
    /// The per-branch deadline elapsed before a response.
    Timeout,
    /// Policy- or deadline-induced: the branch was never allowed to run,
    /// or was asked to abort mid-flight.
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::Network => "network",
            FailureKind::HttpStatus => "http_status",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// When a branch ran, in wall-clock and run-relative terms.
///
/// `rel_start_ms` / `rel_end_ms` are measured from the run start and
/// feed the timeline rendering; a branch that never started carries
/// `elapsed_ms == 0` with equal relative endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BranchTiming {
    /// Wall-clock start (epoch milliseconds).
    pub started_at_ms: i64,
    /// Wall-clock end (epoch milliseconds).
    pub ended_at_ms: i64,
    /// Duration the branch was actually in flight.
    pub elapsed_ms: u64,
    /// Start relative to the run start.
    pub rel_start_ms: u64,
    /// End relative to the run start.
    pub rel_end_ms: u64,
}

impl BranchTiming {
    /// Timing for a branch that settled without ever starting.
    pub fn unstarted(now_ms: i64, rel_now_ms: u64) -> Self {
        Self {
            started_at_ms: now_ms,
            ended_at_ms: now_ms,
            elapsed_ms: 0,
            rel_start_ms: rel_now_ms,
            rel_end_ms: rel_now_ms,
        }
    }
}

/// Settled result of one branch. Exactly one is produced per submitted
/// [`BranchSpec`](super::spec::BranchSpec), in all cases - branches that
/// never start still settle as `Cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BranchOutcome {
    Success {
        /// Correlation tag of the branch.
        label: String,
        /// HTTP status of the successful response.
        status: u16,
        /// Response text, empty when absent.
        text: String,
        /// Structured payload, `{}` when absent.
        json: Value,
        /// Source documents cited by the subflow.
        source_documents: Vec<Value>,
        /// Tools the subflow reports having used.
        used_tools: Vec<Value>,
        /// Remote session id, if the subflow echoed one.
        session_id: Option<String>,
        timing: BranchTiming,
    },
    Failure {
        /// Correlation tag of the branch.
        label: String,
        kind: FailureKind,
        /// Human-readable reason, distinct per kind so callers can tell
        /// "genuinely failed" from "never allowed to run".
        message: String,
        /// HTTP status, present for `HttpStatus` failures.
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// Response body preserved verbatim for diagnostics.
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<Value>,
        timing: BranchTiming,
    },
}

impl BranchOutcome {
    /// A cancelled outcome for a branch that never ran.
    pub fn cancelled(label: impl Into<String>, message: impl Into<String>, timing: BranchTiming) -> Self {
        BranchOutcome::Failure {
            label: label.into(),
            kind: FailureKind::Cancelled,
            message: message.into(),
            status: None,
            body: None,
            timing,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            BranchOutcome::Success { label, .. } | BranchOutcome::Failure { label, .. } => label,
        }
    }

    pub fn timing(&self) -> &BranchTiming {
        match self {
            BranchOutcome::Success { timing, .. } | BranchOutcome::Failure { timing, .. } => timing,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.timing().elapsed_ms
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BranchOutcome::Success { .. })
    }

    /// True for the failure kinds that trip the fail-fast signal
    /// (everything except `Cancelled`, which is an effect of the signal,
    /// never a cause).
    pub fn trips_fail_fast(&self) -> bool {
        matches!(
            self,
            BranchOutcome::Failure { kind, .. } if *kind != FailureKind::Cancelled
        )
    }
}
