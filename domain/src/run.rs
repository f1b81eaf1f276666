//! Run-level value objects - context and policy for one fan-out run.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier generated fresh for every run.
///
/// Scopes per-branch session ids: branch sessions are named
/// `{correlation_id}-{label}` so concurrent branches never share a
/// remote session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh correlation id (UUID v4).
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Session id for one branch of this run.
    pub fn session_id(&self, label: &str) -> String {
        format!("{}-{}", self.0, label)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happens to the rest of the run when one branch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Every branch runs to its own completion or timeout, independent
    /// of siblings' outcomes.
    #[default]
    Continue,
    /// The first branch failure cancels all not-yet-admitted siblings.
    /// In-flight siblings are asked to abort, best effort.
    FailFast,
}

impl FailurePolicy {
    pub fn is_fail_fast(&self) -> bool {
        matches!(self, FailurePolicy::FailFast)
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(FailurePolicy::Continue),
            "fail-fast" | "fail_fast" | "failfast" => Ok(FailurePolicy::FailFast),
            other => Err(format!(
                "unknown failure policy '{other}' (expected 'continue' or 'fail-fast')"
            )),
        }
    }
}

/// Which success fields make it into the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnSelection {
    /// Only the response text.
    Text,
    /// Only the structured payload.
    Json,
    /// Text, structured payload, source documents, used tools and
    /// session id.
    #[default]
    Full,
}

impl std::str::FromStr for ReturnSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ReturnSelection::Text),
            "json" => Ok(ReturnSelection::Json),
            "full" => Ok(ReturnSelection::Full),
            other => Err(format!(
                "unknown selection '{other}' (expected 'text', 'json' or 'full')"
            )),
        }
    }
}

/// Immutable context for one orchestration run.
///
/// Created once at run start; only the cancellation signal (owned by the
/// coordinator, not stored here) changes state afterwards.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Fresh identifier for this run.
    pub correlation_id: CorrelationId,
    /// Wall-clock start of the run (epoch milliseconds).
    pub started_at_ms: i64,
    /// Maximum number of branches admitted simultaneously (>= 1).
    pub concurrency_cap: usize,
    /// Overall wall-clock budget. `None` means unbounded.
    pub overall_timeout_ms: Option<u64>,
    /// Failure policy for this run.
    pub failure_policy: FailurePolicy,
}

impl RunContext {
    /// Build a run context, clamping the cap to at least one and
    /// treating a zero overall timeout as unbounded.
    pub fn new(
        concurrency_cap: usize,
        overall_timeout_ms: Option<u64>,
        failure_policy: FailurePolicy,
    ) -> Self {
        Self {
            correlation_id: CorrelationId::generate(),
            started_at_ms: chrono::Utc::now().timestamp_millis(),
            concurrency_cap: concurrency_cap.max(1),
            overall_timeout_ms: overall_timeout_ms.filter(|ms| *ms > 0),
            failure_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_scoping() {
        let id = CorrelationId::generate();
        let session = id.session_id("A");
        assert_eq!(session, format!("{}-A", id.as_str()));
    }

    #[test]
    fn test_correlation_ids_are_unique() {
        assert_ne!(
            CorrelationId::generate().as_str(),
            CorrelationId::generate().as_str()
        );
    }

    #[test]
    fn test_cap_clamped_to_one() {
        let ctx = RunContext::new(0, None, FailurePolicy::Continue);
        assert_eq!(ctx.concurrency_cap, 1);
    }

    #[test]
    fn test_zero_overall_timeout_means_unbounded() {
        let ctx = RunContext::new(4, Some(0), FailurePolicy::Continue);
        assert_eq!(ctx.overall_timeout_ms, None);

        let ctx = RunContext::new(4, Some(50), FailurePolicy::Continue);
        assert_eq!(ctx.overall_timeout_ms, Some(50));
    }

    #[test]
    fn test_policy_from_str() {
        assert_eq!("continue".parse(), Ok(FailurePolicy::Continue));
        assert_eq!("fail-fast".parse(), Ok(FailurePolicy::FailFast));
        assert_eq!("FailFast".parse(), Ok(FailurePolicy::FailFast));
        assert!("sometimes".parse::<FailurePolicy>().is_err());

        assert_eq!("text".parse(), Ok(ReturnSelection::Text));
        assert_eq!("FULL".parse(), Ok(ReturnSelection::Full));
        assert!("everything".parse::<ReturnSelection>().is_err());
    }

    #[test]
    fn test_policy_serde_names() {
        let json = serde_json::to_string(&FailurePolicy::FailFast).unwrap();
        assert_eq!(json, "\"fail-fast\"");
        let json = serde_json::to_string(&ReturnSelection::Text).unwrap();
        assert_eq!(json, "\"text\"");
    }
}
