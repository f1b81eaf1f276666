//! Branch specification value object.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-branch budget applied when the description carries none (or a
/// non-positive one).
pub const DEFAULT_BRANCH_TIMEOUT_MS: u64 = 120_000;

/// One configured remote computation to run in parallel.
///
/// Invariants (enforced by the normalizer): `id` is non-empty, labels
/// are unique within a run, `timeout_ms` is positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Opaque target identifier, substituted into `/prediction/{id}`.
    pub id: String,
    /// Display/correlation tag, unique within a run.
    pub label: String,
    /// Per-branch time budget in milliseconds.
    pub timeout_ms: u64,
    /// Bearer token override; falls back to the run-level default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    /// Name->value pairs merged into the request template's scope.
    #[serde(default)]
    pub vars: Map<String, Value>,
    /// Per-branch override of the run-level question template.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_template: Option<String>,
}

impl BranchSpec {
    /// Create a spec with derived label and default timeout.
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            timeout_ms: DEFAULT_BRANCH_TIMEOUT_MS,
            credential: None,
            vars: Map::new(),
            question_template: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = if timeout_ms > 0 {
            timeout_ms
        } else {
            DEFAULT_BRANCH_TIMEOUT_MS
        };
        self
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_vars(mut self, vars: Map<String, Value>) -> Self {
        self.vars = vars;
        self
    }

    pub fn with_question_template(mut self, template: impl Into<String>) -> Self {
        self.question_template = Some(template.into());
        self
    }
}

/// Default label for a branch derived from its id: first six
/// characters, matching the original tool's correlation tags.
pub fn derive_id_label(id: &str) -> String {
    id.chars().take(6).collect()
}

/// Letter-sequence label for position `index`: A, B, ... Z, AA, AB, ...
pub fn derive_letter_label(index: usize) -> String {
    let mut n = index;
    let mut label = String::new();
    loop {
        label.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    label
}
