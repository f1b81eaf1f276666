//! Raw TOML configuration data types
//!
//! These structs represent the exact structure of the TOML config file.
//! They are deserialized directly; string-typed enum fields have parse
//! helpers that fall back to the domain default on unknown values.
//!
//! Example configuration:
//!
//! ```toml
//! [gateway]
//! base_url = "http://localhost:3000/api/v1"
//! api_key = "sk-..."
//!
//! [run]
//! max_parallel = 4
//! overall_timeout_ms = 300000
//! failure_policy = "fail-fast"
//! select = "text"
//! emit_timing = true
//! ```

use fanout_domain::{FailurePolicy, ReturnSelection};
use serde::{Deserialize, Serialize};

/// Complete file configuration (raw TOML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Prediction endpoint settings
    pub gateway: FileGatewayConfig,
    /// Run-level orchestration settings
    pub run: FileRunConfig,
}

/// `[gateway]` section - where and how branch calls are sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileGatewayConfig {
    /// Base URL of the prediction host; trailing slashes are tolerated.
    pub base_url: String,
    /// Default bearer token, overridable per branch.
    pub api_key: Option<String>,
}

impl Default for FileGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api/v1".to_string(),
            api_key: None,
        }
    }
}

/// `[run]` section - orchestration defaults for every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileRunConfig {
    /// Admission cap; 0 means "one slot per branch".
    pub max_parallel: usize,
    /// Overall wall-clock budget in milliseconds; 0 means unbounded.
    pub overall_timeout_ms: u64,
    /// Failure policy: "continue" or "fail-fast"
    pub failure_policy: String,
    /// Report selection: "text", "json" or "full"
    pub select: String,
    /// Render the timing block in the report
    pub emit_timing: bool,
    /// Run-level question template
    pub question_template: String,
}

impl Default for FileRunConfig {
    fn default() -> Self {
        Self {
            max_parallel: 0,
            overall_timeout_ms: 0,
            failure_policy: "continue".to_string(),
            select: "full".to_string(),
            emit_timing: true,
            question_template: "{{input}}".to_string(),
        }
    }
}

impl FileRunConfig {
    /// Parse the failure policy string, falling back to the default.
    pub fn parse_failure_policy(&self) -> FailurePolicy {
        self.failure_policy.parse().unwrap_or_default()
    }

    /// Parse the selection string, falling back to the default.
    pub fn parse_selection(&self) -> ReturnSelection {
        self.select.parse().unwrap_or_default()
    }
}
