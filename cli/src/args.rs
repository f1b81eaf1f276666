//! CLI argument definitions

use anyhow::{Context, Result, anyhow};
use clap::{Parser, ValueEnum};
use fanout_domain::ReturnSelection;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Which fields each successful branch reports
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SelectArg {
    /// Only the response text
    Text,
    /// Only the structured payload
    Json,
    /// Everything the branch returned
    Full,
}

impl From<SelectArg> for ReturnSelection {
    fn from(arg: SelectArg) -> Self {
        match arg {
            SelectArg::Text => ReturnSelection::Text,
            SelectArg::Json => ReturnSelection::Json,
            SelectArg::Full => ReturnSelection::Full,
        }
    }
}

/// CLI arguments for subflow-fanout
#[derive(Parser, Debug)]
#[command(name = "subflow-fanout")]
#[command(author, version, about = "Fan out one question to parallel subflows and merge the results")]
#[command(long_about = r#"
subflow-fanout sends one question to multiple remote subflows in parallel,
waits for all of them under a concurrency cap and optional deadlines, and
prints a merged JSON report with per-branch results and timing.

Branch sets accept three shapes:
  '["flow-a", "flow-b"]'                      ids, labeled A, B, ...
  '[{"id": "flow-a", "label": "critic"}]'     records with per-branch settings
  '{"critic": "flow-a", "fan": "flow-b"}'     label -> id map

Configuration files are loaded from (in priority order):
1. --config <path>     Explicit config file
2. ./fanout.toml       Project-level config
3. ~/.config/subflow-fanout/config.toml   Global config

Example:
  subflow-fanout --branches '["flow-a", "flow-b"]' "Summarize this RFC"
  subflow-fanout --branches @branches.json --fail-fast --max-parallel 2 "Review the draft"
"#)]
pub struct Cli {
    /// The question to fan out; a JSON payload {"input": ..., "vars": {...}} is unpacked
    pub question: Option<String>,

    /// Branch set: inline JSON, or @path to read it from a file
    #[arg(short, long, value_name = "JSON|@PATH")]
    pub branches: Option<String>,

    /// Runtime var available as {{vars.KEY}} (can be specified multiple times)
    #[arg(long = "var", value_name = "KEY=VALUE")]
    pub vars: Vec<String>,

    /// JSON file with a vars object; --var pairs override its entries
    #[arg(long, value_name = "PATH")]
    pub vars_file: Option<PathBuf>,

    /// Base URL of the prediction host
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Default bearer token for branches without their own
    #[arg(long, value_name = "KEY")]
    pub api_key: Option<String>,

    /// Maximum branches in flight at once (0 = one slot per branch)
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,

    /// Overall wall-clock budget in milliseconds (0 = unbounded)
    #[arg(long, value_name = "MS")]
    pub overall_timeout_ms: Option<u64>,

    /// Cancel queued branches after the first failure
    #[arg(long)]
    pub fail_fast: bool,

    /// Question template; supports {{input}}, {{vars.*}} and branch vars
    #[arg(long, value_name = "TEMPLATE")]
    pub template: Option<String>,

    /// Which fields each successful branch reports
    #[arg(short, long, value_enum, value_name = "FIELDS")]
    pub select: Option<SelectArg>,

    /// Omit the timing block from the report
    #[arg(long)]
    pub no_timing: bool,

    /// Verbosity level (-v = info, -vv = debug, -vvv = trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disable loading of configuration files
    #[arg(long)]
    pub no_config: bool,
}

/// Parse one `--var KEY=VALUE` pair. Values that parse as JSON keep
/// their type; everything else stays a string.
pub fn parse_var(pair: &str) -> Result<(String, Value)> {
    let (key, raw) = pair
        .split_once('=')
        .ok_or_else(|| anyhow!("--var expects KEY=VALUE, got '{pair}'"))?;
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Read a `--vars-file`: a JSON object of name -> value.
pub fn load_vars_file(path: &Path) -> Result<Map<String, Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading vars from {}", path.display()))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(anyhow!(
            "vars file {} must hold a JSON object",
            path.display()
        )),
        Err(e) => Err(anyhow!(
            "vars file {} is not valid JSON: {e}",
            path.display()
        )),
    }
}

/// Resolve the `--branches` argument into a raw branch-set description.
/// The text stays unparsed: the normalizer accepts textual descriptions
/// and is more lenient than strict JSON.
pub fn load_branch_set(arg: &str) -> Result<Value> {
    if let Some(path) = arg.strip_prefix('@') {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading branch set from {path}"))?;
        Ok(Value::String(text))
    } else {
        Ok(Value::String(arg.to_string()))
    }
}
