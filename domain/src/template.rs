//! Request templating for branch questions.
//!
//! Minimal mustache-like rendering: `{{input}}`, `{{vars.name}}` and any
//! other dotted path are resolved against a merged JSON scope. Unresolved
//! placeholders render as the empty string - a deliberate best-effort
//! policy for outbound requests, in contrast to the normalizer's
//! `{{$vars.*}}` substitution which leaves unresolved references verbatim
//! so failures stay visible.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([\w.]+)\s*\}\}").expect("valid placeholder regex"));

/// Render `template` against `scope`, resolving dotted paths.
pub fn render_template(template: &str, scope: &Value) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            lookup_path(scope, &caps[1])
                .map(value_to_string)
                .unwrap_or_default()
        })
        .into_owned()
}

/// Walk a dotted path through nested objects.
fn lookup_path<'a>(scope: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = scope;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
