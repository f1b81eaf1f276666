//! Branch set normalization.
//!
//! The branch-set description reaches the orchestrator in whatever shape
//! the editor saved: an array of bare ids, an array of records, or a
//! label->spec map - any of which may still be a textual JSON blob,
//! including a relaxed form with unquoted keys. This module turns all of
//! them into one canonical ordered list of [`BranchSpec`].
//!
//! # Pipeline
//!
//! | Step | Behavior on failure |
//! |------|---------------------|
//! | `{{$vars.*}}` substitution | unresolved refs stay verbatim |
//! | textual blob -> JSON (strict, then bare-key quoting) | `ConfigError::MalformedDescription` |
//! | shape classification | `ConfigError::UnrecognizedShape` - never guessed from partial matches |
//! | spec building + label uniqueness | `ConfigError::{MissingId, DuplicateLabel, NoBranches}` |

use crate::core::error::ConfigError;
use crate::branch::spec::{BranchSpec, derive_id_label, derive_letter_label};
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\$vars\.([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\}\}")
        .expect("valid var-ref regex")
});

/// The recognized branch-set shapes. Anything else is a
/// [`ConfigError::UnrecognizedShape`], by design - partial matches are
/// never promoted to a guess.
#[derive(Debug)]
enum BranchSetShape {
    /// `["X", "Y", "Z"]` - labels become A, B, C...
    IdList(Vec<String>),
    /// `[{"id": "X", ...}, ...]` - labels from the records themselves.
    RecordList(Vec<Map<String, Value>>),
    /// `{"A": "X", "B": {...}}` - labels are the map keys.
    LabelMap(Map<String, Value>),
}

/// Substitute `{{$vars.NAME}}` / `{{$vars.NAME.PATH}}` references from
/// `scope`. Unresolved references are left verbatim, not removed, so a
/// failed substitution stays visible in the output.
pub fn substitute_var_refs(raw: &str, scope: &Map<String, Value>) -> String {
    VAR_REF
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            match lookup_scope(scope, &caps[1]) {
                Some(value) => scalar_to_string(value),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

fn lookup_scope<'a>(scope: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = scope.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalize a branch-set description into the canonical ordered spec list.
///
/// `scope` feeds the pre-parse `{{$vars.*}}` substitution. The
/// description may be a JSON value or a string still needing structural
/// parsing.
pub fn normalize_branches(
    raw: &Value,
    scope: &Map<String, Value>,
) -> Result<Vec<BranchSpec>, ConfigError> {
    let description = resolve_description(raw, scope)?;
    let shape = classify_shape(description)?;

    let specs = match shape {
        BranchSetShape::IdList(ids) => ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| {
                if id.trim().is_empty() {
                    return Err(ConfigError::MissingId(i));
                }
                Ok(BranchSpec::new(id, derive_letter_label(i)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        BranchSetShape::RecordList(records) => records
            .into_iter()
            .enumerate()
            .map(|(i, record)| spec_from_record(i, record, None))
            .collect::<Result<Vec<_>, _>>()?,
        BranchSetShape::LabelMap(map) => map
            .into_iter()
            .enumerate()
            .map(|(i, (label, value))| match value {
                Value::String(id) if !id.trim().is_empty() => {
                    Ok(BranchSpec::new(id, label))
                }
                Value::String(_) => Err(ConfigError::MissingId(i)),
                Value::Object(record) => spec_from_record(i, record, Some(label)),
                _ => Err(ConfigError::UnrecognizedShape),
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    if specs.is_empty() {
        return Err(ConfigError::NoBranches);
    }
    ensure_unique_labels(&specs)?;
    Ok(specs)
}

/// Apply `$vars` substitution everywhere, then make the description
/// structural: strings are parsed as JSON, tolerating bare object keys.
fn resolve_description(
    raw: &Value,
    scope: &Map<String, Value>,
) -> Result<Value, ConfigError> {
    match raw {
        Value::String(text) => {
            let text = substitute_var_refs(text, scope);
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                return Ok(value);
            }
            // Relaxed form: quote bare keys, then parse strictly. No
            // further repair beyond that - a blob that still fails is a
            // config error, not something to guess at.
            let strict = quote_bare_keys(&text);
            serde_json::from_str::<Value>(&strict)
                .map_err(|e| ConfigError::MalformedDescription(e.to_string()))
        }
        other => Ok(substitute_in_value(other, scope)),
    }
}

/// Recursively substitute `$vars` references inside every string of an
/// already-structured description.
fn substitute_in_value(value: &Value, scope: &Map<String, Value>) -> Value {
    match value {
        Value::String(s) => Value::String(substitute_var_refs(s, scope)),
        Value::Array(items) => Value::Array(
            items.iter().map(|v| substitute_in_value(v, scope)).collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute_in_value(v, scope)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn classify_shape(description: Value) -> Result<BranchSetShape, ConfigError> {
    match description {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ConfigError::NoBranches);
            }
            if items.iter().all(Value::is_string) {
                let ids = items
                    .into_iter()
                    .map(|v| match v {
                        Value::String(s) => s,
                        _ => unreachable!(),
                    })
                    .collect();
                return Ok(BranchSetShape::IdList(ids));
            }
            if items.iter().all(Value::is_object) {
                let records = items
                    .into_iter()
                    .map(|v| match v {
                        Value::Object(m) => m,
                        _ => unreachable!(),
                    })
                    .collect();
                return Ok(BranchSetShape::RecordList(records));
            }
            Err(ConfigError::UnrecognizedShape)
        }
        Value::Object(map) => Ok(BranchSetShape::LabelMap(map)),
        _ => Err(ConfigError::UnrecognizedShape),
    }
}

/// Build one spec from a record, with `label_override` winning over the
/// record's own label (map shape), which wins over the id prefix.
fn spec_from_record(
    index: usize,
    record: Map<String, Value>,
    label_override: Option<String>,
) -> Result<BranchSpec, ConfigError> {
    let id = record
        .get("id")
        .or_else(|| record.get("flowId"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ConfigError::MissingId(index))?
        .to_string();

    let label = label_override
        .or_else(|| {
            record
                .get("label")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| derive_id_label(&id));

    let mut spec = BranchSpec::new(id, label);

    if let Some(timeout) = record.get("timeoutMs").and_then(Value::as_u64) {
        spec = spec.with_timeout_ms(timeout);
    }
    if let Some(credential) = record.get("apiKey").and_then(Value::as_str) {
        spec = spec.with_credential(credential);
    }
    if let Some(Value::Object(vars)) = record.get("vars") {
        spec = spec.with_vars(vars.clone());
    }
    if let Some(template) = record.get("questionTemplate").and_then(Value::as_str) {
        spec = spec.with_question_template(template);
    }

    Ok(spec)
}

fn ensure_unique_labels(specs: &[BranchSpec]) -> Result<(), ConfigError> {
    let mut seen = std::collections::HashSet::new();
    for spec in specs {
        if !seen.insert(spec.label.as_str()) {
            return Err(ConfigError::DuplicateLabel(spec.label.clone()));
        }
    }
    Ok(())
}

/// Convert the relaxed object-key form (`{a: 1}`) to strict JSON by
/// quoting bare keys. Keys inside string literals are left alone.
fn quote_bare_keys(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let chars: Vec<char> = text.chars().collect();
    let mut in_string = false;
    let mut escaped = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                // Collect the bare word and quote it only when it is in
                // key position (next non-space char is ':').
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let mut j = i;
                while j < chars.len() && chars[j].is_whitespace() {
                    j += 1;
                }
                if j < chars.len() && chars[j] == ':' {
                    out.push('"');
                    out.push_str(&word);
                    out.push('"');
                } else {
                    out.push_str(&word);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}
