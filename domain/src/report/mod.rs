//! Result aggregation - the terminal artifact of a run.
//!
//! Merges the full, declaration-ordered list of settled outcomes into a
//! single [`RunReport`]: successes shaped by the configured return
//! selection, failures with their diagnostics, aggregate timing, and the
//! human-readable timing block.

pub mod timeline;

use crate::branch::outcome::{BranchOutcome, FailureKind};
use crate::run::ReturnSelection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use timeline::{TIMELINE_UNIT_MS, format_ms, render_timeline};

/// One successful branch in the final report. Which fields are present
/// is controlled by the run's [`ReturnSelection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchReport {
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_documents: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_tools: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// One failed branch in the final report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchFailure {
    pub label: String,
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// Response body preserved verbatim for diagnostics.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    pub elapsed_ms: u64,
}

/// Aggregate timing metrics for the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    /// Wall-clock duration: last settle relative to run start.
    pub total_ms: u64,
    /// Sum of individual branch durations (the sequential cost).
    pub sum_ms: u64,
    /// Longest individual branch duration.
    pub max_ms: u64,
    /// `sum / total`, rounded to two decimals; 0 when `total` is 0.
    pub speedup_factor: f64,
}

/// The terminal artifact: everything the caller receives on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub reports: Vec<BranchReport>,
    pub errors: Vec<BranchFailure>,
    pub timing: TimingSummary,
    /// Human-readable timing block; empty when timing emission is off.
    pub pretty: String,
}

/// Merge declaration-ordered outcomes into the final report.
pub fn aggregate(
    outcomes: &[BranchOutcome],
    selection: ReturnSelection,
    emit_timing: bool,
) -> RunReport {
    let mut reports = Vec::new();
    let mut errors = Vec::new();

    for outcome in outcomes {
        match outcome {
            BranchOutcome::Success {
                label,
                text,
                json,
                source_documents,
                used_tools,
                session_id,
                ..
            } => reports.push(shape_success(
                selection,
                label,
                text,
                json,
                source_documents,
                used_tools,
                session_id.as_deref(),
            )),
            BranchOutcome::Failure {
                label,
                kind,
                message,
                status,
                body,
                timing,
            } => errors.push(BranchFailure {
                label: label.clone(),
                kind: *kind,
                message: message.clone(),
                status: *status,
                body: body.clone(),
                elapsed_ms: timing.elapsed_ms,
            }),
        }
    }

    let timing = summarize_timing(outcomes);
    let pretty = if emit_timing {
        render_pretty(outcomes, &timing)
    } else {
        String::new()
    };

    RunReport {
        reports,
        errors,
        timing,
        pretty,
    }
}

fn shape_success(
    selection: ReturnSelection,
    label: &str,
    text: &str,
    json: &Value,
    source_documents: &[Value],
    used_tools: &[Value],
    session_id: Option<&str>,
) -> BranchReport {
    let mut report = BranchReport {
        label: label.to_string(),
        text: None,
        json: None,
        source_documents: None,
        used_tools: None,
        session_id: None,
    };
    match selection {
        ReturnSelection::Text => report.text = Some(text.to_string()),
        ReturnSelection::Json => report.json = Some(json.clone()),
        ReturnSelection::Full => {
            report.text = Some(text.to_string());
            report.json = Some(json.clone());
            report.source_documents = Some(source_documents.to_vec());
            report.used_tools = Some(used_tools.to_vec());
            report.session_id = session_id.map(str::to_string);
        }
    }
    report
}

fn summarize_timing(outcomes: &[BranchOutcome]) -> TimingSummary {
    let total_ms = outcomes
        .iter()
        .map(|o| o.timing().rel_end_ms)
        .max()
        .unwrap_or(0);
    let sum_ms: u64 = outcomes.iter().map(BranchOutcome::elapsed_ms).sum();
    let max_ms = outcomes
        .iter()
        .map(BranchOutcome::elapsed_ms)
        .max()
        .unwrap_or(0);
    let speedup_factor = if total_ms > 0 {
        let raw = sum_ms as f64 / total_ms as f64;
        (raw * 100.0).round() / 100.0
    } else {
        0.0
    };
    TimingSummary {
        total_ms,
        sum_ms,
        max_ms,
        speedup_factor,
    }
}

fn render_pretty(outcomes: &[BranchOutcome], timing: &TimingSummary) -> String {
    let mut lines: Vec<String> = outcomes
        .iter()
        .map(|o| format!("{}: {}", o.label(), format_ms(o.elapsed_ms())))
        .collect();
    lines.push(String::new());
    lines.push(format!(
        "Sequential (normal) total: {}",
        format_ms(timing.sum_ms)
    ));
    lines.push(format!(
        "Parallel (observed) total: {}",
        format_ms(timing.total_ms)
    ));
    lines.push(format!(
        "Speedup: x{:.2}   (sum/total)",
        timing.speedup_factor
    ));
    lines.push(String::new());
    lines.push(format!("Timeline (1 char = {}ms):", TIMELINE_UNIT_MS));
    lines.push(render_timeline(outcomes, TIMELINE_UNIT_MS));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::outcome::BranchTiming;
    use serde_json::json;

    fn success(label: &str, rel_start: u64, rel_end: u64) -> BranchOutcome {
        BranchOutcome::Success {
            label: label.to_string(),
            status: 200,
            text: format!("{label} says hi"),
            json: json!({ "from": label }),
            source_documents: vec![json!({ "page": 1 })],
            used_tools: vec![],
            session_id: Some(format!("run-{label}")),
            timing: BranchTiming {
                started_at_ms: rel_start as i64,
                ended_at_ms: rel_end as i64,
                elapsed_ms: rel_end - rel_start,
                rel_start_ms: rel_start,
                rel_end_ms: rel_end,
            },
        }
    }

    fn http_failure(label: &str, rel_start: u64, rel_end: u64) -> BranchOutcome {
        BranchOutcome::Failure {
            label: label.to_string(),
            kind: FailureKind::HttpStatus,
            message: "HTTP 500".to_string(),
            status: Some(500),
            body: Some(json!({ "error": "boom" })),
            timing: BranchTiming {
                started_at_ms: rel_start as i64,
                ended_at_ms: rel_end as i64,
                elapsed_ms: rel_end - rel_start,
                rel_start_ms: rel_start,
                rel_end_ms: rel_end,
            },
        }
    }

    // ==================== Partition Tests ====================

    #[test]
    fn test_partition_preserves_declaration_order() {
        let outcomes = vec![
            success("A", 0, 100),
            http_failure("B", 0, 50),
            success("C", 0, 80),
        ];
        let report = aggregate(&outcomes, ReturnSelection::Full, false);
        assert_eq!(report.reports.len(), 2);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.reports[0].label, "A");
        assert_eq!(report.reports[1].label, "C");
        assert_eq!(report.errors[0].label, "B");
        assert_eq!(report.errors[0].status, Some(500));
        assert_eq!(report.errors[0].body, Some(json!({ "error": "boom" })));
    }

    // ==================== Timing Tests ====================

    #[test]
    fn test_parallel_timing_and_speedup() {
        // 3 uniform 100ms branches running fully in parallel.
        let outcomes = vec![
            success("A", 0, 100),
            success("B", 0, 100),
            success("C", 0, 100),
        ];
        let report = aggregate(&outcomes, ReturnSelection::Text, false);
        assert_eq!(report.timing.total_ms, 100);
        assert_eq!(report.timing.sum_ms, 300);
        assert_eq!(report.timing.max_ms, 100);
        assert_eq!(report.timing.speedup_factor, 3.0);
    }

    #[test]
    fn test_serial_speedup_near_one() {
        let outcomes = vec![success("A", 0, 100), success("B", 100, 200)];
        let report = aggregate(&outcomes, ReturnSelection::Text, false);
        assert_eq!(report.timing.total_ms, 200);
        assert_eq!(report.timing.speedup_factor, 1.0);
    }

    #[test]
    fn test_zero_total_gives_zero_speedup() {
        let outcomes = vec![BranchOutcome::cancelled(
            "A",
            "cancelled (fail-fast)",
            BranchTiming::unstarted(0, 0),
        )];
        let report = aggregate(&outcomes, ReturnSelection::Text, false);
        assert_eq!(report.timing.total_ms, 0);
        assert_eq!(report.timing.speedup_factor, 0.0);
    }

    // ==================== Return Selection Tests ====================

    #[test]
    fn test_text_selection() {
        let report = aggregate(&[success("A", 0, 10)], ReturnSelection::Text, false);
        let shaped = &report.reports[0];
        assert_eq!(shaped.text.as_deref(), Some("A says hi"));
        assert!(shaped.json.is_none());
        assert!(shaped.source_documents.is_none());
        assert!(shaped.session_id.is_none());
    }

    #[test]
    fn test_json_selection() {
        let report = aggregate(&[success("A", 0, 10)], ReturnSelection::Json, false);
        let shaped = &report.reports[0];
        assert!(shaped.text.is_none());
        assert_eq!(shaped.json, Some(json!({ "from": "A" })));
    }

    #[test]
    fn test_full_selection() {
        let report = aggregate(&[success("A", 0, 10)], ReturnSelection::Full, false);
        let shaped = &report.reports[0];
        assert_eq!(shaped.text.as_deref(), Some("A says hi"));
        assert_eq!(shaped.json, Some(json!({ "from": "A" })));
        assert_eq!(shaped.source_documents, Some(vec![json!({ "page": 1 })]));
        assert_eq!(shaped.used_tools, Some(vec![]));
        assert_eq!(shaped.session_id.as_deref(), Some("run-A"));
    }

    // ==================== Pretty Block Tests ====================

    #[test]
    fn test_pretty_emitted_on_demand() {
        let outcomes = vec![success("A", 0, 100)];
        let silent = aggregate(&outcomes, ReturnSelection::Text, false);
        assert!(silent.pretty.is_empty());

        let verbose = aggregate(&outcomes, ReturnSelection::Text, true);
        assert!(verbose.pretty.contains("A: 100ms (0.10s)"));
        assert!(verbose.pretty.contains("Sequential (normal) total: 100ms"));
        assert!(verbose.pretty.contains("Parallel (observed) total: 100ms"));
        assert!(verbose.pretty.contains("Speedup: x1.00"));
        assert!(verbose.pretty.contains("Timeline (1 char = 100ms):"));
        assert!(verbose.pretty.contains("S | # 100ms"));
    }
}
