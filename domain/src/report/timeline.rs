//! ASCII timeline rendering for timing diagnostics.
//!
//! One row per branch, one `#` column per 100ms of elapsed run time,
//! plus a synthetic `S` row showing the sum of branch durations - the
//! visual comparison against the wall-clock row lengths is what makes
//! the realized parallelism obvious to a human reader.

use crate::branch::outcome::BranchOutcome;

/// Bucket width of one timeline column, in milliseconds.
pub const TIMELINE_UNIT_MS: u64 = 100;

/// `1234ms (1.23s)`
pub fn format_ms(ms: u64) -> String {
    format!("{}ms ({:.2}s)", ms, ms as f64 / 1000.0)
}

/// Render the bucketed timeline with the trailing sum row.
pub fn render_timeline(outcomes: &[BranchOutcome], unit_ms: u64) -> String {
    let unit = unit_ms.max(1) as f64;
    let mut lines = Vec::with_capacity(outcomes.len() + 1);

    for outcome in outcomes {
        let timing = outcome.timing();
        let start = (timing.rel_start_ms as f64 / unit).round() as usize;
        let width = ((timing.rel_end_ms.saturating_sub(timing.rel_start_ms)) as f64 / unit)
            .round()
            .max(1.0) as usize;
        lines.push(format!(
            "{} | {}{} {}ms",
            outcome.label(),
            " ".repeat(start),
            "#".repeat(width),
            timing.elapsed_ms
        ));
    }

    let sum_ms: u64 = outcomes.iter().map(BranchOutcome::elapsed_ms).sum();
    let sum_width = ((sum_ms as f64 / unit).round() as usize).max(1);
    lines.push(format!("S | {} {}ms", "#".repeat(sum_width), sum_ms));

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::branch::outcome::{BranchOutcome, BranchTiming, FailureKind};
    use serde_json::json;

    fn success(label: &str, rel_start: u64, rel_end: u64) -> BranchOutcome {
        BranchOutcome::Success {
            label: label.to_string(),
            status: 200,
            text: String::new(),
            json: json!({}),
            source_documents: vec![],
            used_tools: vec![],
            session_id: None,
            timing: BranchTiming {
                started_at_ms: rel_start as i64,
                ended_at_ms: rel_end as i64,
                elapsed_ms: rel_end - rel_start,
                rel_start_ms: rel_start,
                rel_end_ms: rel_end,
            },
        }
    }

    #[test]
    fn test_parallel_bars_overlap() {
        let outcomes = vec![success("A", 0, 300), success("B", 0, 200)];
        let timeline = render_timeline(&outcomes, TIMELINE_UNIT_MS);
        let lines: Vec<_> = timeline.lines().collect();
        assert_eq!(lines[0], "A | ### 300ms");
        assert_eq!(lines[1], "B | ## 200ms");
        assert_eq!(lines[2], "S | ##### 500ms");
    }

    #[test]
    fn test_serial_bars_are_offset() {
        let outcomes = vec![success("A", 0, 100), success("B", 100, 200)];
        let timeline = render_timeline(&outcomes, TIMELINE_UNIT_MS);
        let lines: Vec<_> = timeline.lines().collect();
        assert_eq!(lines[0], "A | # 100ms");
        assert_eq!(lines[1], "B |  # 100ms");
    }

    #[test]
    fn test_zero_duration_still_one_column() {
        let outcome = BranchOutcome::Failure {
            label: "C".to_string(),
            kind: FailureKind::Cancelled,
            message: "cancelled (fail-fast)".to_string(),
            status: None,
            body: None,
            timing: BranchTiming::unstarted(0, 40),
        };
        let timeline = render_timeline(&[outcome], TIMELINE_UNIT_MS);
        assert!(timeline.starts_with("C | #"));
    }

    #[test]
    fn test_format_ms() {
        assert_eq!(format_ms(1234), "1234ms (1.23s)");
        assert_eq!(format_ms(0), "0ms (0.00s)");
    }
}
