//! Console progress reporting for fan-out runs

use fanout_application::FanoutProgress;

/// Prints one line per settled branch to stderr, keeping stdout clean
/// for the JSON report.
pub struct ConsoleProgress;

impl FanoutProgress for ConsoleProgress {
    fn on_run_start(&self, total: usize) {
        eprintln!("Dispatching {total} branches...");
    }

    fn on_branch_settled(&self, label: &str, success: bool, elapsed_ms: u64) {
        let mark = if success { "v" } else { "x" };
        eprintln!("  [{mark}] {label} ({elapsed_ms}ms)");
    }

    fn on_run_complete(&self, total_ms: u64) {
        eprintln!("All branches settled in {total_ms}ms");
    }
}
