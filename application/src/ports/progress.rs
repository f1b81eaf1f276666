//! Progress notification port
//!
//! Lets the caller observe branch settlement without coupling the
//! coordinator to any particular output surface.

/// Callbacks fired by the coordinator as a run advances.
///
/// All methods have no-op defaults; implementors override what they need.
pub trait FanoutProgress: Send + Sync {
    /// The run was admitted: `total` branches will be dispatched.
    fn on_run_start(&self, _total: usize) {}

    /// One branch settled (in completion order, not declaration order).
    fn on_branch_settled(&self, _label: &str, _success: bool, _elapsed_ms: u64) {}

    /// All branches settled; `total_ms` is the observed wall-clock time.
    fn on_run_complete(&self, _total_ms: u64) {}
}

/// No-op progress for headless callers.
pub struct NoProgress;

impl FanoutProgress for NoProgress {}
