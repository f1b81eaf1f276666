//! Domain layer for subflow-fanout
//!
//! This crate contains the core business logic, entities, and value objects.
//! It has no dependencies on infrastructure or presentation concerns.
//!
//! # Core Concepts
//!
//! ## Fan-out / Fan-in
//!
//! A run dispatches a set of independently addressable remote "branch"
//! computations concurrently, waits for every branch to settle, and merges
//! the settled outcomes into one report:
//!
//! - **Branch**: one remote subflow invoked via `/prediction/{id}`
//! - **Settle**: a branch outcome becomes final (success or failure)
//! - **Speedup factor**: sum of branch durations over wall-clock duration,
//!   i.e. how much parallelism the run actually realized
//!
//! ## Failure policies
//!
//! - **Continue** (default): every branch runs to its own completion or
//!   timeout, independent of siblings
//! - **FailFast**: the first branch failure cancels all not-yet-admitted
//!   siblings

pub mod branch;
pub mod core;
pub mod report;
pub mod run;
pub mod template;

// Re-export commonly used types
pub use branch::{
    normalize::{normalize_branches, substitute_var_refs},
    outcome::{BranchOutcome, BranchTiming, FailureKind},
    spec::{BranchSpec, DEFAULT_BRANCH_TIMEOUT_MS},
};
pub use self::core::error::ConfigError;
pub use report::{
    BranchFailure, BranchReport, RunReport, TimingSummary, aggregate,
    timeline::{format_ms, render_timeline},
};
pub use run::{CorrelationId, FailurePolicy, ReturnSelection, RunContext};
pub use template::render_template;
