//! Use cases for subflow-fanout.

mod invoke_branch;
pub mod run_fanout;
