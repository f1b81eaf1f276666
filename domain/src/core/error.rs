//! Domain error types

use thiserror::Error;

/// Fatal configuration errors raised before any branch is dispatched.
///
/// These abort the whole run; no branch ever starts when one of these
/// surfaces. Branch-local failures (network, HTTP status, timeout,
/// cancellation) are never represented here - they settle as outcomes.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No branches configured")]
    NoBranches,

    #[error("Branch description is not valid JSON: {0}")]
    MalformedDescription(String),

    #[error("Unrecognized branch description shape: expected an array of ids, an array of records, or a label map")]
    UnrecognizedShape,

    #[error("Branch entry {0} is missing its id")]
    MissingId(usize),

    #[error("Duplicate branch label: {0}")]
    DuplicateLabel(String),
}
