//! Branch entities - specifications, normalization and outcomes.

pub mod normalize;
pub mod outcome;
pub mod spec;
