//! Port definitions - interfaces the application layer expects the
//! outside world to implement.

pub mod branch_gateway;
pub mod progress;
