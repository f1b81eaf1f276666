//! Configuration infrastructure - TOML file formats and loading.

mod file_config;
mod loader;

pub use file_config::{FileConfig, FileGatewayConfig, FileRunConfig};
pub use loader::ConfigLoader;
