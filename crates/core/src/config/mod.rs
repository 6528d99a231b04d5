//! Configuration loading and management.
//!
//! This module loads the orchestrator configuration from `rpa-runner.toml`
//! and applies the supported environment overrides.

pub mod error;
pub mod loader;

pub use error::{ConfigError, ConfigResult};
pub use loader::{load_config, CONFIG_FILE_NAME};
