//! Process state management.
//!
//! This module provides:
//! - Process record state machine logic
//! - ProcessRegistry, the shared table of all process records

pub mod error;
pub mod process;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::ProcessRegistry;
