//! # rr-protocol
//!
//! Core protocol definitions and data models for rpa-runner.
//!
//! This crate defines all shared data structures used for:
//! - Job submission and the handle returned for it
//! - Runtime process state as held by the registry
//! - Events published to, and control signals received from, the event bus
//! - The line protocol spoken with the interpreter process
//! - Configuration file parsing (`rpa-runner.toml`)
//!
//! ## Modules
//!
//! - [`config_models`]: Orchestrator configuration
//! - [`hook_models`]: Interpreter callback lines and gate replies
//! - [`ipc`]: Events and control signals exchanged over the event bus
//! - [`process_models`]: Runtime process state and status
//! - [`request_models`]: Launch request and process handle

pub mod config_models;
pub mod hook_models;
pub mod ipc;
pub mod process_models;
pub mod request_models;

// Re-export all public types for convenience
pub use config_models::*;
pub use hook_models::*;
pub use ipc::*;
pub use process_models::*;
pub use request_models::*;
