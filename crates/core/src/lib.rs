//! # rr-core
//!
//! Process orchestration for rpa-runner.
//!
//! This crate provides:
//! - Configuration loading from `rpa-runner.toml`
//! - A registry of process records and their lifecycle
//! - Step gates that hold step-by-step executions between steps
//! - The listener bridge turning interpreter callbacks into bus events
//! - Launching and supervising interpreter processes
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and management
//! - [`state`]: Process registry and lifecycle transitions
//! - [`gate`]: Step gates for step-by-step runs
//! - [`bus`]: Event bus abstraction with in-memory and WebSocket transports
//! - [`listener`]: Execution listener contract and the bus bridge
//! - [`launcher`]: Workspace, interpreter spawning and supervision
//! - [`engine`]: The orchestrator facade

pub mod bus;
pub mod config;
pub mod engine;
pub mod gate;
pub mod launcher;
pub mod listener;
pub mod state;
