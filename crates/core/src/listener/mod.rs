//! Interpreter lifecycle callbacks.
//!
//! An [`ExecutionListener`] receives the callbacks of exactly one execution,
//! in the order the interpreter reported them. [`dispatch`] routes a parsed
//! [`Hook`] line to the matching callback.

pub mod bridge;

pub use bridge::ListenerBridge;

use async_trait::async_trait;
use rr_protocol::hook_models::Hook;
use rr_protocol::ipc::StepInfo;

/// What the execution should do after a callback returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Stop the interpreter; the execution ends as `stopped`.
    Terminate,
}

/// Sink for the lifecycle callbacks of one execution.
#[async_trait]
pub trait ExecutionListener: Send {
    async fn on_job_start(&mut self, name: Option<String>) -> Flow;

    /// Called before a step runs. In step-by-step mode this is where the
    /// execution suspends.
    async fn on_step_start(&mut self, step: StepInfo) -> Flow;

    async fn on_step_end(&mut self, name: String, status: String, message: Option<String>)
        -> Flow;

    async fn on_job_end(&mut self, name: Option<String>, status: String) -> Flow;

    async fn on_error(&mut self, message: String) -> Flow;

    /// Interpreter log output. Ignored unless the listener collects it.
    async fn on_log(&mut self, _level: Option<String>, _message: String) -> Flow {
        Flow::Continue
    }
}

/// Deliver one hook to `listener`.
pub async fn dispatch<L>(listener: &mut L, hook: Hook) -> Flow
where
    L: ExecutionListener + ?Sized,
{
    match hook {
        Hook::JobStart { name } => listener.on_job_start(name).await,
        Hook::StepStart { name, lib, args } => {
            listener.on_step_start(StepInfo { name, lib, args }).await
        }
        Hook::StepEnd {
            name,
            status,
            message,
        } => listener.on_step_end(name, status, message).await,
        Hook::JobEnd { name, status } => listener.on_job_end(name, status).await,
        Hook::Error { message } => listener.on_error(message).await,
        Hook::Log { level, message } => listener.on_log(level, message).await,
    }
}
