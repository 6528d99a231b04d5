//! Interpreter subprocess.
//!
//! This module starts the external interpreter for one job and turns its
//! stdout into a stream of [`OutputLine`]s: callback lines become parsed
//! [`Hook`]s, everything else is ordinary output for the diagnostic log.

use crate::launcher::error::{LaunchError, LaunchResult};
use rr_protocol::config_models::InterpreterConfig;
use rr_protocol::hook_models::{Hook, ENV_LISTENER_HOOKS, ENV_PROCESS_ID, ENV_STEP_MODE};
use rr_protocol::process_models::RunMode;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_stream::Stream;

/// One line of interpreter stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Hook(Hook),
    Text(String),
    /// A callback line whose body could not be parsed.
    Malformed { line: String, error: String },
}

/// Stream of classified output lines.
pub type OutputStream = Pin<Box<dyn Stream<Item = OutputLine> + Send>>;

/// How to start the interpreter.
#[derive(Debug, Clone)]
pub struct Interpreter {
    program: String,
    args: Vec<String>,
}

impl Interpreter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &InterpreterConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Locate the interpreter executable on `PATH`.
    pub fn resolve(&self) -> LaunchResult<PathBuf> {
        which::which(&self.program).map_err(|e| {
            LaunchError::Spawn(format!("interpreter '{}' not found: {e}", self.program))
        })
    }

    /// Spawn the interpreter for one job.
    ///
    /// The command line is `program [args...] <artifact> --listener=<all|step>`
    /// and the process id, step mode and listened hooks are also passed in
    /// the environment. All three standard streams are piped; the child is
    /// killed if its handle is dropped.
    ///
    /// # Arguments
    ///
    /// * `process_id` - Process the job runs as
    /// * `artifact` - Workspace artifact holding the job definition
    /// * `run_mode` - Whether the interpreter must wait for a gate reply
    ///   after each step start
    /// * `working_dir` - Working directory for the interpreter
    pub fn spawn(
        &self,
        process_id: &str,
        artifact: &Path,
        run_mode: RunMode,
        working_dir: &Path,
    ) -> LaunchResult<Child> {
        let program = self.resolve()?;

        let mut cmd = Command::new(&program);
        cmd.args(&self.args);
        cmd.arg(artifact);
        cmd.arg(format!("--listener={}", run_mode.listener_flag()));
        cmd.env(ENV_PROCESS_ID, process_id);
        cmd.env(ENV_STEP_MODE, run_mode.listener_flag());
        cmd.env(ENV_LISTENER_HOOKS, Hook::NAMES.join(","));
        cmd.current_dir(working_dir);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            LaunchError::Spawn(format!(
                "failed to spawn '{}': {e}",
                program.display()
            ))
        })?;

        tracing::info!(
            process_id = %process_id,
            pid = ?child.id(),
            program = %program.display(),
            mode = %run_mode,
            "Interpreter started"
        );
        Ok(child)
    }
}

/// Read `reader` line by line, classifying each line.
///
/// Lines are split on raw bytes and decoded lossily, so output in a legacy
/// encoding never ends the stream. Empty lines are skipped. The stream ends
/// at EOF or on a read error.
pub fn output_lines<R>(reader: R) -> OutputStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read interpreter output");
                    break;
                }
            }

            let line = decode_line(&buf);
            if line.trim().is_empty() {
                continue;
            }

            match Hook::parse_line(&line) {
                Some(Ok(hook)) => yield OutputLine::Hook(hook),
                Some(Err(e)) => yield OutputLine::Malformed {
                    line,
                    error: e.to_string(),
                },
                None => yield OutputLine::Text(line),
            }
        }
    };

    Box::pin(stream)
}

/// Strip the line terminator and decode, replacing invalid UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
