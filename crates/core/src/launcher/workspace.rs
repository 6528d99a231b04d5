//! Workspace artifacts.
//!
//! Each job definition is materialized as `<root>/robot_<process_id>.json`
//! before the interpreter starts. Definitions that parse as JSON are written
//! pretty-printed; anything else is written verbatim.

use crate::launcher::error::{LaunchError, LaunchResult};
use rr_protocol::config_models::WorkspaceConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const MAX_PROCESS_ID_LEN: usize = 128;

/// Check that `process_id` is usable as part of a file name.
///
/// Accepted ids are 1 to 128 characters from `[A-Za-z0-9._-]` and do not
/// start with `.`.
pub fn validate_process_id(process_id: &str) -> LaunchResult<()> {
    let valid = !process_id.is_empty()
        && process_id.len() <= MAX_PROCESS_ID_LEN
        && !process_id.starts_with('.')
        && process_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(LaunchError::InvalidProcessId(process_id.to_string()))
    }
}

/// The directory where job artifacts are written.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    path_rewrites: BTreeMap<String, String>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            path_rewrites: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &WorkspaceConfig) -> Self {
        Self {
            root: config.root.clone(),
            path_rewrites: config.path_rewrites.clone(),
        }
    }

    /// Replace `from` with `to` wherever it occurs in a definition.
    pub fn with_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.path_rewrites.insert(from.into(), to.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_path(&self, process_id: &str) -> PathBuf {
        self.root.join(format!("robot_{process_id}.json"))
    }

    /// Apply the path rewrites, then pretty-print if the result is JSON.
    pub fn render(&self, definition: &str) -> String {
        let rewritten = self
            .path_rewrites
            .iter()
            .fold(definition.to_string(), |text, (from, to)| {
                text.replace(from.as_str(), to)
            });

        match serde_json::from_str::<serde_json::Value>(&rewritten) {
            Ok(value) => serde_json::to_string_pretty(&value).unwrap_or(rewritten),
            Err(_) => rewritten,
        }
    }

    /// Write the artifact for `process_id`, replacing any previous one.
    pub async fn write_artifact(&self, process_id: &str, definition: &str) -> LaunchResult<PathBuf> {
        let path = self.artifact_path(process_id);
        let write_error = |source| LaunchError::WorkspaceWrite {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(write_error)?;
        tokio::fs::write(&path, self.render(definition))
            .await
            .map_err(write_error)?;

        tracing::debug!(
            process_id = %process_id,
            path = %path.display(),
            "Wrote workspace artifact"
        );
        Ok(path)
    }
}
