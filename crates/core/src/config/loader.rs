//! Configuration file loader for `rpa-runner.toml`.
//!
//! Loading happens in three steps:
//! - parse the TOML file, or start from defaults if it does not exist
//! - apply the environment overrides (`RPA_EVENT_BUS_URL`,
//!   `RPA_WORKSPACE_ROOT`, `RPA_LOG_DIR`)
//! - validate the result

use crate::config::error::{ConfigError, ConfigResult};
use rr_protocol::config_models::OrchestratorConfig;
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE_NAME: &str = "rpa-runner.toml";

/// Overrides `[event_bus] url`.
pub const ENV_EVENT_BUS_URL: &str = "RPA_EVENT_BUS_URL";

/// Overrides `[workspace] root`.
pub const ENV_WORKSPACE_ROOT: &str = "RPA_WORKSPACE_ROOT";

/// Overrides `[workspace] log_dir`.
pub const ENV_LOG_DIR: &str = "RPA_LOG_DIR";

/// Loads the orchestrator configuration.
///
/// # Arguments
///
/// * `path` - Path of the configuration file
///
/// # Returns
///
/// The effective configuration. If the file does not exist, the defaults
/// (with environment overrides applied) are returned rather than an error.
///
/// # Errors
///
/// Returns `ConfigError` if:
/// - The file exists but cannot be read
/// - The file is not valid TOML or has fields of the wrong type
/// - A value is unusable, such as an empty interpreter program
///
/// # Example
///
/// ```rust,no_run
/// use rr_core::config::loader::load_config;
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = load_config(Path::new("rpa-runner.toml")).await?;
/// println!("Interpreter: {}", config.interpreter.program);
/// # Ok(())
/// # }
/// ```
pub async fn load_config(path: &Path) -> ConfigResult<OrchestratorConfig> {
    load_config_with_env(path, |key| std::env::var(key).ok()).await
}

/// Like [`load_config`], reading overrides through `lookup` instead of the
/// process environment.
pub async fn load_config_with_env<F>(path: &Path, lookup: F) -> ConfigResult<OrchestratorConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = read_config_file(path).await?;
    apply_env_overrides(&mut config, lookup);
    validate(&config, path)?;
    Ok(config)
}

async fn read_config_file(path: &Path) -> ConfigResult<OrchestratorConfig> {
    // If the file doesn't exist, return default
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(OrchestratorConfig::default());
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

    toml::from_str(&content).map_err(|source| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply the recognized environment overrides. Empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut OrchestratorConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(url) = non_empty(ENV_EVENT_BUS_URL) {
        config.event_bus.url = Some(url);
    }
    if let Some(root) = non_empty(ENV_WORKSPACE_ROOT) {
        config.workspace.root = PathBuf::from(root);
    }
    if let Some(log_dir) = non_empty(ENV_LOG_DIR) {
        config.workspace.log_dir = PathBuf::from(log_dir);
    }
}

fn validate(config: &OrchestratorConfig, path: &Path) -> ConfigResult<()> {
    let invalid = |reason: &str| ConfigError::InvalidConfig {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if config.interpreter.program.trim().is_empty() {
        return Err(invalid("interpreter.program must not be empty"));
    }
    if config.workspace.root.as_os_str().is_empty() {
        return Err(invalid("workspace.root must not be empty"));
    }
    if config.workspace.log_dir.as_os_str().is_empty() {
        return Err(invalid("workspace.log_dir must not be empty"));
    }
    if let Some(url) = &config.event_bus.url {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(invalid("event_bus.url must be a ws:// or wss:// URL"));
        }
    }
    if config.gate.idle_timeout_secs == Some(0) {
        return Err(invalid("gate.idle_timeout_secs must be positive when set"));
    }
    if config.workspace.path_rewrites.keys().any(String::is_empty) {
        return Err(invalid("workspace.path_rewrites keys must not be empty"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[tokio::test]
    async fn test_load_config_missing_file_uses_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");

        let config = load_config_with_env(&dir.path().join(CONFIG_FILE_NAME), no_env)
            .await
            .expect("Missing file should yield defaults");

        assert_eq!(config, OrchestratorConfig::default());
    }

    #[tokio::test]
    async fn test_load_config_full_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            r#"
[event_bus]
url = "ws://127.0.0.1:8080/robot"

[workspace]
root = "/var/lib/rpa-runner/work"
log_dir = "/var/log/rpa-runner"

[interpreter]
program = "python3"
args = ["-m", "robot_runner"]

[gate]
idle_timeout_secs = 1800

[supervisor]
stop_grace_secs = 10
retention_secs = 60
"#,
        )
        .expect("Failed to write config");

        let config = load_config_with_env(&path, no_env).await.unwrap();

        assert_eq!(
            config.event_bus.url.as_deref(),
            Some("ws://127.0.0.1:8080/robot")
        );
        assert_eq!(config.interpreter.program, "python3");
        assert_eq!(config.interpreter.args, vec!["-m", "robot_runner"]);
        assert_eq!(config.gate.idle_timeout_secs, Some(1800));
        assert_eq!(config.supervisor.stop_grace_secs, 10);
        assert_eq!(config.supervisor.retention_secs, 60);
    }

    #[tokio::test]
    async fn test_env_overrides_win_over_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[workspace]\nroot = \"from-file\"\n").unwrap();

        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_EVENT_BUS_URL, "wss://bus.example.com/ws"),
            (ENV_WORKSPACE_ROOT, "from-env"),
            (ENV_LOG_DIR, ""),
        ]);
        let config = load_config_with_env(&path, |key| env.get(key).map(|v| v.to_string()))
            .await
            .unwrap();

        assert_eq!(
            config.event_bus.url.as_deref(),
            Some("wss://bus.example.com/ws")
        );
        assert_eq!(config.workspace.root, PathBuf::from("from-env"));
        // Empty values do not override.
        assert_eq!(config.workspace.log_dir, PathBuf::from("logs"));
    }

    #[tokio::test]
    async fn test_load_config_invalid_toml() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[interpreter\nprogram = ").unwrap();

        let result = load_config_with_env(&path, no_env).await;

        if let Err(ConfigError::TomlParse { path, .. }) = result {
            assert!(path.ends_with(CONFIG_FILE_NAME));
        } else {
            panic!("Expected TomlParse error");
        }
    }

    #[tokio::test]
    async fn test_load_config_wrong_type() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[supervisor]\nstop_grace_secs = \"five\"\n").unwrap();

        let result = load_config_with_env(&path, no_env).await;
        assert!(matches!(result, Err(ConfigError::TomlParse { .. })));
    }

    #[tokio::test]
    async fn test_empty_program_is_invalid() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "[interpreter]\nprogram = \"  \"\n").unwrap();

        let result = load_config_with_env(&path, no_env).await;

        match result {
            Err(ConfigError::InvalidConfig { reason, .. }) => {
                assert!(reason.contains("interpreter.program"))
            }
            other => panic!("Expected InvalidConfig, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_websocket_url_is_invalid() {
        let dir = tempdir().expect("Failed to create temp dir");
        let env = |key: &str| (key == ENV_EVENT_BUS_URL).then(|| "http://bus".to_string());

        let result = load_config_with_env(&dir.path().join(CONFIG_FILE_NAME), env).await;
        assert!(matches!(result, Err(ConfigError::InvalidConfig { .. })));
    }
}
