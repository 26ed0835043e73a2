//! Configuration loading for the CLI.
//!
//! Layered TOML: a user-level file (`~/.eflycode/config.toml`) deep-merged
//! with an optional project-level file (`./.eflycode/config.toml`, if
//! present, overriding the user layer table-by-table and key-by-key), then
//! environment-variable overrides via [`Config::with_env`].

mod schema;

pub use schema::{Config, ConfigIssue, IssueLevel, LoggingConfig, ModelConfig, ModelProviderKind};

use std::path::PathBuf;
use tracing::{debug, info};

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    /// TOML serialization error.
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// The default user-level config directory, `~/.eflycode`.
#[must_use]
pub fn default_config_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".eflycode")
}

/// The default user-level config file path.
#[must_use]
pub fn config_path() -> PathBuf {
    default_config_dir().join("config.toml")
}

/// The project-level config file path, relative to the current directory.
#[must_use]
pub fn project_config_path() -> PathBuf {
    PathBuf::from(".eflycode").join("config.toml")
}

/// Load configuration: the user-level file deep-merged with the
/// project-level file (project wins), with environment variables applied
/// on top.
pub async fn load_config() -> ConfigResult<Config> {
    let user = read_toml_table(&config_path()).await?;
    let project = read_toml_table(&project_config_path()).await?;
    let merged = merge_toml_tables(user, project);
    let config: Config = toml::Value::Table(merged).try_into()?;
    Ok(config.with_env())
}

/// Load configuration from a specific path, without environment overrides
/// and without layering a second file on top.
pub async fn load_config_from(path: PathBuf) -> ConfigResult<Config> {
    if !path.exists() {
        info!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }

    let content = tokio::fs::read_to_string(&path).await?;
    let config: Config = toml::from_str(&content)?;
    debug!(path = %path.display(), "loaded config file");

    Ok(config)
}

async fn read_toml_table(path: &std::path::Path) -> ConfigResult<toml::Table> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    let content = tokio::fs::read_to_string(path).await?;
    let table: toml::Table = toml::from_str(&content)?;
    debug!(path = %path.display(), "loaded config layer");
    Ok(table)
}

/// Deep-merge `override_table` on top of `base`: matching tables merge
/// key-by-key recursively, any other value type (including arrays) is
/// replaced wholesale by the override.
fn merge_toml_tables(mut base: toml::Table, override_table: toml::Table) -> toml::Table {
    for (key, override_value) in override_table {
        match (base.remove(&key), override_value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(override_table)) => {
                base.insert(key, toml::Value::Table(merge_toml_tables(base_table, override_table)));
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
    base
}

/// Save configuration to the default user-level path.
pub async fn save_config(config: &Config) -> ConfigResult<()> {
    save_config_to(config, config_path()).await
}

/// Save configuration to a specific path.
pub async fn save_config_to(config: &Config, path: PathBuf) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let content = toml::to_string_pretty(config)?;
    tokio::fs::write(&path, content).await?;
    info!(path = %path.display(), "saved config file");

    Ok(())
}

/// Initialize the user-level config directory and write a default config if
/// one doesn't already exist there.
pub async fn init_config() -> ConfigResult<Config> {
    let cfg_dir = default_config_dir();
    let cfg_path = config_path();

    tokio::fs::create_dir_all(&cfg_dir).await?;

    if !cfg_path.exists() {
        let config = Config::default();
        save_config(&config).await?;
        info!("created default config at {}", cfg_path.display());
    }

    load_config().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_paths_end_with_eflycode() {
        assert!(default_config_dir().ends_with(".eflycode"));
        assert!(config_path().ends_with("config.toml"));
    }

    #[tokio::test]
    async fn loading_a_missing_path_returns_defaults() {
        let config = load_config_from(PathBuf::from("/nonexistent/eflycode-config.toml"))
            .await
            .unwrap();
        assert_eq!(config.model.name, Config::default().model.name);
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.model.name = "custom-model".to_string();
        save_config_to(&config, path.clone()).await.unwrap();

        let loaded = load_config_from(path).await.unwrap();
        assert_eq!(loaded.model.name, "custom-model");
    }

    #[test]
    fn deep_merge_overrides_leaves_but_keeps_untouched_sibling_keys() {
        let base: toml::Table = toml::from_str(
            r#"
            [model]
            name = "gpt-4o"
            max_iterations = 50
            "#,
        )
        .unwrap();
        let override_table: toml::Table = toml::from_str(
            r#"
            [model]
            name = "project-model"
            "#,
        )
        .unwrap();

        let merged = merge_toml_tables(base, override_table);
        let model = merged["model"].as_table().unwrap();
        assert_eq!(model["name"].as_str(), Some("project-model"));
        assert_eq!(model["max_iterations"].as_integer(), Some(50));
    }
}
