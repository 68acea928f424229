//! Configuration parsing and validation.
//!
//! EntireContext is configured via a TOML file at `<repo>/.entirecontext/config.toml`.
//! It is entirely optional — every field has a default — so a freshly
//! `init`ed repo works with no config file at all.
//!
//! # Sections
//!
//! - `[capture]` — auto-capture switch and `[capture.exclusions]` filter rules
//! - `[filtering.query_redaction]` — display-time redaction
//! - `[sync]` — shadow branch name and export redaction
//! - `[embedding]` — optional semantic search backend

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub filtering: FilteringConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CaptureConfig {
    #[serde(default = "default_true")]
    pub auto_capture: bool,
    #[serde(default)]
    pub exclusions: ExclusionsConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            auto_capture: true,
            exclusions: ExclusionsConfig::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ExclusionsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub content_patterns: Vec<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub redact_patterns: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FilteringConfig {
    #[serde(default)]
    pub query_redaction: QueryRedactionConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct QueryRedactionConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default = "default_replacement")]
    pub replacement: String,
}

fn default_replacement() -> String {
    "[FILTERED]".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_shadow_branch")]
    pub shadow_branch: String,
    #[serde(default = "default_true")]
    pub redact_on_export: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            shadow_branch: default_shadow_branch(),
            redact_on_export: true,
        }
    }
}

fn default_shadow_branch() -> String {
    "entirecontext-shadow".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}

fn default_true() -> bool {
    true
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Load config from `<repo>/.entirecontext/config.toml`. Missing file is not
/// an error — returns defaults. A present-but-unparsable file is.
pub fn load_config(repo_root: &Path) -> Result<Config> {
    let path = config_path(repo_root);
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn config_path(repo_root: &Path) -> PathBuf {
    repo_root.join(".entirecontext").join("config.toml")
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "local" => {}
        other => anyhow::bail!("unknown embedding provider: '{other}'"),
    }

    Ok(())
}

/// Get a dotted config key for `ec config <key>`. Returns `None` if the key
/// doesn't resolve to a recognized leaf.
pub fn get_key(config: &Config, key: &str) -> Option<String> {
    match key {
        "capture.auto_capture" => Some(config.capture.auto_capture.to_string()),
        "capture.exclusions.enabled" => Some(config.capture.exclusions.enabled.to_string()),
        "filtering.query_redaction.enabled" => {
            Some(config.filtering.query_redaction.enabled.to_string())
        }
        "sync.shadow_branch" => Some(config.sync.shadow_branch.clone()),
        "sync.redact_on_export" => Some(config.sync.redact_on_export.to_string()),
        "embedding.provider" => Some(config.embedding.provider.clone()),
        _ => None,
    }
}

/// Set a dotted config key for `ec config <key> <value>`. Parses `value`
/// according to the leaf's type and validates the result before returning,
/// so a bad set never lands a config that would fail to load next time.
pub fn set_key(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "capture.auto_capture" => config.capture.auto_capture = parse_bool(key, value)?,
        "capture.exclusions.enabled" => config.capture.exclusions.enabled = parse_bool(key, value)?,
        "filtering.query_redaction.enabled" => {
            config.filtering.query_redaction.enabled = parse_bool(key, value)?
        }
        "sync.shadow_branch" => config.sync.shadow_branch = value.to_string(),
        "sync.redact_on_export" => config.sync.redact_on_export = parse_bool(key, value)?,
        "embedding.provider" => config.embedding.provider = value.to_string(),
        _ => anyhow::bail!("unrecognized config key: '{key}'"),
    }
    validate(config)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    value
        .parse::<bool>()
        .with_context(|| format!("'{key}' expects a boolean (true/false), got '{value}'"))
}

/// Persist `config` as TOML to `<repo>/.entirecontext/config.toml`.
pub fn save_config(repo_root: &Path, config: &Config) -> Result<()> {
    let path = config_path(repo_root);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml = toml::to_string_pretty(config).with_context(|| "failed to serialize config")?;
    std::fs::write(&path, toml).with_context(|| format!("failed to write config file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert!(config.capture.auto_capture);
        assert!(!config.capture.exclusions.enabled);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.sync.shadow_branch, "entirecontext-shadow");
    }

    #[test]
    fn embedding_enabled_without_dims_fails() {
        let mut config = Config::default();
        config.embedding.provider = "openai".to_string();
        config.embedding.model = Some("text-embedding-3-small".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn set_key_updates_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        set_key(&mut config, "sync.shadow_branch", "my-shadow").unwrap();
        assert_eq!(config.sync.shadow_branch, "my-shadow");

        save_config(dir.path(), &config).unwrap();
        let reloaded = load_config(dir.path()).unwrap();
        assert_eq!(reloaded.sync.shadow_branch, "my-shadow");
    }

    #[test]
    fn set_key_rejects_bad_bool() {
        let mut config = Config::default();
        assert!(set_key(&mut config, "capture.auto_capture", "not-a-bool").is_err());
    }

    #[test]
    fn set_key_rejects_unknown_key() {
        let mut config = Config::default();
        assert!(set_key(&mut config, "nonexistent.key", "x").is_err());
    }

    #[test]
    fn parses_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".entirecontext")).unwrap();
        std::fs::write(
            config_path(dir.path()),
            r#"
            [capture.exclusions]
            enabled = true
            content_patterns = ["password\\s*="]
            "#,
        )
        .unwrap();
        let config = load_config(dir.path()).unwrap();
        assert!(config.capture.exclusions.enabled);
        assert_eq!(config.capture.exclusions.content_patterns.len(), 1);
    }
}
