use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::diagnosis::CorrelationPolicy;

/// Configuration file structure for pipedoctor.
///
/// Holds the endpoints and budgets used by one diagnosis run. Configuration
/// files are loaded from the current directory, the user config directory,
/// or a specified path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Version-control hosting API settings
    #[serde(default)]
    pub github: GitHubConfig,

    /// Language-model endpoint settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Log correlation budgets
    #[serde(default)]
    pub logs: LogsConfig,

    /// Secret store settings
    #[serde(default)]
    pub secrets: SecretsConfig,

    /// Local configuration store: parameter key to value
    #[serde(default)]
    pub parameters: IndexMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GitHubConfig {
    /// GitHub API base URL
    #[serde(default = "default_github_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_data_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelConfig {
    /// Messages endpoint URL
    #[serde(default = "default_model_endpoint")]
    pub endpoint: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model_id")]
    pub model_id: String,

    /// API key; falls back to `PIPEDOCTOR_MODEL_API_KEY`
    pub api_key: Option<String>,

    /// Output budget for the suspect-file classification call
    #[serde(default = "default_classification_max_tokens")]
    pub classification_max_tokens: u32,

    /// Output budget for the remediation synthesis call
    #[serde(default = "default_synthesis_max_tokens")]
    pub synthesis_max_tokens: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogsConfig {
    /// Window used when the execution timeframe is unknown
    #[serde(default = "default_lookback_minutes")]
    pub default_lookback_minutes: i64,

    /// Native-log window ending at the failure instant
    #[serde(default = "default_native_window_minutes")]
    pub native_window_minutes: i64,

    /// Native events fetched per group before pagination stops
    #[serde(default = "default_native_fetch_cap")]
    pub native_fetch_cap: usize,

    /// Native events kept in the final bundle
    #[serde(default = "default_native_retained")]
    pub native_retained: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SecretsConfig {
    /// Secret holding `{repo_url, access_token}`; falls back to `SECRET_ID`
    pub secret_id: Option<String>,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            base_url: default_github_base_url(),
            timeout_secs: default_data_timeout_secs(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_model_endpoint(),
            model_id: default_model_id(),
            api_key: None,
            classification_max_tokens: default_classification_max_tokens(),
            synthesis_max_tokens: default_synthesis_max_tokens(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_lookback_minutes: default_lookback_minutes(),
            native_window_minutes: default_native_window_minutes(),
            native_fetch_cap: default_native_fetch_cap(),
            native_retained: default_native_retained(),
        }
    }
}

fn default_github_base_url() -> String {
    "https://api.github.com".to_string()
}

fn default_model_endpoint() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_model_id() -> String {
    "claude-3-sonnet-20240229".to_string()
}

fn default_data_timeout_secs() -> u64 {
    10
}

fn default_model_timeout_secs() -> u64 {
    300
}

fn default_classification_max_tokens() -> u32 {
    50
}

fn default_synthesis_max_tokens() -> u32 {
    2048
}

fn default_lookback_minutes() -> i64 {
    60
}

fn default_native_window_minutes() -> i64 {
    30
}

fn default_native_fetch_cap() -> usize {
    100
}

fn default_native_retained() -> usize {
    50
}

impl GitHubConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Configured key, or the `PIPEDOCTOR_MODEL_API_KEY` environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("PIPEDOCTOR_MODEL_API_KEY").ok())
            .filter(|key| !key.is_empty())
    }
}

impl LogsConfig {
    pub fn policy(&self) -> CorrelationPolicy {
        CorrelationPolicy {
            default_lookback: chrono::Duration::minutes(self.default_lookback_minutes),
            native_window: chrono::Duration::minutes(self.native_window_minutes),
            native_fetch_cap: self.native_fetch_cap,
            native_retained: self.native_retained,
        }
    }
}

impl SecretsConfig {
    /// Configured id, or the `SECRET_ID` environment variable.
    pub fn resolve_secret_id(&self) -> Option<String> {
        self.secret_id
            .clone()
            .or_else(|| std::env::var("SECRET_ID").ok())
            .filter(|id| !id.is_empty())
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./pipedoctor.toml
    /// 3. ./pipedoctor.json
    /// 4. ./pipedoctor.yaml
    /// 5. ./pipedoctor.yml
    /// 6. `<user config dir>/pipedoctor/config.toml`
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            if !path.exists() {
                log::warn!("Config file {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            return Self::load_from_path(path);
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                return Self::load_from_path(&candidate);
            }
        }

        Ok(Self::default())
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates: Vec<PathBuf> = [
            "pipedoctor.toml",
            "pipedoctor.json",
            "pipedoctor.yaml",
            "pipedoctor.yml",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("pipedoctor").join("config.toml"));
        }

        candidates
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => toml::from_str(&contents)
                .or_else(|_| serde_json::from_str(&contents))
                .or_else(|_| serde_yaml::from_str(&contents))
                .with_context(|| format!("Failed to parse config file: {}", path.display())),
        }
    }
}
