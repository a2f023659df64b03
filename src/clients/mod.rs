//! Boundaries to the external systems a diagnosis reads from.
//!
//! Each collaborator is a trait so a run can be assembled from live HTTP
//! clients, recorded evidence, or in-memory fakes. [`ClientBundle`] is built
//! once at process start and handed to every stage.

mod github;
mod local;
pub mod memory;
mod model;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use github::GitHubClient;
pub use local::{ConfigParameterStore, EnvSecretStore};
pub use model::MessagesClient;

/// Summary of one pipeline execution as listed by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub pipeline_execution_id: String,
    pub status: Option<String>,
    /// Timestamps without an offset are read as UTC.
    pub start_time: Option<String>,
    pub last_update_time: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionPage {
    pub executions: Vec<ExecutionSummary>,
    pub next_token: Option<String>,
}

/// Declared structure of a pipeline, as far as source resolution needs it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub stages: Vec<StageDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageDeclaration {
    pub name: String,
    #[serde(default)]
    pub actions: Vec<ActionDeclaration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDeclaration {
    pub name: String,
    pub category: String,
    pub provider: String,
    #[serde(default)]
    pub configuration: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogStream {
    pub log_stream_name: String,
    pub last_event_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEvent {
    /// Epoch milliseconds
    pub timestamp: i64,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<RawLogEvent>,
    pub next_forward_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryCredentials {
    pub repo_url: String,
    pub access_token: String,
}

/// One entry of a recursive repository tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    /// `blob` for files, `tree` for directories
    #[serde(rename = "type")]
    pub kind: String,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        self.kind == "blob"
    }
}

/// File contents as returned by the hosting API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileContent {
    #[serde(default)]
    pub content: String,
    pub encoding: Option<String>,
}

pub fn utc_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| chrono::NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

#[async_trait]
pub trait ExecutionRegistry: Send + Sync {
    async fn list_executions(
        &self,
        pipeline: &str,
        next_token: Option<&str>,
    ) -> Result<ExecutionPage>;

    async fn get_pipeline(&self, pipeline: &str) -> Result<PipelineDefinition>;
}

#[async_trait]
pub trait LogStore: Send + Sync {
    /// Stream with the most recent last-event time, if the group has any.
    async fn latest_stream(&self, log_group: &str) -> Result<Option<LogStream>>;

    async fn get_events(
        &self,
        log_group: &str,
        stream: &str,
        start_ms: i64,
        end_ms: i64,
        next_token: Option<&str>,
    ) -> Result<EventPage>;
}

#[async_trait]
pub trait ParameterStore: Send + Sync {
    /// `Ok(None)` when the key does not exist.
    async fn get_parameter(&self, key: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// `Ok(None)` when the secret does not exist.
    async fn get_secret(&self, secret_id: &str) -> Result<Option<RepositoryCredentials>>;
}

#[async_trait]
pub trait RepositoryHost: Send + Sync {
    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
    ) -> Result<Vec<TreeEntry>>;

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
        token: &str,
    ) -> Result<FileContent>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

/// Every external collaborator of one diagnosis run.
#[derive(Clone)]
pub struct ClientBundle {
    pub registry: Arc<dyn ExecutionRegistry>,
    pub logs: Arc<dyn LogStore>,
    pub parameters: Arc<dyn ParameterStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub repository: Arc<dyn RepositoryHost>,
    pub model: Arc<dyn LanguageModel>,
}
