//! In-memory implementations of the boundary traits.
//!
//! Used for offline replay of recorded evidence (see [`EvidenceSnapshot`])
//! and as test doubles. They paginate and record requests the same way the
//! live services are consumed, so stage logic is exercised unchanged.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{DiagnosisError, Result};

use super::{
    EventPage, ExecutionPage, ExecutionRegistry, ExecutionSummary, FileContent, LanguageModel,
    LogStore, LogStream, ParameterStore, PipelineDefinition, RawLogEvent, RepositoryCredentials,
    RepositoryHost, SecretStore, TreeEntry,
};

const DEFAULT_PAGE_SIZE: usize = 10_000;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn page_offset(token: Option<&str>) -> usize {
    token.and_then(|t| t.parse().ok()).unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Recorded evidence
// ---------------------------------------------------------------------------

/// Recorded registry and log-store state for offline diagnosis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvidenceSnapshot {
    #[serde(default)]
    pub pipelines: HashMap<String, PipelineRecord>,
    /// Log group name to its streams
    #[serde(default)]
    pub log_groups: HashMap<String, Vec<StreamRecord>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRecord {
    #[serde(default)]
    pub definition: PipelineDefinition,
    #[serde(default)]
    pub executions: Vec<ExecutionSummary>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamRecord {
    pub name: String,
    #[serde(default)]
    pub events: Vec<RawLogEvent>,
}

impl EvidenceSnapshot {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read evidence snapshot: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse evidence snapshot: {}", path.display()))
    }

    pub fn into_stores(self) -> (MemoryRegistry, MemoryLogStore) {
        let mut registry = MemoryRegistry::new();
        for (name, record) in self.pipelines {
            registry = registry
                .with_definition(&name, record.definition)
                .with_executions(&name, record.executions);
        }

        let mut logs = MemoryLogStore::new();
        for (group, streams) in self.log_groups {
            for stream in streams {
                logs = logs.with_stream(&group, &stream.name, stream.events);
            }
        }

        (registry, logs)
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistry
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct MemoryRegistry {
    executions: HashMap<String, Vec<ExecutionSummary>>,
    definitions: HashMap<String, PipelineDefinition>,
    page_size: usize,
    pages_served: Mutex<usize>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self {
            executions: HashMap::new(),
            definitions: HashMap::new(),
            page_size: DEFAULT_PAGE_SIZE,
            pages_served: Mutex::new(0),
        }
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_executions(mut self, pipeline: &str, executions: Vec<ExecutionSummary>) -> Self {
        self.executions
            .entry(pipeline.to_string())
            .or_default()
            .extend(executions);
        self
    }

    pub fn with_definition(mut self, pipeline: &str, definition: PipelineDefinition) -> Self {
        self.definitions.insert(pipeline.to_string(), definition);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn pages_served(&self) -> usize {
        *locked(&self.pages_served)
    }
}

#[async_trait]
impl ExecutionRegistry for MemoryRegistry {
    async fn list_executions(
        &self,
        pipeline: &str,
        next_token: Option<&str>,
    ) -> Result<ExecutionPage> {
        *locked(&self.pages_served) += 1;

        let Some(executions) = self.executions.get(pipeline) else {
            return Err(DiagnosisError::Api {
                status: 404,
                message: format!("Pipeline {pipeline} not found"),
            });
        };

        let offset = page_offset(next_token);
        let end = (offset + self.page_size).min(executions.len());
        let page = executions.get(offset..end).unwrap_or_default().to_vec();

        Ok(ExecutionPage {
            executions: page,
            next_token: (end < executions.len()).then(|| end.to_string()),
        })
    }

    async fn get_pipeline(&self, pipeline: &str) -> Result<PipelineDefinition> {
        self.definitions
            .get(pipeline)
            .cloned()
            .ok_or_else(|| DiagnosisError::Api {
                status: 404,
                message: format!("Pipeline {pipeline} not found"),
            })
    }
}

// ---------------------------------------------------------------------------
// MemoryLogStore
// ---------------------------------------------------------------------------

/// One `get_events` call as received by [`MemoryLogStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRequest {
    pub log_group: String,
    pub stream: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

#[derive(Debug)]
pub struct MemoryLogStore {
    groups: HashMap<String, Vec<StreamRecord>>,
    failing: HashSet<String>,
    page_size: usize,
    requests: Mutex<Vec<EventRequest>>,
    stream_lookups: Mutex<Vec<String>>,
}

impl Default for MemoryLogStore {
    fn default() -> Self {
        Self {
            groups: HashMap::new(),
            failing: HashSet::new(),
            page_size: DEFAULT_PAGE_SIZE,
            requests: Mutex::new(Vec::new()),
            stream_lookups: Mutex::new(Vec::new()),
        }
    }
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stream(mut self, log_group: &str, stream: &str, events: Vec<RawLogEvent>) -> Self {
        self.groups
            .entry(log_group.to_string())
            .or_default()
            .push(StreamRecord {
                name: stream.to_string(),
                events,
            });
        self
    }

    /// Every call against this group fails with a server error.
    pub fn with_failing_group(mut self, log_group: &str) -> Self {
        self.failing.insert(log_group.to_string());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn requests(&self) -> Vec<EventRequest> {
        locked(&self.requests).clone()
    }

    /// Number of calls of any kind received.
    pub fn call_count(&self) -> usize {
        locked(&self.requests).len() + locked(&self.stream_lookups).len()
    }

    fn check_available(&self, log_group: &str) -> Result<()> {
        if self.failing.contains(log_group) {
            return Err(DiagnosisError::Api {
                status: 500,
                message: format!("Log group {log_group} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn latest_stream(&self, log_group: &str) -> Result<Option<LogStream>> {
        locked(&self.stream_lookups).push(log_group.to_string());
        self.check_available(log_group)?;

        let latest = self
            .groups
            .get(log_group)
            .into_iter()
            .flatten()
            .map(|stream| LogStream {
                log_stream_name: stream.name.clone(),
                last_event_timestamp: stream.events.iter().map(|e| e.timestamp).max(),
            })
            .max_by_key(|stream| stream.last_event_timestamp);

        Ok(latest)
    }

    /// Events with `start_ms <= timestamp <= end_ms`. Like the live service,
    /// a forward token is always returned; an empty page marks the end.
    async fn get_events(
        &self,
        log_group: &str,
        stream: &str,
        start_ms: i64,
        end_ms: i64,
        next_token: Option<&str>,
    ) -> Result<EventPage> {
        locked(&self.requests).push(EventRequest {
            log_group: log_group.to_string(),
            stream: stream.to_string(),
            start_ms,
            end_ms,
        });
        self.check_available(log_group)?;

        let in_range: Vec<RawLogEvent> = self
            .groups
            .get(log_group)
            .into_iter()
            .flatten()
            .filter(|s| s.name == stream)
            .flat_map(|s| s.events.iter())
            .filter(|e| e.timestamp >= start_ms && e.timestamp <= end_ms)
            .cloned()
            .collect();

        let offset = page_offset(next_token);
        let end = (offset + self.page_size).min(in_range.len());
        let events = in_range.get(offset..end).unwrap_or_default().to_vec();

        Ok(EventPage {
            events,
            next_forward_token: Some(end.max(offset).to_string()),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryParameterStore / MemorySecretStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryParameterStore {
    values: HashMap<String, String>,
    lookups: Mutex<Vec<String>>,
}

impl MemoryParameterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, key: &str, value: &str) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn lookups(&self) -> Vec<String> {
        locked(&self.lookups).clone()
    }
}

#[async_trait]
impl ParameterStore for MemoryParameterStore {
    async fn get_parameter(&self, key: &str) -> Result<Option<String>> {
        locked(&self.lookups).push(key.to_string());
        Ok(self.values.get(key).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: HashMap<String, RepositoryCredentials>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_id: &str, repo_url: &str, access_token: &str) -> Self {
        self.secrets.insert(
            secret_id.to_string(),
            RepositoryCredentials {
                repo_url: repo_url.to_string(),
                access_token: access_token.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<Option<RepositoryCredentials>> {
        Ok(self.secrets.get(secret_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryRepositoryHost
// ---------------------------------------------------------------------------

/// One `get_file` call as received by [`MemoryRepositoryHost`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
    pub path: String,
    pub git_ref: Option<String>,
}

#[derive(Debug, Default)]
pub struct MemoryRepositoryHost {
    owner: String,
    repo: String,
    branches: HashMap<String, Vec<TreeEntry>>,
    files: HashMap<String, FileContent>,
    file_requests: Mutex<Vec<FileRequest>>,
}

impl MemoryRepositoryHost {
    pub fn new(owner: &str, repo: &str) -> Self {
        Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            ..Self::default()
        }
    }

    pub fn with_branch(mut self, branch: &str, paths: &[(&str, &str)]) -> Self {
        let tree = paths
            .iter()
            .map(|(path, kind)| TreeEntry {
                path: (*path).to_string(),
                kind: (*kind).to_string(),
            })
            .collect();
        self.branches.insert(branch.to_string(), tree);
        self
    }

    pub fn with_file(mut self, path: &str, content: FileContent) -> Self {
        self.files.insert(path.to_string(), content);
        self
    }

    pub fn file_requests(&self) -> Vec<FileRequest> {
        locked(&self.file_requests).clone()
    }

    fn not_found(what: &str) -> DiagnosisError {
        DiagnosisError::Api {
            status: 404,
            message: format!("{what} not found"),
        }
    }
}

#[async_trait]
impl RepositoryHost for MemoryRepositoryHost {
    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        _token: &str,
    ) -> Result<Vec<TreeEntry>> {
        if owner != self.owner || repo != self.repo {
            return Err(Self::not_found(&format!("Repository {owner}/{repo}")));
        }
        self.branches
            .get(branch)
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("Branch {branch}")))
    }

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
        _token: &str,
    ) -> Result<FileContent> {
        locked(&self.file_requests).push(FileRequest {
            path: path.to_string(),
            git_ref: git_ref.map(ToString::to_string),
        });

        if owner != self.owner || repo != self.repo {
            return Err(Self::not_found(&format!("Repository {owner}/{repo}")));
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(&format!("File {path}")))
    }
}

// ---------------------------------------------------------------------------
// ScriptedModel
// ---------------------------------------------------------------------------

/// Language model that replays queued answers in order.
///
/// Once the queue is exhausted every call fails.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    answers: Mutex<VecDeque<std::result::Result<String, String>>>,
    prompts: Mutex<Vec<(String, u32)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answering(self, answer: &str) -> Self {
        locked(&self.answers).push_back(Ok(answer.to_string()));
        self
    }

    pub fn failing(self, message: &str) -> Self {
        locked(&self.answers).push_back(Err(message.to_string()));
        self
    }

    /// Prompts received so far with their output-token bounds.
    pub fn prompts(&self) -> Vec<(String, u32)> {
        locked(&self.prompts).clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn invoke(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        locked(&self.prompts).push((prompt.to_string(), max_tokens));

        match locked(&self.answers).pop_front() {
            Some(Ok(answer)) => Ok(answer),
            Some(Err(message)) => Err(DiagnosisError::ModelInvocation(message)),
            None => Err(DiagnosisError::ModelInvocation(
                "no scripted answer left".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: i64) -> RawLogEvent {
        RawLogEvent {
            timestamp,
            message: format!("line {timestamp}"),
        }
    }

    #[tokio::test]
    async fn registry_paginates_executions() {
        let executions = (0..5)
            .map(|i| ExecutionSummary {
                pipeline_execution_id: format!("exec-{i}"),
                status: Some("Failed".to_string()),
                start_time: None,
                last_update_time: None,
            })
            .collect();
        let registry = MemoryRegistry::new()
            .with_executions("app", executions)
            .with_page_size(2);

        let first = registry.list_executions("app", None).await.unwrap();
        assert_eq!(first.executions.len(), 2);
        assert_eq!(first.next_token.as_deref(), Some("2"));

        let last = registry.list_executions("app", Some("4")).await.unwrap();
        assert_eq!(last.executions.len(), 1);
        assert!(last.next_token.is_none());
    }

    #[tokio::test]
    async fn latest_stream_is_the_most_recently_active() {
        let store = MemoryLogStore::new()
            .with_stream("group", "old", vec![event(10), event(20)])
            .with_stream("group", "new", vec![event(15), event(30)]);

        let latest = store.latest_stream("group").await.unwrap().unwrap();
        assert_eq!(latest.log_stream_name, "new");
        assert_eq!(latest.last_event_timestamp, Some(30));
        assert!(store.latest_stream("empty").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn log_store_filters_by_range_and_ends_with_empty_page() {
        let store = MemoryLogStore::new()
            .with_stream("group", "s", (0..10).map(|i| event(i * 10)).collect())
            .with_page_size(3);

        let first = store.get_events("group", "s", 20, 70, None).await.unwrap();
        assert_eq!(
            first.events.iter().map(|e| e.timestamp).collect::<Vec<_>>(),
            vec![20, 30, 40]
        );

        let second = store
            .get_events("group", "s", 20, 70, first.next_forward_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.events.len(), 3);

        let third = store
            .get_events("group", "s", 20, 70, second.next_forward_token.as_deref())
            .await
            .unwrap();
        assert!(third.events.is_empty());
        assert_eq!(store.requests().len(), 3);
    }

    #[tokio::test]
    async fn scripted_model_replays_then_fails() {
        let model = ScriptedModel::new().answering("a").failing("down");

        assert_eq!(model.invoke("p1", 5).await.unwrap(), "a");
        assert!(model.invoke("p2", 5).await.is_err());
        assert!(model.invoke("p3", 5).await.is_err());
        assert_eq!(model.prompts().len(), 3);
    }

    #[test]
    fn snapshot_builds_stores() {
        let snapshot: EvidenceSnapshot = serde_json::from_value(serde_json::json!({
            "pipelines": {
                "app": {
                    "executions": [{
                        "pipelineExecutionId": "exec-1",
                        "startTime": "2024-05-01T12:00:00Z",
                        "lastUpdateTime": "2024-05-01T12:05:00Z"
                    }]
                }
            },
            "log_groups": {
                "/aws/codebuild/app": [
                    { "name": "run-1", "events": [{ "timestamp": 1, "message": "x" }] }
                ]
            }
        }))
        .unwrap();

        let (registry, logs) = snapshot.into_stores();
        assert_eq!(registry.executions["app"].len(), 1);
        assert_eq!(logs.groups["/aws/codebuild/app"][0].events.len(), 1);
    }
}
