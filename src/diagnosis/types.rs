use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Start and end of a time span, both UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBounds {
    pub fn start_ms(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_ms(&self) -> i64 {
        self.end.timestamp_millis()
    }
}

/// Time span of one failed execution, or unknown.
///
/// Both instants are present or both absent; an unknown window is a valid
/// state and consumers fall back to a lookback ending now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionWindow {
    bounds: Option<TimeBounds>,
}

impl ExecutionWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            bounds: Some(TimeBounds { start, end }),
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn bounds(&self) -> Option<TimeBounds> {
        self.bounds
    }

    pub fn is_known(&self) -> bool {
        self.bounds.is_some()
    }

    /// Known bounds, or `[now - lookback, now]`.
    pub fn or_lookback(&self, now: DateTime<Utc>, lookback: Duration) -> TimeBounds {
        self.bounds.unwrap_or(TimeBounds {
            start: now - lookback,
            end: now,
        })
    }

    pub fn to_timeframe(&self) -> ExecutionTimeframe {
        ExecutionTimeframe {
            start_time: self.bounds.map(|b| b.start.to_rfc3339()),
            end_time: self.bounds.map(|b| b.end.to_rfc3339()),
        }
    }
}

/// Serialized form of an [`ExecutionWindow`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTimeframe {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Orchestration lifecycle events: few, high-signal
    Event,
    /// The tool's own output: voluminous
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogGroup {
    pub name: String,
    pub kind: LogKind,
}

/// Log groups holding the evidence of one failed action, in lookup order.
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogGroupSet(Vec<LogGroup>);

impl LogGroupSet {
    /// `None` when `groups` is empty.
    pub fn new(groups: Vec<LogGroup>) -> Option<Self> {
        (!groups.is_empty()).then_some(Self(groups))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LogGroup> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|g| g.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub log_group: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: LogKind,
}

/// A log group whose evidence could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGroup {
    pub log_group: String,
    pub error: String,
}

/// Correlated evidence of one failure, sorted by timestamp.
///
/// `logs.len() == total_events + min(total_native, retained native)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBundle {
    pub logs: Vec<LogEvent>,
    pub total_events: usize,
    pub total_native: usize,
    pub log_summary: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_groups: Vec<SkippedGroup>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeafMarker {
    File,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Leaf(LeafMarker),
    Directory(IndexMap<String, TreeNode>),
}

/// Nested view of a repository: segment to file marker or subdirectory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoTree(IndexMap<String, TreeNode>);

impl RepoTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a path. Directories already present keep their children.
    pub fn insert(&mut self, path: &str, is_file: bool) {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };

        let mut level = &mut self.0;
        for segment in parents {
            let node = level
                .entry((*segment).to_string())
                .or_insert_with(|| TreeNode::Directory(IndexMap::new()));
            if let TreeNode::Leaf(_) = node {
                *node = TreeNode::Directory(IndexMap::new());
            }
            let TreeNode::Directory(children) = node else {
                return;
            };
            level = children;
        }

        if is_file {
            level.insert((*last).to_string(), TreeNode::Leaf(LeafMarker::File));
        } else {
            level
                .entry((*last).to_string())
                .or_insert_with(|| TreeNode::Directory(IndexMap::new()));
        }
    }

    pub fn get(&self, segment: &str) -> Option<&TreeNode> {
        self.0.get(segment)
    }
}

/// Repository files grouped by role. A path may appear in several groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileClassification {
    pub config_files: Vec<String>,
    pub source_files: Vec<String>,
    pub build_files: Vec<String>,
    pub deployment_files: Vec<String>,
}
