use serde::{Deserialize, Serialize};

/// Raw pipeline failure notification as delivered by the event bus.
///
/// Every field is optional: notifications for different providers carry
/// different subsets, and missing values are handled by each stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailureEvent {
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub detail: EventDetail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct EventDetail {
    pub pipeline: Option<String>,
    pub execution_id: Option<String>,
    pub stage: Option<String>,
    /// Action name as reported on action-level notifications
    pub action: Option<String>,
    pub action_name: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "type")]
    pub action_type: Option<ActionType>,
    pub execution_result: Option<ExecutionResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionType {
    pub provider: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExecutionResult {
    pub error_code: Option<String>,
    pub external_execution_summary: Option<String>,
}

impl EventDetail {
    /// Action name used for evidence lookup: `action`, then `action-name`.
    pub fn failed_action(&self) -> Option<&str> {
        self.action
            .as_deref()
            .or(self.action_name.as_deref())
            .filter(|name| !name.is_empty())
    }

    pub fn provider(&self) -> Option<&str> {
        self.action_type
            .as_ref()
            .and_then(|t| t.provider.as_deref())
            .filter(|provider| !provider.is_empty())
    }
}

/// Normalized error record extracted once from a failure notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub pipeline_name: String,
    pub stage: String,
    pub action: String,
    pub timestamp: String,
    pub error_code: String,
    pub error_summary: String,
}

impl ErrorInfo {
    pub fn from_event(event: &FailureEvent) -> Self {
        let detail = &event.detail;
        let result = detail.execution_result.clone().unwrap_or_default();

        Self {
            pipeline_name: detail.pipeline.clone().unwrap_or_default(),
            stage: detail.stage.clone().unwrap_or_default(),
            action: detail.action_name.clone().unwrap_or_default(),
            timestamp: event.time.clone().unwrap_or_default(),
            error_code: result.error_code.unwrap_or_default(),
            error_summary: result.external_execution_summary.unwrap_or_default(),
        }
    }
}
