use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::clients::ClientBundle;
use crate::error::Result;
use crate::event::FailureEvent;

use super::correlator::{CorrelationPolicy, LogCorrelator};
use super::log_groups::LogGroupResolver;
use super::timeframe::ExecutionTimeframeResolver;
use super::types::{ExecutionTimeframe, LogBundle};

/// Log evidence of one failure with the window and groups it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogAnalysis {
    pub status: String,
    pub log_streams: LogBundle,
    pub execution_timeframe: ExecutionTimeframe,
    pub log_groups_list: Vec<String>,
    pub failed_stage: Option<String>,
    pub failed_action: Option<String>,
}

/// Runs timeframe resolution, log-group resolution, and correlation in
/// sequence.
pub struct LogAnalyzer<'a> {
    clients: &'a ClientBundle,
    policy: CorrelationPolicy,
}

impl<'a> LogAnalyzer<'a> {
    pub fn new(clients: &'a ClientBundle, policy: CorrelationPolicy) -> Self {
        Self { clients, policy }
    }

    /// # Errors
    ///
    /// Fails only when the log groups cannot be resolved; an unknown
    /// window and unreachable groups degrade the evidence instead.
    pub async fn analyze(
        &self,
        pipeline_name: &str,
        event: &FailureEvent,
        now: DateTime<Utc>,
    ) -> Result<LogAnalysis> {
        let detail = &event.detail;

        let window = ExecutionTimeframeResolver::new(self.clients.registry.as_ref())
            .resolve(detail)
            .await;

        let groups = LogGroupResolver::new(self.clients.parameters.as_ref())
            .resolve(pipeline_name, detail)
            .await?;

        let bundle = LogCorrelator::new(self.clients.logs.as_ref(), self.policy)
            .correlate(&groups, window, now)
            .await;
        info!("{}", bundle.log_summary);

        Ok(LogAnalysis {
            status: "success".to_string(),
            log_streams: bundle,
            execution_timeframe: window.to_timeframe(),
            log_groups_list: groups.names(),
            failed_stage: detail.stage.clone(),
            failed_action: detail.action_name.clone(),
        })
    }
}
