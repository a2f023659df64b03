use log::{error, info, warn};

use crate::clients::{utc_timestamp, ExecutionRegistry, ExecutionSummary};
use crate::error::Result;
use crate::event::EventDetail;

use super::types::ExecutionWindow;

/// Bounds a failed run by the start and last-update time of its execution.
pub struct ExecutionTimeframeResolver<'a> {
    registry: &'a dyn ExecutionRegistry,
}

impl<'a> ExecutionTimeframeResolver<'a> {
    pub fn new(registry: &'a dyn ExecutionRegistry) -> Self {
        Self { registry }
    }

    /// Window of the execution named by the event.
    ///
    /// Never fails: missing identifiers, an unknown execution, or a registry
    /// error all yield an unknown window.
    pub async fn resolve(&self, detail: &EventDetail) -> ExecutionWindow {
        let (Some(pipeline), Some(execution_id)) =
            (detail.pipeline.as_deref(), detail.execution_id.as_deref())
        else {
            warn!("Missing pipeline name or execution ID");
            return ExecutionWindow::unknown();
        };

        match self.find_execution(pipeline, execution_id).await {
            Ok(Some(execution)) => Self::window_of(&execution),
            Ok(None) => {
                warn!("No executions found for pipeline {pipeline} with ID {execution_id}");
                ExecutionWindow::unknown()
            }
            Err(e) => {
                error!("Error getting pipeline execution timeframe: {e}");
                ExecutionWindow::unknown()
            }
        }
    }

    async fn find_execution(
        &self,
        pipeline: &str,
        execution_id: &str,
    ) -> Result<Option<ExecutionSummary>> {
        let mut next_token: Option<String> = None;
        let mut scanned = 0;

        loop {
            let page = self
                .registry
                .list_executions(pipeline, next_token.as_deref())
                .await?;
            if page.executions.is_empty() {
                break;
            }
            scanned += page.executions.len();

            if let Some(found) = page
                .executions
                .into_iter()
                .find(|e| e.pipeline_execution_id == execution_id)
            {
                info!("Found execution {execution_id} after scanning {scanned} executions");
                return Ok(Some(found));
            }

            match page.next_token {
                Some(token) if Some(&token) != next_token.as_ref() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(None)
    }

    fn window_of(execution: &ExecutionSummary) -> ExecutionWindow {
        let start = execution.start_time.as_deref().and_then(utc_timestamp);
        let end = execution.last_update_time.as_deref().and_then(utc_timestamp);

        match (start, end) {
            (Some(start), Some(end)) => {
                info!(
                    "Pipeline execution timeframe (UTC): {} to {}",
                    start.to_rfc3339(),
                    end.to_rfc3339()
                );
                ExecutionWindow::new(start, end)
            }
            _ => {
                warn!(
                    "Execution {} has no usable timestamps",
                    execution.pipeline_execution_id
                );
                ExecutionWindow::unknown()
            }
        }
    }
}
