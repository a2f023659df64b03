use std::fmt;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clients::{ClientBundle, PipelineDefinition};
use crate::config::Config;
use crate::error::Result;
use crate::event::{ErrorInfo, FailureEvent};
use crate::payload::{Payload, StageOutcome};

use super::correlator::CorrelationPolicy;
use super::log_analysis::LogAnalyzer;
use super::repository::RepositoryStructureAnalyzer;
use super::solution::{SolutionOutcome, SolutionSynthesizer};

const SOURCE_CATEGORY: &str = "Source";
const SOURCE_PROVIDER: &str = "CodeStarSourceConnection";
const BRANCH_KEY: &str = "BranchName";

/// Tunables of one diagnosis run.
#[derive(Debug, Clone)]
pub struct DiagnosisSettings {
    pub policy: CorrelationPolicy,
    pub secret_id: Option<String>,
    pub classification_max_tokens: u32,
    pub synthesis_max_tokens: u32,
}

impl Default for DiagnosisSettings {
    fn default() -> Self {
        Self {
            policy: CorrelationPolicy::default(),
            secret_id: None,
            classification_max_tokens: 50,
            synthesis_max_tokens: 2048,
        }
    }
}

impl DiagnosisSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            policy: config.logs.policy(),
            secret_id: config.secrets.resolve_secret_id(),
            classification_max_tokens: config.model.classification_max_tokens,
            synthesis_max_tokens: config.model.synthesis_max_tokens,
        }
    }
}

/// Entry payload: `{"event": <failure notification>}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiagnosisRequest {
    #[serde(default)]
    pub event: Option<FailureEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInfo {
    pub name: String,
    pub stage: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecommendations {
    pub solution: SolutionOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiagnosisResponse {
    Success {
        status: String,
        pipeline_info: PipelineInfo,
        solution_recommendations: SolutionRecommendations,
    },
    Error {
        status: String,
        message: String,
    },
}

impl DiagnosisResponse {
    fn error(message: impl ToString) -> Self {
        Self::Error {
            status: "error".to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiagnosisState {
    ExtractError,
    ResolveBranch,
    AnalyzeRepo,
    AnalyzeLogs,
    SynthesizeSolution,
    Aggregate,
    Done,
    Error,
}

impl fmt::Display for DiagnosisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExtractError => "EXTRACT_ERROR",
            Self::ResolveBranch => "RESOLVE_BRANCH",
            Self::AnalyzeRepo => "ANALYZE_REPO",
            Self::AnalyzeLogs => "ANALYZE_LOGS",
            Self::SynthesizeSolution => "SYNTHESIZE_SOLUTION",
            Self::Aggregate => "AGGREGATE",
            Self::Done => "DONE",
            Self::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Sequences every diagnosis stage for one failure and aggregates the
/// response.
///
/// Stage failures degrade the evidence passed downstream; only a request
/// without an event, or a failure outside any stage, ends in an error
/// response.
pub struct Orchestrator {
    clients: ClientBundle,
    settings: DiagnosisSettings,
}

impl Orchestrator {
    pub fn new(clients: ClientBundle, settings: DiagnosisSettings) -> Self {
        Self { clients, settings }
    }

    /// Diagnoses a raw JSON request.
    pub async fn handle_json(&self, request: Value) -> DiagnosisResponse {
        match serde_json::from_value::<DiagnosisRequest>(request) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                error!("Malformed diagnosis request: {e}");
                DiagnosisResponse::error(e)
            }
        }
    }

    pub async fn handle(&self, request: DiagnosisRequest) -> DiagnosisResponse {
        self.handle_at(request, Utc::now()).await
    }

    /// Diagnoses a request, using `now` as the end of the fallback window.
    pub async fn handle_at(
        &self,
        request: DiagnosisRequest,
        now: DateTime<Utc>,
    ) -> DiagnosisResponse {
        let Some(event) = request.event else {
            transition(DiagnosisState::Error);
            return DiagnosisResponse::error("Missing required information in payload: event");
        };

        match self.run(&event, now).await {
            Ok(response) => {
                transition(DiagnosisState::Done);
                response
            }
            Err(e) => {
                transition(DiagnosisState::Error);
                error!("Diagnosis failed: {e}");
                DiagnosisResponse::error(e)
            }
        }
    }

    async fn run(&self, event: &FailureEvent, now: DateTime<Utc>) -> Result<DiagnosisResponse> {
        transition(DiagnosisState::ExtractError);
        let error_info = ErrorInfo::from_event(event);
        info!(
            "Diagnosing failure of {} at stage {} ({})",
            error_info.pipeline_name, error_info.stage, error_info.error_code
        );

        transition(DiagnosisState::ResolveBranch);
        let branch = self.resolve_branch(event.detail.pipeline.as_deref()).await;
        info!("Branch name: {branch:?}");

        transition(DiagnosisState::AnalyzeRepo);
        let repository = RepositoryStructureAnalyzer::new(
            self.clients.secrets.as_ref(),
            self.clients.repository.as_ref(),
            self.settings.secret_id.as_deref(),
        )
        .analyze(branch.as_deref())
        .await;
        if let Err(e) = &repository {
            warn!("Repository analysis failed, continuing without repository context: {e}");
        }
        let repository = Payload::wrap(200, &StageOutcome::from(repository))?;

        transition(DiagnosisState::AnalyzeLogs);
        let evidence = LogAnalyzer::new(&self.clients, self.settings.policy)
            .analyze(&error_info.pipeline_name, event, now)
            .await;
        if let Err(e) = &evidence {
            warn!("Log analysis failed, continuing without log evidence: {e}");
        }
        let evidence = Payload::wrap(200, &StageOutcome::from(evidence))?;

        transition(DiagnosisState::SynthesizeSolution);
        let solution = SolutionSynthesizer::new(&self.clients, &self.settings)
            .solve(evidence, repository)
            .await;

        transition(DiagnosisState::Aggregate);
        Ok(DiagnosisResponse::Success {
            status: "success".to_string(),
            pipeline_info: PipelineInfo {
                name: error_info.pipeline_name,
                stage: error_info.stage,
            },
            solution_recommendations: SolutionRecommendations { solution },
        })
    }

    /// Branch of the pipeline's source action, if it has one.
    async fn resolve_branch(&self, pipeline: Option<&str>) -> Option<String> {
        let Some(pipeline) = pipeline.filter(|p| !p.is_empty()) else {
            warn!("Pipeline name not found in event");
            return None;
        };

        match self.clients.registry.get_pipeline(pipeline).await {
            Ok(definition) => source_branch(&definition),
            Err(e) => {
                warn!("Error getting pipeline source branch: {e}");
                None
            }
        }
    }
}

/// Branch configured on the first stage's source-connection action.
fn source_branch(definition: &PipelineDefinition) -> Option<String> {
    definition
        .stages
        .first()?
        .actions
        .iter()
        .find(|a| a.category == SOURCE_CATEGORY && a.provider == SOURCE_PROVIDER)?
        .configuration
        .get(BRANCH_KEY)
        .cloned()
}

fn transition(state: DiagnosisState) {
    debug!("Diagnosis state: {state}");
}
