//! Failure diagnosis: from a pipeline failure notification to a remediation
//! plan.
//!
//! Stages run strictly in sequence. Each one turns its own failure into a
//! degraded result, so [`Orchestrator`] always produces a response.

mod context;
mod correlator;
mod log_analysis;
mod log_groups;
mod orchestrator;
mod repository;
mod solution;
mod suspect;
mod timeframe;
mod types;

pub use context::{DiagnosisContext, EvidencePayload, RepositoryPayload};
pub use correlator::{assemble, CorrelationPolicy, LogCorrelator};
pub use log_analysis::{LogAnalysis, LogAnalyzer};
pub use log_groups::{parameter_key, LogGroupResolver};
pub use orchestrator::{
    DiagnosisRequest, DiagnosisResponse, DiagnosisSettings, Orchestrator, PipelineInfo,
    SolutionRecommendations,
};
pub use repository::{
    decode_content, locate_repository, parse_repository_url, RepositoryAnalysis,
    RepositoryLocation, RepositoryStructureAnalyzer, UNREADABLE,
};
pub use solution::{SolutionOutcome, SolutionSynthesizer};
pub use suspect::{SuspectFileIdentifier, NO_SUSPECT};
pub use timeframe::ExecutionTimeframeResolver;
pub use types::{
    ExecutionTimeframe, ExecutionWindow, FileClassification, LogBundle, LogEvent, LogGroup,
    LogGroupSet, LogKind, RepoTree, SkippedGroup, TimeBounds, TreeNode,
};
