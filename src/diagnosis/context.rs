use crate::error::Result;
use crate::payload::{Payload, StageOutcome};

use super::log_analysis::LogAnalysis;
use super::repository::RepositoryAnalysis;

const DEFAULT_BRANCH: &str = "main";

pub type EvidencePayload = Payload<StageOutcome<LogAnalysis>>;
pub type RepositoryPayload = Payload<StageOutcome<RepositoryAnalysis>>;

/// Canonical inputs of suspect identification and solution synthesis.
///
/// Either stage outcome may be a failure; the context then simply carries
/// less evidence.
#[derive(Debug, Clone)]
pub struct DiagnosisContext {
    pub evidence: StageOutcome<LogAnalysis>,
    pub repository: StageOutcome<RepositoryAnalysis>,
}

impl DiagnosisContext {
    /// Unwraps both payloads into their records.
    pub fn from_payloads(evidence: EvidencePayload, repository: RepositoryPayload) -> Result<Self> {
        Ok(Self {
            evidence: evidence.normalize()?,
            repository: repository.normalize()?,
        })
    }

    /// Files of the analyzed branch; empty when repository analysis failed.
    pub fn file_paths(&self) -> &[String] {
        self.repository
            .completed()
            .map(|repo| repo.file_paths.as_slice())
            .unwrap_or_default()
    }

    pub fn branch_name(&self) -> &str {
        self.repository
            .completed()
            .map(|repo| repo.branch_name.as_str())
            .filter(|branch| !branch.is_empty())
            .unwrap_or(DEFAULT_BRANCH)
    }

    pub fn evidence_text(&self) -> String {
        serde_json::to_string_pretty(&self.evidence).unwrap_or_default()
    }

    pub fn repository_text(&self) -> String {
        serde_json::to_string_pretty(&self.repository).unwrap_or_default()
    }
}
