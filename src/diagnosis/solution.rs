use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::clients::ClientBundle;
use crate::error::DiagnosisError;

use super::context::{DiagnosisContext, EvidencePayload, RepositoryPayload};
use super::orchestrator::DiagnosisSettings;
use super::repository::{decode_content, locate_repository};
use super::suspect::SuspectFileIdentifier;

const NO_FILE: &str = "No specific file identified";
const NO_CONTENT: &str = "No file content available";

/// Remediation produced for one failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SolutionOutcome {
    Failed {
        error: String,
        details: String,
        problematic_file: Option<String>,
        solution: String,
    },
    Solved {
        problematic_file: Option<String>,
        solution: String,
    },
}

impl SolutionOutcome {
    fn failed(details: impl ToString) -> Self {
        Self::Failed {
            error: "Failed to generate solution".to_string(),
            details: details.to_string(),
            problematic_file: None,
            solution: "Unable to generate solution due to error".to_string(),
        }
    }

    pub fn solution(&self) -> &str {
        match self {
            Self::Failed { solution, .. } | Self::Solved { solution, .. } => solution,
        }
    }

    pub fn problematic_file(&self) -> Option<&str> {
        match self {
            Self::Failed {
                problematic_file, ..
            }
            | Self::Solved {
                problematic_file, ..
            } => problematic_file.as_deref(),
        }
    }
}

/// Identifies the suspect file, reads it, and asks the model for a
/// remediation plan over all gathered evidence.
pub struct SolutionSynthesizer<'a> {
    clients: &'a ClientBundle,
    settings: &'a DiagnosisSettings,
}

impl<'a> SolutionSynthesizer<'a> {
    pub fn new(clients: &'a ClientBundle, settings: &'a DiagnosisSettings) -> Self {
        Self { clients, settings }
    }

    /// Never fails: undecodable inputs give [`SolutionOutcome::Failed`] and
    /// model errors are reported inside the solution text.
    pub async fn solve(
        &self,
        evidence: EvidencePayload,
        repository: RepositoryPayload,
    ) -> SolutionOutcome {
        let context = match DiagnosisContext::from_payloads(evidence, repository) {
            Ok(context) => context,
            Err(e) => {
                error!("Error in solution generation: {e}");
                return SolutionOutcome::failed(e);
            }
        };

        info!("Identifying problematic file");
        let suspect = SuspectFileIdentifier::new(
            self.clients.model.as_ref(),
            self.settings.classification_max_tokens,
        )
        .identify(&context)
        .await;

        let content = match &suspect {
            Some(path) => {
                let content = self.fetch_suspect(path, context.branch_name()).await;
                info!("Fetched {} characters of {path}", content.len());
                Some(content)
            }
            None => {
                info!("No specific file identified, proceeding without file content");
                None
            }
        };

        let solution = self
            .synthesize(&context, suspect.as_deref(), content.as_deref())
            .await;

        SolutionOutcome::Solved {
            problematic_file: suspect,
            solution,
        }
    }

    /// Content of the suspect file at `branch`, or a bracketed placeholder
    /// describing why it could not be read.
    async fn fetch_suspect(&self, path: &str, branch: &str) -> String {
        let location = match locate_repository(
            self.clients.secrets.as_ref(),
            self.settings.secret_id.as_deref(),
        )
        .await
        {
            Ok(location) => location,
            Err(DiagnosisError::InvalidRepositoryUrl(url)) => {
                error!("Invalid repository URL format: {url}");
                return "[Unable to fetch file content - invalid repo URL]".to_string();
            }
            Err(e) => {
                error!("Failed to retrieve repository credentials: {e}");
                return "[Unable to fetch file content - credentials error]".to_string();
            }
        };

        let file = self
            .clients
            .repository
            .get_file(
                &location.owner,
                &location.repo,
                path,
                Some(branch),
                &location.access_token,
            )
            .await
            .and_then(|file| decode_content(&file));

        match file {
            Ok(content) => content,
            Err(e) => {
                warn!("File {path} content is unreadable: {e}");
                format!("[File {path} exists but content is unreadable]")
            }
        }
    }

    async fn synthesize(
        &self,
        context: &DiagnosisContext,
        suspect: Option<&str>,
        content: Option<&str>,
    ) -> String {
        let prompt = synthesis_prompt(
            &context.evidence_text(),
            &context.repository_text(),
            suspect.unwrap_or(NO_FILE),
            content.filter(|c| !c.is_empty()).unwrap_or(NO_CONTENT),
        );

        match self
            .clients
            .model
            .invoke(&prompt, self.settings.synthesis_max_tokens)
            .await
        {
            Ok(solution) => {
                info!("Solution generated");
                solution
            }
            Err(e) => {
                error!("Error generating solution: {e}");
                format!("Error generating solution: {e}")
            }
        }
    }
}

fn synthesis_prompt(evidence: &str, repository: &str, suspect: &str, content: &str) -> String {
    format!(
        "You are a CI/CD pipeline expert. Analyze this pipeline failure and propose a fix.\n\
         \n\
         ERROR CONTEXT AND LOGS:\n{evidence}\n\
         \n\
         REPOSITORY STRUCTURE:\n{repository}\n\
         \n\
         PROBLEMATIC FILE IDENTIFIED: {suspect}\n\
         \n\
         FILE CONTENT:\n{content}\n\
         \n\
         Provide a structured solution plan with:\n\
         1. Root cause analysis of the failure\n\
         2. Specific fixes required\n\
         3. Exact changes needed in each file\n\
         4. The complete corrected file content with inline comments\n\
         5. Step-by-step resolution instructions\n\
         6. Prevention recommendations\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::memory::{
        MemoryLogStore, MemoryParameterStore, MemoryRegistry, MemoryRepositoryHost,
        MemorySecretStore, ScriptedModel,
    };
    use crate::clients::FileContent;
    use crate::diagnosis::log_analysis::LogAnalysis;
    use crate::diagnosis::repository::RepositoryAnalysis;
    use crate::diagnosis::types::{FileClassification, RepoTree};
    use crate::payload::{Envelope, Payload, StageOutcome};
    use indexmap::IndexMap;
    use std::sync::Arc;

    const SECRET: &str = "pipeline/github";

    fn repository(branch: &str) -> RepositoryAnalysis {
        let file_paths = vec!["src/app.py".to_string(), "requirements.txt".to_string()];
        RepositoryAnalysis {
            status: "success".to_string(),
            repo_url: "https://github.com/acme/shop.git".to_string(),
            branch_name: branch.to_string(),
            file_structure: RepoTree::new(),
            total_files: file_paths.len(),
            analysis: FileClassification::classify(&file_paths),
            file_paths,
            dependencies: IndexMap::new(),
        }
    }

    struct Fixture {
        host: Arc<MemoryRepositoryHost>,
        model: Arc<ScriptedModel>,
        clients: ClientBundle,
        settings: DiagnosisSettings,
    }

    fn fixture(secrets: MemorySecretStore, model: ScriptedModel) -> Fixture {
        let host = Arc::new(
            MemoryRepositoryHost::new("acme", "shop").with_file(
                "requirements.txt",
                FileContent {
                    content: "Zmxhc2s9PTk5\n".to_string(),
                    encoding: Some("base64".to_string()),
                },
            ),
        );
        let model = Arc::new(model);
        let clients = ClientBundle {
            registry: Arc::new(MemoryRegistry::new()),
            logs: Arc::new(MemoryLogStore::new()),
            parameters: Arc::new(MemoryParameterStore::new()),
            secrets: Arc::new(secrets),
            repository: host.clone(),
            model: model.clone(),
        };
        let settings = DiagnosisSettings {
            secret_id: Some(SECRET.to_string()),
            ..DiagnosisSettings::default()
        };
        Fixture {
            host,
            model,
            clients,
            settings,
        }
    }

    fn secrets() -> MemorySecretStore {
        MemorySecretStore::new().with_secret(SECRET, "https://github.com/acme/shop.git", "t0k")
    }

    fn evidence() -> EvidencePayload {
        StageOutcome::<LogAnalysis>::failed("no log groups").into()
    }

    #[tokio::test]
    async fn fetches_suspect_at_branch_and_includes_it_in_prompt() {
        let f = fixture(
            secrets(),
            ScriptedModel::new()
                .answering("requirements.txt")
                .answering("Pin flask to 3.0.0"),
        );

        let outcome = SolutionSynthesizer::new(&f.clients, &f.settings)
            .solve(evidence(), StageOutcome::Completed(repository("develop")).into())
            .await;

        assert_eq!(
            outcome,
            SolutionOutcome::Solved {
                problematic_file: Some("requirements.txt".to_string()),
                solution: "Pin flask to 3.0.0".to_string(),
            }
        );

        let requests = f.host.file_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].git_ref.as_deref(), Some("develop"));

        let prompts = f.model.prompts();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0].1, f.settings.classification_max_tokens);
        assert_eq!(prompts[1].1, f.settings.synthesis_max_tokens);
        assert!(prompts[1].0.contains("PROBLEMATIC FILE IDENTIFIED: requirements.txt"));
        assert!(prompts[1].0.contains("flask==99"));
    }

    #[tokio::test]
    async fn missing_credentials_become_a_placeholder() {
        let f = fixture(
            MemorySecretStore::new(),
            ScriptedModel::new().answering("src/app.py").answering("plan"),
        );

        let outcome = SolutionSynthesizer::new(&f.clients, &f.settings)
            .solve(evidence(), StageOutcome::Completed(repository("main")).into())
            .await;

        assert_eq!(outcome.problematic_file(), Some("src/app.py"));
        assert!(f.host.file_requests().is_empty());
        assert!(f.model.prompts()[1]
            .0
            .contains("[Unable to fetch file content - credentials error]"));
    }

    #[tokio::test]
    async fn unreadable_suspect_becomes_a_placeholder() {
        let f = fixture(
            secrets(),
            ScriptedModel::new().answering("src/app.py").answering("plan"),
        );

        SolutionSynthesizer::new(&f.clients, &f.settings)
            .solve(evidence(), StageOutcome::Completed(repository("main")).into())
            .await;

        assert!(f.model.prompts()[1]
            .0
            .contains("[File src/app.py exists but content is unreadable]"));
    }

    #[tokio::test]
    async fn no_suspect_still_synthesizes() {
        let f = fixture(
            secrets(),
            ScriptedModel::new().answering("NONE").answering("general advice"),
        );

        let outcome = SolutionSynthesizer::new(&f.clients, &f.settings)
            .solve(evidence(), StageOutcome::Completed(repository("main")).into())
            .await;

        assert_eq!(outcome.problematic_file(), None);
        assert_eq!(outcome.solution(), "general advice");
        assert!(f.host.file_requests().is_empty());
        assert!(f.model.prompts()[1].0.contains(NO_FILE));
        assert!(f.model.prompts()[1].0.contains(NO_CONTENT));
    }

    #[tokio::test]
    async fn synthesis_failure_is_reported_in_the_solution() {
        let f = fixture(
            secrets(),
            ScriptedModel::new().answering("NONE").failing("model timed out"),
        );

        let outcome = SolutionSynthesizer::new(&f.clients, &f.settings)
            .solve(evidence(), StageOutcome::Completed(repository("main")).into())
            .await;

        assert!(matches!(outcome, SolutionOutcome::Solved { .. }));
        assert!(outcome
            .solution()
            .starts_with("Error generating solution: "));
        assert!(outcome.solution().contains("model timed out"));
    }

    #[tokio::test]
    async fn undecodable_payload_gives_failed_outcome() {
        let f = fixture(secrets(), ScriptedModel::new());
        let broken = Payload::Wrapped(Envelope {
            status_code: Some(500),
            body: "not json".to_string(),
        });

        let outcome = SolutionSynthesizer::new(&f.clients, &f.settings)
            .solve(evidence(), broken)
            .await;

        assert!(matches!(
            outcome,
            SolutionOutcome::Failed { ref error, problematic_file: None, .. }
                if error == "Failed to generate solution"
        ));
        assert_eq!(outcome.solution(), "Unable to generate solution due to error");
        assert!(f.model.prompts().is_empty());
    }
}
