use log::{error, info};

use crate::clients::LanguageModel;

use super::context::DiagnosisContext;

/// Answer the model gives when no file explains the failure.
pub const NO_SUSPECT: &str = "NONE";

/// Asks the model to name the one repository file behind a failure.
///
/// The answer is only trusted if it names a file that really exists in the
/// analyzed branch.
pub struct SuspectFileIdentifier<'a> {
    model: &'a dyn LanguageModel,
    max_tokens: u32,
}

impl<'a> SuspectFileIdentifier<'a> {
    pub fn new(model: &'a dyn LanguageModel, max_tokens: u32) -> Self {
        Self { model, max_tokens }
    }

    /// Returns a path from `context.file_paths()`, or `None`.
    ///
    /// Model failures and answers outside the file list both mean no
    /// suspect; neither is an error.
    pub async fn identify(&self, context: &DiagnosisContext) -> Option<String> {
        let files = context.file_paths();
        if files.is_empty() {
            info!("No repository files available, skipping suspect identification");
            return None;
        }

        let prompt = classification_prompt(&context.evidence_text(), files);
        let answer = match self.model.invoke(&prompt, self.max_tokens).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Error identifying problematic file: {e}");
                return None;
            }
        };

        let candidate = clean_answer(&answer);
        if candidate == NO_SUSPECT || !files.iter().any(|f| f == candidate) {
            info!("No valid problematic file identified (model answered {candidate:?})");
            return None;
        }

        info!("Identified problematic file: {candidate}");
        Some(candidate.to_string())
    }
}

fn clean_answer(answer: &str) -> &str {
    answer.trim().trim_matches('"').trim_matches('\'')
}

fn classification_prompt(evidence: &str, files: &[String]) -> String {
    let file_list = serde_json::to_string(files).unwrap_or_default();
    format!(
        "Analyze this CI/CD pipeline failure and name the single file that caused it.\n\
         \n\
         Pipeline error context:\n{evidence}\n\
         \n\
         Files in the repository:\n{file_list}\n\
         \n\
         Rules:\n\
         - Look for file references in error messages, logs, and stack traces.\n\
         - Answer with exactly one path copied from the list above.\n\
         - If no file in the list is responsible, answer {NO_SUSPECT}.\n\
         - Do not add any explanation.\n"
    )
}
