use log::info;

use crate::clients::ParameterStore;
use crate::error::{DiagnosisError, Result};
use crate::event::EventDetail;

use super::types::{LogGroup, LogGroupSet, LogKind};

const BUILD_PROVIDER: &str = "CodeBuild";

/// Maps a failed (pipeline, stage, action, provider) to its log groups via
/// the configuration store.
pub struct LogGroupResolver<'a> {
    parameters: &'a dyn ParameterStore,
}

/// Parameter key under which one log group of an action is registered.
pub fn parameter_key(pipeline: &str, stage: &str, action: &str, qualifier: &str) -> String {
    format!("/pipeline/{pipeline}/{stage}/{action}/{qualifier}")
}

/// Qualifiers to look up for a provider, with the kind each one names.
fn qualifiers(provider: &str) -> Vec<(String, LogKind)> {
    if provider == BUILD_PROVIDER {
        vec![
            ("codebuild-event-log-group".to_string(), LogKind::Event),
            ("codebuild-native-log-group".to_string(), LogKind::Native),
        ]
    } else {
        vec![(
            format!("{}-log-group", provider.to_lowercase()),
            LogKind::Event,
        )]
    }
}

impl<'a> LogGroupResolver<'a> {
    pub fn new(parameters: &'a dyn ParameterStore) -> Self {
        Self { parameters }
    }

    /// # Errors
    ///
    /// - `MissingField` if stage, action, or provider is absent; checked
    ///   before any lookup
    /// - `ConfigurationNotFound` if a parameter key does not exist
    /// - `NoEvidenceSource` if every value found is blank
    pub async fn resolve(&self, pipeline: &str, detail: &EventDetail) -> Result<LogGroupSet> {
        let stage = detail.stage.as_deref().filter(|s| !s.is_empty());
        let action = detail.failed_action();
        let provider = detail.provider();

        let (Some(stage), Some(action), Some(provider)) = (stage, action, provider) else {
            return Err(DiagnosisError::MissingField(format!(
                "stage: {stage:?}, action: {action:?}, provider: {provider:?}"
            )));
        };

        info!("Found failure in provider: {provider}, stage: {stage}, action: {action}");

        let mut groups = Vec::new();
        for (qualifier, kind) in qualifiers(provider) {
            let key = parameter_key(pipeline, stage, action, &qualifier);
            let value = self
                .parameters
                .get_parameter(&key)
                .await?
                .ok_or(DiagnosisError::ConfigurationNotFound(key))?;

            let name = value.trim();
            if !name.is_empty() {
                info!("Found log group: {name}");
                groups.push(LogGroup {
                    name: name.to_string(),
                    kind,
                });
            }
        }

        let set = LogGroupSet::new(groups).ok_or_else(|| DiagnosisError::NoEvidenceSource {
            provider: provider.to_string(),
            stage: stage.to_string(),
        })?;

        info!("Retrieved {} log groups for failed {provider} stage", set.len());
        Ok(set)
    }
}
