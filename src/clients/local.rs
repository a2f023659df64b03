use async_trait::async_trait;
use indexmap::IndexMap;
use log::{debug, warn};

use crate::error::Result;

use super::{ParameterStore, RepositoryCredentials, SecretStore};

/// Configuration store backed by the `[parameters]` table of the config file.
pub struct ConfigParameterStore {
    parameters: IndexMap<String, String>,
}

impl ConfigParameterStore {
    pub fn new(parameters: IndexMap<String, String>) -> Self {
        Self { parameters }
    }
}

#[async_trait]
impl ParameterStore for ConfigParameterStore {
    async fn get_parameter(&self, key: &str) -> Result<Option<String>> {
        debug!("Looking up parameter {key}");
        Ok(self.parameters.get(key).cloned())
    }
}

/// Secret store reading the JSON credential payload from the environment.
///
/// A secret id such as `pipeline/github-token` is read from the variable
/// `PIPEDOCTOR_SECRET_PIPELINE_GITHUB_TOKEN`.
#[derive(Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn variable_name(secret_id: &str) -> String {
        let suffix: String = secret_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("PIPEDOCTOR_SECRET_{suffix}")
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, secret_id: &str) -> Result<Option<RepositoryCredentials>> {
        let variable = Self::variable_name(secret_id);
        let Ok(raw) = std::env::var(&variable) else {
            warn!("Secret {secret_id} not found in {variable}");
            return Ok(None);
        };

        Ok(Some(serde_json::from_str(&raw)?))
    }
}
