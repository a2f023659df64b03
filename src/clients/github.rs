use std::time::Duration;

use async_trait::async_trait;
use log::info;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;

use crate::error::{DiagnosisError, Result};

use super::{FileContent, RepositoryHost, TreeEntry};

/// GitHub REST API client for repository trees and file contents.
///
/// Credentials are per call: the access token comes from the secret store
/// at analysis time, not from process configuration.
#[derive(Clone)]
pub struct GitHubClient {
    /// HTTP client
    client: reqwest::Client,
    /// Base URL for GitHub API
    base_url: String,
}

impl GitHubClient {
    /// Create a new GitHub API client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - GitHub API base URL (e.g., "https://api.github.com")
    /// * `timeout` - Per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github.v3+json"),
        );

        let client = reqwest::Client::builder()
            .user_agent("pipedoctor/0.1.0")
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| DiagnosisError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T>(&self, url: &str, token: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.client.get(url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());
            return Err(DiagnosisError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn get_tree(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        token: &str,
    ) -> Result<Vec<TreeEntry>> {
        let url = format!(
            "{}/repos/{}/{}/git/trees/{}?recursive=1",
            self.base_url, owner, repo, branch
        );
        info!("Fetching repository tree from: {url}");

        let response: TreeResponse = self.get_json(&url, token).await?;
        info!("Retrieved {} items from repository", response.tree.len());

        Ok(response.tree)
    }

    async fn get_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
        token: &str,
    ) -> Result<FileContent> {
        let mut url = format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url, owner, repo, path
        );
        if let Some(git_ref) = git_ref {
            url.push_str(&format!("?ref={git_ref}"));
        }

        self.get_json(&url, token).await
    }
}

/// Response from GitHub API for a recursive tree.
#[derive(Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
}
