use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::error::{DiagnosisError, Result};

use super::LanguageModel;

const API_VERSION: &str = "2023-06-01";

/// Client for a messages-style inference endpoint.
///
/// Sends a single user-role prompt with an output-token bound and returns
/// the first text block of the reply. No retries: a failed call is
/// reported to the calling stage.
pub struct MessagesClient {
    client: reqwest::Client,
    endpoint: String,
    model_id: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Serialize)]
struct ContentBlock<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl MessagesClient {
    pub fn new(
        endpoint: &str,
        model_id: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("pipedoctor/0.1.0")
            .timeout(timeout)
            .build()
            .map_err(|e| DiagnosisError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model_id: model_id.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl LanguageModel for MessagesClient {
    async fn invoke(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: &self.model_id,
            max_tokens,
            messages: vec![Message {
                role: "user",
                content: vec![ContentBlock {
                    kind: "text",
                    text: prompt,
                }],
            }],
        };

        debug!(
            "Invoking model {} with max_tokens={max_tokens} ({} prompt chars)",
            self.model_id,
            prompt.len()
        );

        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("anthropic-version", API_VERSION)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| DiagnosisError::ModelInvocation(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| DiagnosisError::ModelInvocation(e.to_string()))?;

        if !status.is_success() {
            error!("Model endpoint returned {status}");
            return Err(DiagnosisError::ModelInvocation(format!(
                "status {}: {}",
                status.as_u16(),
                text
            )));
        }

        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            DiagnosisError::ModelInvocation(format!("Failed to parse model response: {e}"))
        })?;

        Ok(parsed
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .and_then(|block| block.text)
            .unwrap_or_else(|| "No response generated".to_string()))
    }
}
