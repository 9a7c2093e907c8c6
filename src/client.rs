//! Outbound chat-completion call.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::config::LabConfig;
use crate::error::LabError;
use crate::providers::{ChatMessage, ChatRequest, ChatResponse};

/// Anything that turns a prompt window into one reply string.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LabError>;
}

/// Bearer-authenticated chat-completions client with a fixed model and
/// temperature.
pub struct HttpChatBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl HttpChatBackend {
    pub fn new(config: &LabConfig, api_key: Option<String>) -> Result<Self, LabError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, LabError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LabError::external("API key is not configured"))?;

        let request = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
        };
        debug!(model = %self.model, messages = request.messages.len(), "sending chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LabError::external(format!("HTTP {}: {}", status, body)));
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LabError::external(format!("malformed response: {e}")))?;
        parsed
            .reply()
            .map(str::to_string)
            .ok_or_else(|| LabError::external("response contained no reply"))
    }
}
