use crate::error::BackendError;
use crate::models::{Completion, PromptMessage, Sender};
use crate::traits::{ChatModel, Embedder};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";
pub const CHAT_MODEL: &str = "gpt-4o-mini";

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Serves both embedding and completion calls. Without a key every
/// call returns `NotReady` and the orchestrator degrades to offline
/// mode.
pub struct OpenAiClient {
    api_key: Option<String>,
    base_url: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    fn key(&self) -> Result<&str, BackendError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| BackendError::NotReady("OPENAI_API_KEY is not set".to_string()))
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, BackendError> {
        let key = self.key()?;
        let response = self
            .client
            .post(format!("{}{}", self.base_url.trim_end_matches('/'), path))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BackendError::BackendResponse {
                backend: "openai".to_string(),
                details: response.status().to_string(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let parsed = self
            .post(
                "/v1/embeddings",
                json!({ "model": EMBEDDING_MODEL, "input": text }),
            )
            .await?;

        let values = parsed
            .pointer("/data/0/embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| BackendError::BackendResponse {
                backend: "openai".to_string(),
                details: "response carried no embedding".to_string(),
            })?;

        Ok(values
            .iter()
            .filter_map(Value::as_f64)
            .map(|value| value as f32)
            .collect())
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(
        &self,
        system_prompt: &str,
        messages: &[PromptMessage],
    ) -> Result<Completion, BackendError> {
        let mut payload = vec![json!({ "role": "system", "content": system_prompt })];
        for message in messages {
            let role = match message.role {
                Sender::User => "user",
                Sender::Assistant => "assistant",
            };
            payload.push(json!({ "role": role, "content": message.text }));
        }

        let parsed = self
            .post(
                "/v1/chat/completions",
                json!({ "model": CHAT_MODEL, "messages": payload }),
            )
            .await?;

        let text = parsed
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::BackendResponse {
                backend: "openai".to_string(),
                details: "response carried no completion text".to_string(),
            })?
            .to_string();

        let tokens = parsed
            .pointer("/usage/total_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);

        Ok(Completion { text, tokens })
    }
}
