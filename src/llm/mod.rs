//! Chat-completion client for auxiliary extraction
//!
//! One cheap LLM endpoint backs extraction, query rewriting, counting-query
//! decomposition, and reranking. Tests inject scripted models through the
//! `ChatModel` trait.

use async_trait::async_trait;

use crate::error::{RecallError, Result};

/// Trait for chat-completion providers
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run a single system + user exchange and return the assistant text
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Model name
    fn model_name(&self) -> &str;
}

/// OpenAI chat-completions client
pub struct OpenAiChat {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiChat {
    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(crate::embedding::REQUEST_TIMEOUT)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
                "temperature": 0.0,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::External(format!(
                "chat API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response.json().await?;
        let content = data["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| RecallError::External("invalid chat response".to_string()))?;

        Ok(content.to_string())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
