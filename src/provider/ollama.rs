use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{endpoint, ModelProvider};
use crate::error::ProviderError;

#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[allow(dead_code)]
    model: String,
    message: Message,
    #[allow(dead_code)]
    done: bool,
}

/// Local Ollama server, no credential needed.
pub struct OllamaClient {
    base_url: String,
    model: String,
    instructions: String,
    client: reqwest::Client,
}

impl OllamaClient {
    pub fn with_config(base_url: String, model: String, instructions: String) -> Self {
        OllamaClient {
            base_url,
            model,
            instructions,
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, prompt: &str) -> OllamaChatRequest {
        let mut messages = Vec::new();
        if !self.instructions.trim().is_empty() {
            messages.push(Message {
                role: "system".to_string(),
                content: self.instructions.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream: false,
        }
    }
}

#[async_trait]
impl ModelProvider for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        log::debug!("ollama: sending {} chars to {}", prompt.len(), self.model);

        let response = self
            .client
            .post(endpoint(&self.base_url, "api/chat"))
            .json(&self.build_request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { provider: "ollama", status, body });
        }

        let ollama_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        Ok(ollama_response.message.content)
    }
}
