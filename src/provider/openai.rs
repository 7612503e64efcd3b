use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{endpoint, ModelProvider};
use crate::error::ProviderError;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: Option<String>,
    api_key_env: String,
    instructions: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    pub fn with_config(
        base_url: String,
        model: String,
        api_key: Option<String>,
        api_key_env: String,
        instructions: String,
    ) -> Self {
        OpenAiClient {
            base_url,
            model,
            api_key,
            api_key_env,
            instructions,
            client: reqwest::Client::new(),
        }
    }

    fn build_request<'a>(&'a self, prompt: &'a str) -> ChatCompletionRequest<'a> {
        let mut messages = Vec::with_capacity(2);
        if !self.instructions.trim().is_empty() {
            messages.push(Message { role: "system", content: &self.instructions });
        }
        messages.push(Message { role: "user", content: prompt });

        ChatCompletionRequest { model: &self.model, messages }
    }
}

fn first_choice(response: ChatCompletionResponse) -> Result<String, ProviderError> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| ProviderError::Decode("response had no message content".to_string()))
}

#[async_trait]
impl ModelProvider for OpenAiClient {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingCredential(self.api_key_env.clone()))?;

        log::debug!("openai: sending {} chars to {}", prompt.len(), self.model);

        let response = self
            .client
            .post(endpoint(&self.base_url, "chat/completions"))
            .bearer_auth(api_key)
            .json(&self.build_request(prompt))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status { provider: "openai", status, body });
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        first_choice(completion)
    }
}
