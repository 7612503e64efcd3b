mod ollama;
mod openai;

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::ProviderError;

/// A hosted (or local) model that turns one prompt into one reply.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn model(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ProviderError>;
}

/// Build the client selected in config.
pub fn from_config(config: &ProviderConfig) -> Arc<dyn ModelProvider> {
    match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiClient::with_config(
            config.base_url.clone(),
            config.model.clone(),
            config.resolve_api_key(),
            config.api_key_env.clone(),
            config.instructions.clone(),
        )),
        ProviderKind::Ollama => Arc::new(OllamaClient::with_config(
            config.base_url.clone(),
            config.model.clone(),
            config.instructions.clone(),
        )),
    }
}

/// Join a configured base URL and an API path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
