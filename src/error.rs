use std::time::Duration;

use thiserror::Error;

/// Failure talking to a model or search backend.
///
/// Messages never carry the API credential.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    Status {
        provider: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("no API key found (set {0} or add it to secrets.toml)")]
    MissingCredential(String),

    #[error("unexpected response: {0}")]
    Decode(String),
}

/// Failure of the run-to-completion bridge itself.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error("provider task ended without a result")]
    TaskLost,
}

/// Everything a single Send can end with besides an assistant reply.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Please type something first")]
    EmptyInput,

    #[error("model call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("model call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl TurnError {
    /// EmptyInput is a warning; the rest mean the user turn was not answered.
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, TurnError::EmptyInput)
    }
}
