//! Error types shared by the adapters, the fan-out, and the gateway.

use thiserror::Error;

/// Failure of a single provider call.
///
/// `Configuration` is raised before any network traffic. Every other variant is an
/// upstream failure: the fan-out turns all of them into an error outcome for that provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not configured: {0}")]
    Configuration(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("upstream returned HTTP {status} without a readable body")]
    EmptyBody { status: u16 },

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream response could not be parsed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ProviderError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, ProviderError::Configuration(_))
    }
}

/// A chat request rejected at the gateway before any provider is called.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("prompt must be a non-empty string")]
    EmptyPrompt,

    #[error("thinkingMode must be \"off\" or \"on\", got {0:?}")]
    UnknownThinkingMode(String),

    #[error("malformed request body: {0}")]
    MalformedBody(String),
}
