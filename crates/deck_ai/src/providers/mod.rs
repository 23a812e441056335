//! Text-generation provider trait and implementations.

pub mod ollama;

use async_trait::async_trait;

use crate::types::{GenerateRequest, GenerateResponse};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors a provider may return. Connection failures and timeouts are kept
/// apart so callers can report and retry them separately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Inference service unreachable: {0}")]
    Unreachable(String),

    #[error("Inference service timed out: {0}")]
    Timeout(String),

    #[error("Model not available: {0}")]
    ModelUnavailable(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Malformed response: {0}")]
    Protocol(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout(_))
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Interface to a text-generation backend.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Human-readable display name.
    fn name(&self) -> &str;

    /// Quick health-check.
    async fn is_available(&self) -> bool;

    /// Models the backend currently serves.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Non-streaming completion.
    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;
}
