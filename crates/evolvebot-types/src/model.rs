//! Language-model collaborator interface.
//!
//! The universe subsystem treats the model as an opaque prompt/response
//! capability: review learning and the daily digest hand it a prompt and read
//! back text.

use async_trait::async_trait;
use thiserror::Error;

/// A single-turn completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Errors from a completion driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Response parse error: {0}")]
    Parse(String),
}

/// Trait for a prompt -> text model backend.
#[async_trait]
pub trait CompletionDriver: Send + Sync {
    /// Run one completion and return the assistant text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, DriverError>;
}
