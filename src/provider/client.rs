//! Completion service abstraction.

use super::error::Error;
use super::types::ChatMessage;
use async_trait::async_trait;

/// A chat completion backend.
///
/// Implementations must be safe to share across channel tasks; the relay
/// holds one behind an `Arc` for the life of the process.
#[async_trait]
pub trait CompletionApi: Send + Sync {
    /// Send the ordered conversation and return the generated reply text.
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, Error>;
}
