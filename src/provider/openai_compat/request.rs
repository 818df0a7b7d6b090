//! OpenAI-compatible API request types.

use crate::provider::types::ChatMessage;
use serde::Serialize;

/// Body of `POST /chat/completions`.
#[derive(Debug, Serialize)]
pub struct OpenAIRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
}
