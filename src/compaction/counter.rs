use crate::provider::ChatMessage;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tiktoken_rs::CoreBPE;

/// Tokens charged per message for role and framing in the chat wire format.
pub const MESSAGE_OVERHEAD: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizationError {
    #[error("No tokenizer for model {model}: {reason}")]
    UnknownModel { model: String, reason: String },
}

/// Model-aware token counter backed by tiktoken encodings.
///
/// Encoders are loaded lazily per model identifier and cached; clones share
/// the cache.
#[derive(Clone, Default)]
pub struct TokenCounter {
    encoders: Arc<Mutex<HashMap<String, Arc<CoreBPE>>>>,
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let models: Vec<String> = self
            .encoders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("TokenCounter")
            .field("models", &models)
            .finish()
    }
}

impl TokenCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve (and cache) the encoder for `model`.
    ///
    /// Unknown models are an error rather than a fallback encoding, since a
    /// wrong tokenizer silently breaks budget accounting.
    pub fn encoder(&self, model: &str) -> Result<Arc<CoreBPE>, TokenizationError> {
        let mut encoders = self
            .encoders
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(bpe) = encoders.get(model) {
            return Ok(Arc::clone(bpe));
        }

        let bpe = tiktoken_rs::get_bpe_from_model(model).map_err(|e| {
            TokenizationError::UnknownModel {
                model: model.to_string(),
                reason: e.to_string(),
            }
        })?;
        let bpe = Arc::new(bpe);
        encoders.insert(model.to_string(), Arc::clone(&bpe));
        tracing::debug!(model, "Loaded tokenizer");
        Ok(bpe)
    }

    /// Count tokens in a string.
    pub fn count_str(&self, text: &str, model: &str) -> Result<usize, TokenizationError> {
        Ok(self.encoder(model)?.encode_with_special_tokens(text).len())
    }

    /// Count a single message, including [`MESSAGE_OVERHEAD`].
    pub fn count_message(
        &self,
        message: &ChatMessage,
        model: &str,
    ) -> Result<usize, TokenizationError> {
        Ok(self.count_str(message.content(), model)? + MESSAGE_OVERHEAD)
    }

    /// Total cost of a sequence of messages.
    pub fn count_messages<T: AsRef<ChatMessage>>(
        &self,
        messages: &[T],
        model: &str,
    ) -> Result<usize, TokenizationError> {
        messages
            .iter()
            .map(|m| self.count_message(m.as_ref(), model))
            .sum()
    }
}
