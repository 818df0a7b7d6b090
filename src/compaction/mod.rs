//! Token accounting and context-window truncation.

mod counter;
mod truncate;

pub use counter::{MESSAGE_OVERHEAD, TokenCounter, TokenizationError};
pub use truncate::{Truncation, truncate_history};

/// Token budget for the prompt side of a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextBudget {
    /// Context window size of the model (default: 4096)
    pub context_window: usize,
    /// Tokens held back for the model's reply (default: 1024)
    pub response_reserve: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            context_window: 4096,
            response_reserve: 1024,
        }
    }
}

impl ContextBudget {
    /// Tokens available for history after reserving reply space.
    #[must_use]
    pub fn available_tokens(&self) -> usize {
        self.context_window.saturating_sub(self.response_reserve)
    }
}
