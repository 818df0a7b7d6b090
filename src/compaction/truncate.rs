use super::{TokenCounter, TokenizationError};
use crate::provider::ChatMessage;

/// Result of fitting a history into a token budget.
#[derive(Debug, Clone)]
pub struct Truncation<T> {
    /// Surviving messages, oldest first.
    pub messages: Vec<T>,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub dropped: usize,
}

/// Drop the oldest messages until the history fits `budget` tokens.
///
/// Each message costs its content tokens plus the per-message overhead.
/// Survivors keep their relative order; only a prefix is ever removed. A
/// message larger than the whole budget is evicted like any other, so the
/// result may be empty.
pub fn truncate_history<T: AsRef<ChatMessage>>(
    history: Vec<T>,
    budget: usize,
    counter: &TokenCounter,
    model: &str,
) -> Result<Truncation<T>, TokenizationError> {
    let costs = history
        .iter()
        .map(|m| counter.count_message(m.as_ref(), model))
        .collect::<Result<Vec<_>, _>>()?;

    let tokens_before: usize = costs.iter().sum();
    let mut total = tokens_before;
    let mut dropped = 0;

    while total > budget && dropped < costs.len() {
        total -= costs[dropped];
        dropped += 1;
    }

    let messages: Vec<T> = history.into_iter().skip(dropped).collect();

    tracing::info!(
        tokens_before,
        tokens_after = total,
        budget,
        dropped,
        kept = messages.len(),
        "Truncated conversation history"
    );

    Ok(Truncation {
        messages,
        tokens_before,
        tokens_after: total,
        dropped,
    })
}
