use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::provider::Error),

    #[error("History error: {0}")]
    History(#[from] crate::history::HistoryError),

    #[error("Tokenizer error: {0}")]
    Tokenization(#[from] crate::compaction::TokenizationError),

    #[error("Discord error: {0}")]
    Discord(#[from] serenity::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
