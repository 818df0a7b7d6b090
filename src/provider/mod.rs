//! Completion provider.
//!
//! The relay talks to the model through [`CompletionApi`]; [`OpenAIClient`] is
//! the production implementation for OpenAI-compatible chat completion APIs.
//!
//! # Example
//!
//! ```ignore
//! use chat_relay::provider::{ChatMessage, CompletionApi, OpenAIClient};
//!
//! let client = OpenAIClient::new(api_key);
//! let reply = client.complete("gpt-3.5-turbo", &[ChatMessage::user("hi")?]).await?;
//! ```

mod client;
mod error;
mod http;
mod openai_compat;
mod retry;
mod types;

pub use client::CompletionApi;
pub use error::{Error, format_api_error};
pub use openai_compat::OpenAIClient;
pub use retry::RetryPolicy;
pub use types::*;

/// Environment variable consulted for the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
