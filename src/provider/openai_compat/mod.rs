//! OpenAI-compatible chat completions client.
//!
//! Works against api.openai.com and any server exposing the same
//! `/chat/completions` contract.

mod client;
mod request;
mod response;

pub use client::OpenAIClient;
