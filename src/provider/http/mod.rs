//! Shared HTTP plumbing for the completion provider.

mod client;

pub use client::HttpClient;
