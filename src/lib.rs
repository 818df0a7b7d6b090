#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod cli;
pub mod compaction;
pub mod config;
pub mod discord;
pub mod error;
pub mod history;
pub mod provider;
pub mod relay;
