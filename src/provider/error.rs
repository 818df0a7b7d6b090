//! Provider error types.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Format an API error for display, pulling the message out of an
/// OpenAI-style JSON body when there is one.
///
/// `HTTP 401: {"error": {"message": "..."}}` becomes `HTTP 401: ...`;
/// anything unparseable is returned unchanged.
#[must_use]
pub fn format_api_error(error: &str) -> String {
    let Some(start) = error.find('{') else {
        return error.to_string();
    };
    let (prefix, body) = error.split_at(start);
    let prefix = prefix.trim();

    match serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(ErrorBody::into_message)
    {
        Some(msg) if prefix.is_empty() => msg,
        Some(msg) => format!("{prefix} {msg}"),
        None => error.to_string(),
    }
}

/// `{"error": {...}}`, `{"error": "..."}` or `{"message": "..."}`.
#[derive(Deserialize)]
struct ErrorBody {
    error: Option<ErrorField>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorField {
    Detailed {
        message: String,
        code: Option<String>,
        #[serde(rename = "type")]
        kind: Option<String>,
    },
    Plain(String),
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        match self.error {
            Some(ErrorField::Detailed {
                message,
                code: Some(code),
                ..
            }) => Some(format!("{message} (code: {code})")),
            Some(ErrorField::Detailed {
                message,
                kind: Some(kind),
                ..
            }) => Some(format!("{message} (type: {kind})")),
            Some(ErrorField::Detailed { message, .. } | ErrorField::Plain(message)) => {
                Some(message)
            }
            None => self.message,
        }
    }
}

/// Failures talking to the completion service.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Missing API key. Set {env_var} or `openai_api_key` in the config file")]
    MissingApiKey { env_var: &'static str },

    /// Rejected request. `status` is set for HTTP error responses.
    #[error("API error: {message}")]
    Api {
        status: Option<reqwest::StatusCode>,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimited { retry_after: Option<u64> },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub(crate) fn api(message: impl Into<String>) -> Self {
        Error::Api {
            status: None,
            message: message.into(),
        }
    }

    /// Seconds the server asked us to wait, if any.
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}
