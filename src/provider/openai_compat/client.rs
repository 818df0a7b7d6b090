//! OpenAI-compatible API client.

use super::request::OpenAIRequest;
use super::response::OpenAIResponse;
use crate::provider::client::CompletionApi;
use crate::provider::error::{Error, format_api_error};
use crate::provider::http::HttpClient;
use crate::provider::retry::{RetryPolicy, retryable_category};
use crate::provider::types::ChatMessage;
use async_trait::async_trait;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Non-streaming chat completions client with a per-attempt deadline and
/// bounded retry.
#[derive(Debug)]
pub struct OpenAIClient {
    http: HttpClient,
    timeout: Duration,
    retry: RetryPolicy,
}

impl OpenAIClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    /// Create a client with custom base URL (proxies, local servers).
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(base_url, api_key),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn complete_once(&self, model: &str, messages: &[ChatMessage]) -> Result<String, Error> {
        let request = OpenAIRequest { model, messages };

        let response: OpenAIResponse = tokio::time::timeout(
            self.timeout,
            self.http.post_json("/chat/completions", &request),
        )
        .await
        .map_err(|_| Error::Timeout(self.timeout))??;

        if let Some(usage) = &response.usage {
            tracing::debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "Completion usage"
            );
        }

        response
            .reply_text()
            .map(str::to_string)
            .ok_or_else(|| {
                let finish = response
                    .choices
                    .first()
                    .and_then(|c| c.finish_reason.as_deref())
                    .unwrap_or("none");
                Error::MalformedResponse(format!(
                    "no reply content in first choice (choices: {}, finish_reason: {finish})",
                    response.choices.len()
                ))
            })
    }
}

#[async_trait]
impl CompletionApi for OpenAIClient {
    async fn complete(&self, model: &str, messages: &[ChatMessage]) -> Result<String, Error> {
        tracing::debug!(
            base_url = %self.http.base_url(),
            model,
            messages = messages.len(),
            "Chat completion request"
        );

        let mut attempt = 0;
        loop {
            let err = match self.complete_once(model, messages).await {
                Ok(reply) => return Ok(reply),
                Err(err) => err,
            };

            let Some(category) = retryable_category(&err) else {
                return Err(err);
            };
            if attempt >= self.retry.max_retries {
                return Err(err);
            }

            let delay = self.retry.delay_for(attempt, err.retry_after());
            attempt += 1;
            tracing::warn!(
                attempt,
                max_retries = self.retry.max_retries,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %format_api_error(&err.to_string()),
                "{category}, retrying completion"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
