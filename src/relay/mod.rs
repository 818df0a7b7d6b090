//! Mention-triggered relay between a chat channel and the completion model.
//!
//! One exchange runs: load history, append the new user turn, truncate to the
//! token budget, ask the model, persist both turns, then send the reply back
//! in platform-sized chunks. Exchanges for the same channel are serialized.

mod chunk;
mod locks;

pub use chunk::{MAX_MESSAGE_LENGTH, split_message};
pub use locks::ChannelLocks;

use crate::compaction::{ContextBudget, TokenCounter, TokenizationError, truncate_history};
use crate::history::{Author, HistoryStore};
use crate::provider::{self, ChatMessage, CompletionApi, format_api_error};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// A platform message, reduced to what the relay needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel_id: u64,
    pub author_id: u64,
    pub author_name: String,
    pub content: String,
    /// User ids mentioned in the message.
    pub mentions: Vec<u64>,
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct SendError(pub String);

/// Outbound side of the platform.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, channel_id: u64, text: &str) -> Result<(), SendError>;
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Token accounting failed: {0}")]
    Tokenization(#[from] TokenizationError),

    #[error("Completion failed: {0}")]
    Upstream(#[from] provider::Error),

    #[error("Failed to send reply chunk {chunk} of {total}: {source}")]
    Send {
        chunk: usize,
        total: usize,
        #[source]
        source: SendError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    NotMentioned,
    EmptyMessage,
}

/// How an inbound message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    Replied {
        chunks: usize,
        /// False when the exchange could not be written to history.
        persisted: bool,
    },
}

/// Per-exchange knobs.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub model: String,
    pub budget: ContextBudget,
    pub max_message_length: usize,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo-0301".to_string(),
            budget: ContextBudget::default(),
            max_message_length: MAX_MESSAGE_LENGTH,
        }
    }
}

pub struct RelayHandler {
    store: Arc<HistoryStore>,
    completions: Arc<dyn CompletionApi>,
    counter: TokenCounter,
    locks: ChannelLocks,
    settings: RelaySettings,
}

impl RelayHandler {
    pub fn new(
        store: Arc<HistoryStore>,
        completions: Arc<dyn CompletionApi>,
        settings: RelaySettings,
    ) -> Self {
        Self {
            store,
            completions,
            counter: TokenCounter::new(),
            locks: ChannelLocks::default(),
            settings,
        }
    }

    /// Handle one inbound message addressed (or not) to the bot `bot_id`.
    ///
    /// Errors abort the exchange before anything is persisted or sent,
    /// except [`RelayError::Send`], which happens after persistence.
    pub async fn handle(
        &self,
        bot_id: u64,
        message: &InboundMessage,
        sink: &dyn ReplySink,
    ) -> Result<Outcome, RelayError> {
        if message.author_id == bot_id {
            return Ok(Outcome::Ignored(IgnoreReason::OwnMessage));
        }
        if !message.mentions.contains(&bot_id) {
            return Ok(Outcome::Ignored(IgnoreReason::NotMentioned));
        }
        let Ok(user_message) = ChatMessage::user(message.content.trim()) else {
            debug!(channel_id = message.channel_id, "Ignoring empty mention");
            return Ok(Outcome::Ignored(IgnoreReason::EmptyMessage));
        };

        let channel_id = message.channel_id;
        info!(
            channel_id,
            author = %message.author_name,
            text = user_message.content(),
            "Inbound mention"
        );

        let _guard = self.locks.acquire(channel_id).await;
        debug!(channel_id, active_channels = self.locks.active(), "Acquired channel lock");

        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || store.load(channel_id)).await;
        let mut history: Vec<ChatMessage> = match loaded {
            Ok(Ok(turns)) => turns.into_iter().map(ChatMessage::from).collect(),
            Ok(Err(e)) => {
                warn!(channel_id, error = %e, "Failed to load history, continuing without it");
                Vec::new()
            }
            Err(e) => {
                warn!(channel_id, error = %e, "History load task failed, continuing without it");
                Vec::new()
            }
        };
        debug!(channel_id, turns = history.len(), "Loaded conversation history");

        history.push(user_message.clone());
        let context = truncate_history(
            history,
            self.settings.budget.available_tokens(),
            &self.counter,
            &self.settings.model,
        )?;

        info!(
            channel_id,
            model = %self.settings.model,
            messages = context.messages.len(),
            "Sending completion request"
        );
        let reply = self
            .completions
            .complete(&self.settings.model, &context.messages)
            .await
            .inspect_err(|e| {
                error!(channel_id, error = %format_api_error(&e.to_string()), "Completion failed");
            })?;
        let assistant_message = ChatMessage::assistant(reply).map_err(|e| {
            RelayError::Upstream(provider::Error::MalformedResponse(e.to_string()))
        })?;
        info!(
            channel_id,
            chars = assistant_message.content().chars().count(),
            "Received completion"
        );

        // Both turns carry the triggering user's identity.
        let author = Author::new(message.author_id.to_string(), message.author_name.as_str());
        let store = Arc::clone(&self.store);
        let reply_turn = assistant_message.clone();
        let saved = tokio::task::spawn_blocking(move || {
            store.save_exchange(channel_id, Some(&author), &user_message, &reply_turn)
        })
        .await;
        let persisted = match saved {
            Ok(Ok(_)) => {
                debug!(channel_id, "Saved exchange to history");
                true
            }
            Ok(Err(e)) => {
                error!(channel_id, error = %e, "Failed to save exchange, replying anyway");
                false
            }
            Err(e) => {
                error!(channel_id, error = %e, "History save task failed, replying anyway");
                false
            }
        };

        let chunks = split_message(
            assistant_message.content(),
            self.settings.max_message_length,
        );
        let total = chunks.len();
        for (i, chunk) in chunks.into_iter().enumerate() {
            sink.send(channel_id, chunk)
                .await
                .map_err(|source| RelayError::Send {
                    chunk: i + 1,
                    total,
                    source,
                })?;
        }
        info!(channel_id, chunks = total, "Sent reply");

        Ok(Outcome::Replied {
            chunks: total,
            persisted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const BOT: u64 = 900;
    const USER: u64 = 42;
    const CHANNEL: u64 = 1234;

    /// Captures formatted log output for assertions.
    #[derive(Clone, Default)]
    struct LogBuffer {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl LogBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.inner.lock().unwrap()).to_string()
        }
    }

    struct LogWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogBuffer {
        type Writer = LogWriter;

        fn make_writer(&'a self) -> Self::Writer {
            LogWriter {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl std::io::Write for LogWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.inner.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    /// Completion fake that records every request it sees.
    struct FakeCompletion {
        reply: Result<String, u16>,
        delay: Duration,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl FakeCompletion {
        fn replying(reply: impl Into<String>) -> Self {
            Self {
                reply: Ok(reply.into()),
                delay: Duration::ZERO,
                requests: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }

        fn failing(status: u16) -> Self {
            Self {
                reply: Err(status),
                ..Self::replying("")
            }
        }

        fn slow(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn requests(&self) -> Vec<Vec<ChatMessage>> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionApi for FakeCompletion {
        async fn complete(
            &self,
            _model: &str,
            messages: &[ChatMessage],
        ) -> Result<String, provider::Error> {
            self.requests.lock().unwrap().push(messages.to_vec());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(status) => Err(provider::Error::Api {
                    status: reqwest::StatusCode::from_u16(*status).ok(),
                    message: format!("HTTP {status}: boom"),
                }),
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<(u64, String)>>,
    }

    impl RecordingSink {
        fn sent(&self) -> Vec<(u64, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReplySink for RecordingSink {
        async fn send(&self, channel_id: u64, text: &str) -> Result<(), SendError> {
            self.sent.lock().unwrap().push((channel_id, text.to_string()));
            Ok(())
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl ReplySink for BrokenSink {
        async fn send(&self, _channel_id: u64, _text: &str) -> Result<(), SendError> {
            Err(SendError("Missing Permissions".into()))
        }
    }

    fn mention(channel_id: u64, text: &str) -> InboundMessage {
        InboundMessage {
            channel_id,
            author_id: USER,
            author_name: "alice".to_string(),
            content: format!("  {text}  "),
            mentions: vec![BOT],
        }
    }

    fn relay(completion: Arc<FakeCompletion>) -> (RelayHandler, Arc<HistoryStore>) {
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let handler = RelayHandler::new(Arc::clone(&store), completion, RelaySettings::default());
        (handler, store)
    }

    #[tokio::test]
    async fn test_ignores_own_messages() {
        let completion = Arc::new(FakeCompletion::replying("hi"));
        let (handler, store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();
        let mut msg = mention(CHANNEL, "hello");
        msg.author_id = BOT;

        let outcome = handler.handle(BOT, &msg, &sink).await.unwrap();

        assert_eq!(outcome, Outcome::Ignored(IgnoreReason::OwnMessage));
        assert!(completion.requests().is_empty());
        assert_eq!(store.count(CHANNEL).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ignores_messages_without_mention() {
        let completion = Arc::new(FakeCompletion::replying("hi"));
        let (handler, _store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();
        let mut msg = mention(CHANNEL, "hello");
        msg.mentions = vec![7, 8];

        let outcome = handler.handle(BOT, &msg, &sink).await.unwrap();

        assert_eq!(outcome, Outcome::Ignored(IgnoreReason::NotMentioned));
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_ignores_blank_mentions() {
        let completion = Arc::new(FakeCompletion::replying("hi"));
        let (handler, _store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let outcome = handler.handle(BOT, &mention(CHANNEL, " "), &sink).await.unwrap();

        assert_eq!(outcome, Outcome::Ignored(IgnoreReason::EmptyMessage));
        assert!(completion.requests().is_empty());
    }

    #[tokio::test]
    async fn test_first_exchange() {
        let completion = Arc::new(FakeCompletion::replying("Hello, alice!"));
        let (handler, store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let outcome = handler.handle(BOT, &mention(CHANNEL, "hello"), &sink).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Replied {
                chunks: 1,
                persisted: true
            }
        );
        assert_eq!(
            completion.requests(),
            vec![vec![ChatMessage::user("hello").unwrap()]]
        );
        assert_eq!(sink.sent(), vec![(CHANNEL, "Hello, alice!".to_string())]);

        let turns = store.load(CHANNEL).unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role(), Role::User);
        assert_eq!(turns[0].content(), "hello");
        assert_eq!(turns[1].role(), Role::Assistant);
        assert_eq!(turns[1].content(), "Hello, alice!");
        for turn in &turns {
            assert_eq!(turn.author_id.as_deref(), Some("42"));
            assert_eq!(turn.author_name.as_deref(), Some("alice"));
        }
    }

    #[tokio::test]
    async fn test_history_carries_into_next_exchange() {
        let completion = Arc::new(FakeCompletion::replying("noted"));
        let (handler, _store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        handler.handle(BOT, &mention(CHANNEL, "my name is alice"), &sink).await.unwrap();
        handler.handle(BOT, &mention(CHANNEL, "what is my name?"), &sink).await.unwrap();

        let requests = completion.requests();
        assert_eq!(
            requests[1],
            vec![
                ChatMessage::user("my name is alice").unwrap(),
                ChatMessage::assistant("noted").unwrap(),
                ChatMessage::user("what is my name?").unwrap(),
            ]
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_completion_error_persists_and_sends_nothing() {
        let logs = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let completion = Arc::new(FakeCompletion::failing(500));
        let (handler, store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let err = handler
            .handle(BOT, &mention(CHANNEL, "hello"), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Upstream(provider::Error::Api { .. })));
        assert_eq!(store.count(CHANNEL).unwrap(), 0);
        assert!(sink.sent().is_empty());

        let output = logs.contents();
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("Completion failed"), "{output}");
        assert!(output.contains("HTTP 500"), "{output}");
    }

    #[tokio::test]
    async fn test_blank_reply_is_upstream_error() {
        let completion = Arc::new(FakeCompletion::replying("   "));
        let (handler, store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let err = handler
            .handle(BOT, &mention(CHANNEL, "hello"), &sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Upstream(provider::Error::MalformedResponse(_))
        ));
        assert_eq!(store.count(CHANNEL).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_long_reply_is_chunked_in_order() {
        let reply = format!("{}{}{}", "a".repeat(2000), "b".repeat(2000), "c");
        let completion = Arc::new(FakeCompletion::replying(reply));
        let (handler, _store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let outcome = handler.handle(BOT, &mention(CHANNEL, "essay"), &sink).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Replied {
                chunks: 3,
                persisted: true
            }
        );
        let sent = sink.sent();
        assert_eq!(sent[0].1, "a".repeat(2000));
        assert_eq!(sent[1].1, "b".repeat(2000));
        assert_eq!(sent[2].1, "c");
    }

    #[tokio::test]
    async fn test_storage_failure_still_replies() {
        let completion = Arc::new(FakeCompletion::replying("still here"));
        let (handler, _store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();
        // Ids beyond i64 cannot be stored, so load and save both fail.
        let channel = u64::MAX;

        let outcome = handler.handle(BOT, &mention(channel, "hello"), &sink).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::Replied {
                chunks: 1,
                persisted: false
            }
        );
        assert_eq!(sink.sent(), vec![(channel, "still here".to_string())]);
    }

    #[tokio::test]
    async fn test_send_failure_is_reported() {
        let completion = Arc::new(FakeCompletion::replying("hi"));
        let (handler, store) = relay(Arc::clone(&completion));

        let err = handler
            .handle(BOT, &mention(CHANNEL, "hello"), &BrokenSink)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Send { chunk: 1, total: 1, .. }));
        assert_eq!(store.count(CHANNEL).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_model_aborts() {
        let completion = Arc::new(FakeCompletion::replying("hi"));
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        let settings = RelaySettings {
            model: "not-a-real-model".to_string(),
            ..RelaySettings::default()
        };
        let handler = RelayHandler::new(Arc::clone(&store), completion.clone(), settings);
        let sink = RecordingSink::default();

        let err = handler
            .handle(BOT, &mention(CHANNEL, "hello"), &sink)
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Tokenization(_)));
        assert!(completion.requests().is_empty());
        assert!(sink.sent().is_empty());
    }

    #[tokio::test]
    async fn test_context_is_truncated_to_budget() {
        let completion = Arc::new(FakeCompletion::replying("ok"));
        let store = Arc::new(HistoryStore::open_in_memory().unwrap());
        for i in 0..10 {
            let old = ChatMessage::user(format!("old turn {i} {}", "pad ".repeat(40))).unwrap();
            store.save(CHANNEL, None, &old).unwrap();
        }
        let settings = RelaySettings {
            budget: ContextBudget {
                context_window: 1124,
                response_reserve: 1024,
            },
            ..RelaySettings::default()
        };
        let handler = RelayHandler::new(store, completion.clone(), settings);
        let sink = RecordingSink::default();

        handler.handle(BOT, &mention(CHANNEL, "latest"), &sink).await.unwrap();

        let sent = &completion.requests()[0];
        let counter = TokenCounter::new();
        assert!(counter.count_messages(sent, "gpt-3.5-turbo-0301").unwrap() <= 100);
        assert_eq!(sent.last().unwrap().content(), "latest");
        assert!(sent.len() < 11);
    }

    #[tokio::test]
    async fn test_same_channel_is_serialized() {
        let completion =
            Arc::new(FakeCompletion::replying("ok").slow(Duration::from_millis(20)));
        let (handler, store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let first = mention(CHANNEL, "one");
        let second = mention(CHANNEL, "two");
        let (a, b) = tokio::join!(
            handler.handle(BOT, &first, &sink),
            handler.handle(BOT, &second, &sink)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(completion.max_in_flight.load(Ordering::SeqCst), 1);
        let roles: Vec<Role> = store.load(CHANNEL).unwrap().iter().map(|t| t.role()).collect();
        assert_eq!(
            roles,
            vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_different_channels_run_concurrently() {
        let completion =
            Arc::new(FakeCompletion::replying("ok").slow(Duration::from_millis(20)));
        let (handler, _store) = relay(Arc::clone(&completion));
        let sink = RecordingSink::default();

        let first = mention(1, "one");
        let second = mention(2, "two");
        let (a, b) = tokio::join!(
            handler.handle(BOT, &first, &sink),
            handler.handle(BOT, &second, &sink)
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(completion.max_in_flight.load(Ordering::SeqCst), 2);
    }
}
