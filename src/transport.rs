//! Messaging transport abstraction.
//!
//! The dispatcher talks to the outside world only through the [`Transport`]
//! trait; the Telegram adapter lives in [`telegram`] and tests use an
//! in-memory mock. Errors are classified so the polling loop can tell a
//! transient network hiccup from a competing poller.

pub mod telegram;

use crate::update::Update;
use async_trait::async_trait;
use std::fmt;

/// Transport failure, classified for the polling loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Another consumer is fetching updates for the same credentials.
    Conflict(String),
    /// Temporary failure; retry after a backoff.
    Transient(String),
    /// Misconfiguration or permanent rejection; retrying will not help.
    Fatal(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Conflict(msg) => write!(f, "conflict: {}", msg),
            TransportError::Transient(msg) => write!(f, "transient: {}", msg),
            TransportError::Fatal(msg) => write!(f, "fatal: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

pub type TransportResult<T> = Result<T, TransportError>;

/// Rendering mode for outgoing text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MessageFormat {
    #[default]
    Html,
    Markdown,
    Plain,
}

/// One button of an inline keyboard.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineButton {
    pub text: String,
    pub data: String,
}

/// Keyboard attachment for an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyMarkup {
    /// One-tap answer keyboard shown under the input field.
    AnswerKeyboard {
        /// Rows of (label, request_contact) buttons.
        options: Vec<Vec<(String, bool)>>,
        one_time: bool,
        selective: bool,
    },
    /// Force the client into reply mode so the answer correlates directly.
    ForceReply { selective: bool },
    InlineKeyboard(Vec<Vec<InlineButton>>),
    RemoveKeyboard,
}

/// An outgoing message, transport-neutral.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub target: i64,
    pub text: String,
    pub format: MessageFormat,
    pub disable_preview: bool,
    pub reply_to_message_id: Option<i64>,
    pub reply_markup: Option<ReplyMarkup>,
}

impl OutgoingMessage {
    pub fn text(target: i64, text: impl Into<String>) -> Self {
        Self {
            target,
            text: text.into(),
            format: MessageFormat::default(),
            disable_preview: false,
            reply_to_message_id: None,
            reply_markup: None,
        }
    }
}

/// Identity of the sent message, needed to key pending questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat_id: i64,
    pub message_id: i64,
}

/// The bot's own account, fetched once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct BotIdentity {
    pub id: i64,
    pub name: String,
    pub username: String,
}

/// Everything the dispatcher needs from a messaging platform.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-poll for updates after the given cursor.
    async fn fetch_updates(&self, offset: Option<i64>) -> TransportResult<Vec<Update>>;

    async fn send_message(&self, message: OutgoingMessage) -> TransportResult<SentMessage>;

    /// Acknowledge a button press, optionally with user-visible feedback.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> TransportResult<()>;

    async fn set_webhook(&self, url: &str) -> TransportResult<()>;

    async fn delete_webhook(&self) -> TransportResult<()>;

    async fn bot_identity(&self) -> TransportResult<BotIdentity>;
}
