//! Transport-neutral update model.
//!
//! The dispatcher never touches wire-level payloads directly; the transport
//! adapter maps platform updates into these types before dispatch. Keeping the
//! model small makes correlation logic testable without a live connection.

use serde::{Deserialize, Serialize};

/// Leading character marking a command message ("/trust 42").
pub const COMMAND_MARKER: char = '/';

/// One inbound event from the messaging transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Monotonically increasing update id, drives the next poll cursor.
    pub id: i64,
    pub kind: UpdateKind,
}

/// Classified update payload, in dispatch priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateKind {
    Message(IncomingMessage),
    EditedMessage(IncomingMessage),
    ChannelPost(IncomingMessage),
    EditedChannelPost(IncomingMessage),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    /// Anything the adapter could not classify; logged and dropped.
    Unsupported,
}

/// Message author (or callback/inline query issuer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

impl Sender {
    /// Human-readable author name: "First Last @username (id)"
    pub fn display_name(&self, with_username: bool, with_id: bool) -> String {
        let mut name = self.first_name.clone();
        if let Some(last) = &self.last_name {
            name.push(' ');
            name.push_str(last);
        }
        if with_username {
            if let Some(username) = &self.username {
                name.push_str(" @");
                name.push_str(username);
            }
        }
        if with_id {
            name.push_str(&format!(" ({})", self.id));
        }
        name
    }
}

/// Conversation type of the chat carrying a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_private(&self) -> bool {
        matches!(self, ChatKind::Private)
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ChatKind::Group | ChatKind::Supergroup)
    }

    pub fn is_channel(&self) -> bool {
        matches!(self, ChatKind::Channel)
    }
}

/// Shared-contact payload attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub phone_number: String,
    pub first_name: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// Service events describing chat membership and metadata changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MembershipChange {
    NewMembers(Vec<Sender>),
    MemberLeft(Sender),
    NewTitle(String),
    MigratedFrom(i64),
}

/// A regular or channel message, reduced to what dispatch needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    #[serde(default)]
    pub chat_title: Option<String>,
    #[serde(default)]
    pub from: Option<Sender>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub contact: Option<Contact>,
    #[serde(default)]
    pub reply_to_message_id: Option<i64>,
    #[serde(default)]
    pub membership: Option<MembershipChange>,
}

impl IncomingMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn sender_id(&self) -> Option<i64> {
        // Channel posts have no meaningful author; a sentinel id keeps the
        // access checks uniform.
        if self.chat_kind.is_channel() {
            return Some(-1);
        }
        self.from.as_ref().map(|sender| sender.id)
    }

    pub fn is_command(&self) -> bool {
        self.text().starts_with(COMMAND_MARKER)
    }

    /// Author name for logging, empty string when there is no author.
    pub fn from_name(&self) -> String {
        if self.chat_kind.is_channel() {
            return format!("channel {}", self.chat_title.as_deref().unwrap_or_default());
        }
        self.from
            .as_ref()
            .map(|sender| sender.display_name(true, true))
            .unwrap_or_default()
    }
}

/// Button-press callback, keyed back to the message that showed the keyboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: Sender,
    /// Chat of the message that carried the inline keyboard; missing when the
    /// message is no longer accessible.
    #[serde(default)]
    pub chat_id: Option<i64>,
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Inline query ("@bot query" typed in any chat).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: Sender,
    pub query: String,
}
