//! Telegram adapter for the [`Transport`] trait, built on teloxide.
//!
//! All wire-level teloxide types stay inside this module; the rest of the
//! crate only sees the transport-neutral update model.

use crate::errors::{AppError, AppResult};
use crate::transport::{
    BotIdentity, MessageFormat, OutgoingMessage, ReplyMarkup, SentMessage, Transport,
    TransportError, TransportResult,
};
use crate::update::{
    CallbackQuery, ChatKind, Contact, IncomingMessage, InlineQuery, MembershipChange, Sender,
    Update, UpdateKind,
};
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{
    ButtonRequest, CallbackQueryId, ForceReply, InlineKeyboardButton, InlineKeyboardMarkup,
    KeyboardButton, KeyboardMarkup, KeyboardRemove, LinkPreviewOptions, MaybeInaccessibleMessage,
    MessageId, ParseMode, ReplyParameters,
};
use teloxide::{ApiError, RequestError};
use tracing::debug;

/// Telegram transport backed by a teloxide [`Bot`].
#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(token: impl Into<String>) -> Self {
        Self { bot: Bot::new(token.into()) }
    }

    /// Build with an explicit HTTP client (timeouts, proxies).
    pub fn with_client(token: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            bot: Bot::with_client(token.into(), client),
        }
    }

    /// Parse a webhook request body into a transport-neutral update.
    pub fn parse_webhook_payload(payload: &str) -> AppResult<Update> {
        let update: teloxide::types::Update = serde_json::from_str(payload)
            .map_err(|e| AppError::Transport(format!("malformed webhook payload: {}", e)))?;
        Ok(convert_update(update))
    }
}

fn classify_error(err: RequestError) -> TransportError {
    match err {
        RequestError::Api(ApiError::TerminatedByOtherGetUpdates) => {
            TransportError::Conflict("another getUpdates consumer is running".to_string())
        }
        RequestError::Network(e) => TransportError::Transient(e.to_string()),
        RequestError::RetryAfter(secs) => TransportError::Transient(format!(
            "rate limited, retry after {}s",
            secs.duration().as_secs()
        )),
        RequestError::Io(e) => TransportError::Transient(e.to_string()),
        other => TransportError::Fatal(other.to_string()),
    }
}

fn convert_sender(user: &teloxide::types::User) -> Sender {
    Sender {
        id: user.id.0 as i64,
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        username: user.username.clone(),
        language_code: user.language_code.clone(),
    }
}

fn convert_chat_kind(chat: &teloxide::types::Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else if chat.is_group() {
        ChatKind::Group
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else {
        ChatKind::Channel
    }
}

fn convert_membership(message: &teloxide::types::Message) -> Option<MembershipChange> {
    if let Some(members) = message.new_chat_members() {
        return Some(MembershipChange::NewMembers(
            members.iter().map(convert_sender).collect(),
        ));
    }
    if let Some(member) = message.left_chat_member() {
        return Some(MembershipChange::MemberLeft(convert_sender(member)));
    }
    if let Some(title) = message.new_chat_title() {
        return Some(MembershipChange::NewTitle(title.to_string()));
    }
    if let Some(from) = message.migrate_from_chat_id() {
        return Some(MembershipChange::MigratedFrom(from.0));
    }
    None
}

fn convert_message(message: &teloxide::types::Message) -> IncomingMessage {
    IncomingMessage {
        message_id: message.id.0 as i64,
        chat_id: message.chat.id.0,
        chat_kind: convert_chat_kind(&message.chat),
        chat_title: message.chat.title().map(str::to_string),
        from: message.from.as_ref().map(convert_sender),
        text: message.text().map(str::to_string),
        contact: message.contact().map(|c| Contact {
            phone_number: c.phone_number.clone(),
            first_name: c.first_name.clone(),
            user_id: c.user_id.map(|id| id.0 as i64),
        }),
        reply_to_message_id: message.reply_to_message().map(|m| m.id.0 as i64),
        membership: convert_membership(message),
    }
}

fn convert_update(update: teloxide::types::Update) -> Update {
    use teloxide::types::UpdateKind as Wire;
    let id = update.id.0 as i64;
    let kind = match update.kind {
        Wire::Message(m) => UpdateKind::Message(convert_message(&m)),
        Wire::EditedMessage(m) => UpdateKind::EditedMessage(convert_message(&m)),
        Wire::ChannelPost(m) => UpdateKind::ChannelPost(convert_message(&m)),
        Wire::EditedChannelPost(m) => UpdateKind::EditedChannelPost(convert_message(&m)),
        Wire::CallbackQuery(q) => {
            let (chat_id, message_id) = match &q.message {
                Some(MaybeInaccessibleMessage::Regular(m)) => {
                    (Some(m.chat.id.0), Some(m.id.0 as i64))
                }
                Some(MaybeInaccessibleMessage::Inaccessible(m)) => {
                    (Some(m.chat.id.0), Some(m.message_id.0 as i64))
                }
                None => (None, None),
            };
            UpdateKind::CallbackQuery(CallbackQuery {
                id: q.id.0,
                from: convert_sender(&q.from),
                chat_id,
                message_id,
                data: q.data,
            })
        }
        Wire::InlineQuery(q) => UpdateKind::InlineQuery(InlineQuery {
            id: q.id.to_string(),
            from: convert_sender(&q.from),
            query: q.query,
        }),
        other => {
            debug!(kind = ?std::mem::discriminant(&other), "Unsupported update kind");
            UpdateKind::Unsupported
        }
    };
    Update { id, kind }
}

fn convert_markup(markup: ReplyMarkup) -> teloxide::types::ReplyMarkup {
    match markup {
        ReplyMarkup::AnswerKeyboard { options, one_time, selective } => {
            let rows: Vec<Vec<KeyboardButton>> = options
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(text, request_contact)| {
                            let button = KeyboardButton::new(text);
                            if request_contact {
                                button.request(ButtonRequest::Contact)
                            } else {
                                button
                            }
                        })
                        .collect()
                })
                .collect();
            teloxide::types::ReplyMarkup::Keyboard(KeyboardMarkup {
                resize_keyboard: true,
                one_time_keyboard: one_time,
                selective,
                ..KeyboardMarkup::new(rows)
            })
        }
        ReplyMarkup::ForceReply { selective } => teloxide::types::ReplyMarkup::ForceReply(
            ForceReply {
                selective,
                ..ForceReply::new()
            },
        ),
        ReplyMarkup::InlineKeyboard(rows) => {
            let rows: Vec<Vec<InlineKeyboardButton>> = rows
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|button| InlineKeyboardButton::callback(button.text, button.data))
                        .collect()
                })
                .collect();
            teloxide::types::ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows))
        }
        ReplyMarkup::RemoveKeyboard => {
            teloxide::types::ReplyMarkup::KeyboardRemove(KeyboardRemove::new())
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn fetch_updates(&self, offset: Option<i64>) -> TransportResult<Vec<Update>> {
        let mut request = self.bot.get_updates().timeout(25);
        if let Some(offset) = offset {
            request = request.offset(offset as i32);
        }
        let updates = request.await.map_err(classify_error)?;
        Ok(updates.into_iter().map(convert_update).collect())
    }

    async fn send_message(&self, message: OutgoingMessage) -> TransportResult<SentMessage> {
        let mut request = self
            .bot
            .send_message(ChatId(message.target), message.text);
        request = match message.format {
            MessageFormat::Html => request.parse_mode(ParseMode::Html),
            MessageFormat::Markdown => request.parse_mode(ParseMode::MarkdownV2),
            MessageFormat::Plain => request,
        };
        if message.disable_preview {
            request = request.link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            });
        }
        if let Some(reply_to) = message.reply_to_message_id {
            request = request.reply_parameters(ReplyParameters::new(MessageId(reply_to as i32)));
        }
        if let Some(markup) = message.reply_markup {
            request = request.reply_markup(convert_markup(markup));
        }
        let sent = request.await.map_err(classify_error)?;
        Ok(SentMessage {
            chat_id: sent.chat.id.0,
            message_id: sent.id.0 as i64,
        })
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> TransportResult<()> {
        let mut request = self
            .bot
            .answer_callback_query(CallbackQueryId(callback_id.to_string()));
        if let Some(text) = text {
            request = request.text(text.to_string());
        }
        if show_alert {
            request = request.show_alert(true);
        }
        request.await.map_err(classify_error)?;
        Ok(())
    }

    async fn set_webhook(&self, url: &str) -> TransportResult<()> {
        let url = url
            .parse::<url::Url>()
            .map_err(|e| TransportError::Fatal(format!("invalid webhook url: {}", e)))?;
        self.bot.set_webhook(url).await.map_err(classify_error)?;
        Ok(())
    }

    async fn delete_webhook(&self) -> TransportResult<()> {
        self.bot.delete_webhook().await.map_err(classify_error)?;
        Ok(())
    }

    async fn bot_identity(&self) -> TransportResult<BotIdentity> {
        let me = self.bot.get_me().await.map_err(classify_error)?;
        Ok(BotIdentity {
            id: me.id.0 as i64,
            name: me.first_name.clone(),
            username: me.username().to_string(),
        })
    }
}
