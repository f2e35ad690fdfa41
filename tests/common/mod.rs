//! Shared test fixtures: an in-memory transport and update constructors.

use async_trait::async_trait;
use parking_lot::Mutex;
use replybot::config::BotConfig;
use replybot::transport::{
    BotIdentity, OutgoingMessage, SentMessage, Transport, TransportError, TransportResult,
};
use replybot::update::{
    CallbackQuery, ChatKind, Contact, IncomingMessage, Sender, Update, UpdateKind,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};

#[allow(dead_code)]
pub const BOT_ID: i64 = 999;

/// Records outgoing traffic and replays scripted update batches.
#[derive(Default)]
pub struct MockTransport {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub answered_callbacks: Mutex<Vec<String>>,
    pub webhook_deleted: Mutex<bool>,
    batches: Mutex<VecDeque<Vec<Update>>>,
    fetch_error: Mutex<Option<TransportError>>,
    next_message_id: AtomicI64,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            next_message_id: AtomicI64::new(1000),
            ..Self::default()
        }
    }

    #[allow(dead_code)]
    pub fn push_batch(&self, updates: Vec<Update>) {
        self.batches.lock().push_back(updates);
    }

    #[allow(dead_code)]
    pub fn fail_fetches_with(&self, error: TransportError) {
        *self.fetch_error.lock() = Some(error);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|m| m.text.clone()).collect()
    }

    #[allow(dead_code)]
    pub fn last_sent_message_id(&self) -> i64 {
        self.next_message_id.load(Ordering::SeqCst) - 1
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_updates(&self, _offset: Option<i64>) -> TransportResult<Vec<Update>> {
        if let Some(batch) = self.batches.lock().pop_front() {
            return Ok(batch);
        }
        match self.fetch_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(Vec::new()),
        }
    }

    async fn send_message(&self, message: OutgoingMessage) -> TransportResult<SentMessage> {
        let chat_id = message.target;
        self.sent.lock().push(message);
        Ok(SentMessage {
            chat_id,
            message_id: self.next_message_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        _text: Option<&str>,
        _show_alert: bool,
    ) -> TransportResult<()> {
        self.answered_callbacks.lock().push(callback_id.to_string());
        Ok(())
    }

    async fn set_webhook(&self, _url: &str) -> TransportResult<()> {
        Ok(())
    }

    async fn delete_webhook(&self) -> TransportResult<()> {
        *self.webhook_deleted.lock() = true;
        Ok(())
    }

    async fn bot_identity(&self) -> TransportResult<BotIdentity> {
        Ok(BotIdentity {
            id: BOT_ID,
            name: "Test Bot".to_string(),
            username: "test_bot".to_string(),
        })
    }
}

pub fn test_config() -> BotConfig {
    BotConfig {
        token: "123456:ABCdefGHIjklMNOpqrsTUVwxyz123".to_string(),
        step_delay_secs: 0,
        retry_delay_secs: 0,
        ..BotConfig::default()
    }
}

pub fn sender(user_id: i64) -> Sender {
    Sender {
        id: user_id,
        first_name: format!("User{}", user_id),
        last_name: None,
        username: Some(format!("user{}", user_id)),
        language_code: Some("en".to_string()),
    }
}

pub fn private_message(chat_id: i64, user_id: i64, message_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        message_id,
        chat_id,
        chat_kind: ChatKind::Private,
        chat_title: None,
        from: Some(sender(user_id)),
        text: Some(text.to_string()),
        contact: None,
        reply_to_message_id: None,
        membership: None,
    }
}

#[allow(dead_code)]
pub fn group_message(chat_id: i64, user_id: i64, message_id: i64, text: &str) -> IncomingMessage {
    IncomingMessage {
        chat_kind: ChatKind::Group,
        ..private_message(chat_id, user_id, message_id, text)
    }
}

#[allow(dead_code)]
pub fn contact_message(chat_id: i64, user_id: i64, message_id: i64) -> IncomingMessage {
    IncomingMessage {
        text: None,
        contact: Some(Contact {
            phone_number: "+1234567".to_string(),
            first_name: format!("User{}", user_id),
            user_id: Some(user_id),
        }),
        ..private_message(chat_id, user_id, message_id, "")
    }
}

pub fn message_update(id: i64, message: IncomingMessage) -> Update {
    Update {
        id,
        kind: UpdateKind::Message(message),
    }
}

#[allow(dead_code)]
pub fn edited_update(id: i64, message: IncomingMessage) -> Update {
    Update {
        id,
        kind: UpdateKind::EditedMessage(message),
    }
}

#[allow(dead_code)]
pub fn callback_update(
    id: i64,
    chat_id: i64,
    message_id: i64,
    user_id: i64,
    data: &str,
) -> Update {
    Update {
        id,
        kind: UpdateKind::CallbackQuery(CallbackQuery {
            id: format!("cb{}", id),
            from: sender(user_id),
            chat_id: Some(chat_id),
            message_id: Some(message_id),
            data: Some(data.to_string()),
        }),
    }
}
