//! Reply Registry: pending questions and reply correlation.
//!
//! When a handler asks the user a question, the question is recorded here and
//! the answer may arrive much later, possibly after a restart and in a
//! different process invocation. Three co-located indexes per chat support
//! the correlation fallback chain:
//!
//! - `by_message_id` — authoritative store, keyed by the question message id
//! - `by_user` — the single currently-open free-form question per asking user
//! - `by_answer_text` — literal answer text of the currently-open answer set
//!
//! Opening any question in a chat wipes and rebuilds that chat's
//! `by_answer_text` index, even when other `multiple` questions are still
//! open there. That scoping is inherited behavior that persisted state and
//! existing bots rely on; do not "fix" it without a migration.

use crate::errors::AppResult;
use crate::handler::{callback_serde, CallbackRef, ReplyFn};
use crate::store::DataStore;
use crate::update::IncomingMessage;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Pending questions older than this are pruned during restore.
pub const RETENTION_SECS: i64 = 60 * 60 * 24 * 30;

/// One candidate answer: a bare literal or a structured button.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnswerOption {
    Text(String),
    Button {
        text: String,
        #[serde(default)]
        request_contact: bool,
    },
}

impl AnswerOption {
    pub fn text(&self) -> &str {
        match self {
            AnswerOption::Text(text) => text,
            AnswerOption::Button { text, .. } => text,
        }
    }

    pub fn requests_contact(&self) -> bool {
        matches!(self, AnswerOption::Button { request_contact: true, .. })
    }
}

/// Ordered groups of candidate answers (keyboard rows). Empty means free-form.
pub type AnswerGroups = Vec<Vec<AnswerOption>>;

/// One outstanding "ask", waiting for a correlated reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuestion {
    /// Id of the message carrying the question; primary key within the chat.
    pub id: i64,
    pub question: String,
    #[serde(with = "callback_serde", default)]
    pub callback: Option<CallbackRef<ReplyFn>>,
    /// Who may answer; `None` means anyone in the chat.
    #[serde(default)]
    pub user: Option<i64>,
    #[serde(default)]
    pub answers: Option<AnswerGroups>,
    /// When true the question stays open after being answered.
    #[serde(default)]
    pub multiple: bool,
    /// Expected reply is a shared contact rather than text.
    #[serde(default)]
    pub contact: bool,
    /// Opaque payload passed through to the handler untouched.
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Unix seconds; drives the retention window.
    pub time: i64,
}

impl PendingQuestion {
    /// Flattened iterator over the literal answers.
    pub fn flat_answers(&self) -> impl Iterator<Item = &AnswerOption> {
        self.answers.iter().flatten().flatten()
    }

    fn has_answer_options(&self) -> bool {
        self.flat_answers().next().is_some()
    }
}

/// Why an incoming message was (or was not) matched to a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchReason {
    DirectReply,
    ContactReply,
    AnswerText,
    WaitingUserInput,
    Unknown,
}

impl MatchReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchReason::DirectReply => "direct reply",
            MatchReason::ContactReply => "contact reply",
            MatchReason::AnswerText => "answer text match",
            MatchReason::WaitingUserInput => "waiting user input",
            MatchReason::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Default, Clone)]
struct ChatReplyState {
    by_message_id: BTreeMap<i64, PendingQuestion>,
    by_user: BTreeMap<i64, i64>,
    by_answer_text: BTreeMap<String, i64>,
}

impl ChatReplyState {
    fn is_empty(&self) -> bool {
        self.by_message_id.is_empty() && self.by_user.is_empty() && self.by_answer_text.is_empty()
    }
}

/// Durable mapping of pending questions, indexed per chat.
#[derive(Debug, Default, Clone)]
pub struct ReplyRegistry {
    chats: BTreeMap<i64, ChatReplyState>,
}

impl ReplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a question and rebuild the chat's correlation indexes.
    pub fn open_question(&mut self, chat_id: i64, question: PendingQuestion) {
        let state = self.chats.entry(chat_id).or_default();
        if let Some(user) = question.user {
            state.by_user.insert(user, question.id);
        }
        // The answer-text index reflects only the latest opened answer set for
        // the whole chat.
        state.by_answer_text.clear();
        for option in question.flat_answers() {
            if !option.requests_contact() {
                state
                    .by_answer_text
                    .insert(option.text().to_string(), question.id);
            }
        }
        debug!(
            chat_id,
            question_id = question.id,
            answers = state.by_answer_text.len(),
            "Opened pending question"
        );
        state.by_message_id.insert(question.id, question);
    }

    /// Match an incoming message to an open question. Absence of a match is a
    /// normal outcome, never an error. Priority: explicit correlation beats
    /// implicit text matching beats ambient waiting state.
    pub fn correlate(
        &self,
        chat_id: i64,
        message: &IncomingMessage,
    ) -> (Option<PendingQuestion>, MatchReason) {
        let Some(state) = self.chats.get(&chat_id) else {
            return (None, MatchReason::Unknown);
        };

        // 1. Explicit reply to the question message.
        if let Some(reply_to) = message.reply_to_message_id {
            if let Some(question) = state.by_message_id.get(&reply_to) {
                return (Some(question.clone()), MatchReason::DirectReply);
            }
        }

        // 2. Shared contact answering the first open contact request.
        if message.contact.is_some() {
            if let Some(question) = state.by_message_id.values().find(|q| q.contact) {
                return (Some(question.clone()), MatchReason::ContactReply);
            }
        }

        // 3. Literal answer text of the currently-open answer set.
        if !message.text().is_empty() {
            if let Some(id) = state.by_answer_text.get(message.text()) {
                if let Some(question) = state.by_message_id.get(id) {
                    return (Some(question.clone()), MatchReason::AnswerText);
                }
            }
        }

        // 4. Free-form input from the user we are waiting on, private chats
        // only; group chats are too ambiguous for ambient correlation.
        if message.chat_kind.is_private() && !message.is_command() {
            if let Some(sender) = message.sender_id() {
                if let Some(id) = state.by_user.get(&sender) {
                    if let Some(question) = state.by_message_id.get(id) {
                        return (Some(question.clone()), MatchReason::WaitingUserInput);
                    }
                }
            }
        }

        (None, MatchReason::Unknown)
    }

    /// Decide whether a correlated message is an acceptable answer.
    pub fn validate_answer(question: &PendingQuestion, message: &IncomingMessage) -> bool {
        if question.contact && message.contact.is_some() {
            return true;
        }
        if question.has_answer_options() {
            let reply = message.text().trim();
            return question.flat_answers().any(|option| option.text() == reply);
        }
        // Free-form question: any text is accepted.
        true
    }

    /// Remove a question and every index entry pointing at it. Callers skip
    /// this for `multiple` questions; those stay open until explicitly closed
    /// or pruned by age.
    pub fn close_question(&mut self, chat_id: i64, question_id: i64) {
        if let Some(state) = self.chats.get_mut(&chat_id) {
            state.by_message_id.remove(&question_id);
            state.by_user.retain(|_, id| *id != question_id);
            state.by_answer_text.clear();
            if state.is_empty() {
                self.chats.remove(&chat_id);
            }
            info!(chat_id, question_id, "Closed pending question");
        }
    }

    pub fn question(&self, chat_id: i64, question_id: i64) -> Option<&PendingQuestion> {
        self.chats.get(&chat_id)?.by_message_id.get(&question_id)
    }

    pub fn open_questions(&self, chat_id: i64) -> usize {
        self.chats
            .get(&chat_id)
            .map(|state| state.by_message_id.len())
            .unwrap_or(0)
    }

    /// Message id the answer-text index maps a literal to, if any.
    pub fn answer_target(&self, chat_id: i64, literal: &str) -> Option<i64> {
        self.chats.get(&chat_id)?.by_answer_text.get(literal).copied()
    }

    /// Question id we are waiting on for a given user, if any.
    pub fn waiting_for(&self, chat_id: i64, user_id: i64) -> Option<i64> {
        self.chats.get(&chat_id)?.by_user.get(&user_id).copied()
    }

    /// Write all three indexes to the store under the `replies.*` namespace.
    pub fn persist(&self, store: &mut DataStore) -> AppResult<()> {
        let mut asks: BTreeMap<i64, &BTreeMap<i64, PendingQuestion>> = BTreeMap::new();
        let mut users: BTreeMap<i64, &BTreeMap<i64, i64>> = BTreeMap::new();
        let mut answers: BTreeMap<i64, &BTreeMap<String, i64>> = BTreeMap::new();
        for (chat_id, state) in &self.chats {
            asks.insert(*chat_id, &state.by_message_id);
            users.insert(*chat_id, &state.by_user);
            answers.insert(*chat_id, &state.by_answer_text);
        }
        store.set("replies.asks", &asks, false)?;
        store.set("replies.asks_users", &users, false)?;
        store.set("replies.asks_answers", &answers, true)?;
        Ok(())
    }

    /// Rebuild the registry from the store, pruning questions older than the
    /// retention window. When pruning changed anything the trimmed state is
    /// persisted right away.
    pub fn restore(store: &mut DataStore) -> AppResult<Self> {
        let asks: BTreeMap<i64, BTreeMap<i64, PendingQuestion>> =
            store.get_or("replies.asks", BTreeMap::new());
        let users: BTreeMap<i64, BTreeMap<i64, i64>> =
            store.get_or("replies.asks_users", BTreeMap::new());
        let answers: BTreeMap<i64, BTreeMap<String, i64>> =
            store.get_or("replies.asks_answers", BTreeMap::new());

        let mut registry = Self::new();
        let cutoff = chrono::Utc::now().timestamp() - RETENTION_SECS;
        let mut pruned = 0usize;
        for (chat_id, questions) in asks {
            let state = registry.chats.entry(chat_id).or_default();
            for (id, question) in questions {
                if question.time < cutoff {
                    pruned += 1;
                    continue;
                }
                state.by_message_id.insert(id, question);
            }
        }
        for (chat_id, map) in users {
            registry.chats.entry(chat_id).or_default().by_user = map;
        }
        for (chat_id, map) in answers {
            registry.chats.entry(chat_id).or_default().by_answer_text = map;
        }
        registry.chats.retain(|_, state| !state.is_empty());

        if pruned > 0 {
            info!(pruned, "Pruned expired pending questions during restore");
            registry.persist(store)?;
        }
        Ok(registry)
    }
}
