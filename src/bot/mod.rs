//! Bot core: shared state, the builder, and the handler context.
//!
//! A [`Bot`] is a cheap clone over shared inner state. Registries live behind
//! parking_lot mutexes; guards are never held across an await. Lock order is
//! replies, then inline, then store.

mod builtins;
mod dispatcher;

use crate::commands::{CommandAccess, CommandRegistry, CommandSpec, PatternSpec};
use crate::config::BotConfig;
use crate::errors::{AppError, AppResult};
use crate::event::{Answer, Event, InlineAnswer, PatternMatch};
use crate::handler::{CallbackRef, CommandFn, HandlerResult, InlineFn, PatternFn, ReplyFn};
use crate::inline::{InlineCallbackEntry, InlineRegistry};
use crate::localization::{t_args_lang, t_lang};
use crate::replies::{AnswerGroups, AnswerOption, PendingQuestion, ReplyRegistry};
use crate::store::DataStore;
use crate::transport::{
    InlineButton, MessageFormat, OutgoingMessage, ReplyMarkup, SentMessage, Transport,
};
use crate::update::{ChatKind, IncomingMessage, InlineQuery, Sender};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Telegram caps message text at this many characters; longer replies are
/// split into consecutive messages.
pub const MAX_MESSAGE_LEN: usize = 4096;

type UnhandledFn = Arc<dyn Fn(Ctx, IncomingMessage) -> crate::handler::HandlerFuture + Send + Sync>;
type InlineQueryFn = Arc<dyn Fn(Ctx, InlineQuery) -> crate::handler::HandlerFuture + Send + Sync>;

pub(crate) struct Inner {
    pub(crate) config: BotConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) store: Mutex<DataStore>,
    pub(crate) replies: Mutex<ReplyRegistry>,
    pub(crate) inline: Mutex<InlineRegistry>,
    pub(crate) commands: CommandRegistry,
    pub(crate) reply_handlers: HashMap<String, ReplyFn>,
    pub(crate) inline_handlers: HashMap<String, InlineFn>,
    pub(crate) unhandled: Option<UnhandledFn>,
    pub(crate) inline_query_hook: Option<InlineQueryFn>,
    pub(crate) running: AtomicBool,
}

/// The bot itself. Clones share all state.
#[derive(Clone)]
pub struct Bot {
    pub(crate) inner: Arc<Inner>,
}

impl Bot {
    pub fn builder(config: BotConfig) -> BotBuilder {
        BotBuilder::new(config)
    }

    pub fn config(&self) -> &BotConfig {
        &self.inner.config
    }

    /// Run a closure against the durable store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut DataStore) -> R) -> R {
        let mut store = self.inner.store.lock();
        f(&mut store)
    }

    /// Send a message, splitting text that exceeds the transport limit into
    /// consecutive chunks. Markup rides on every chunk; the last sent message
    /// is the one returned (and the one pending questions key on).
    pub async fn send_message(&self, message: OutgoingMessage) -> AppResult<SentMessage> {
        let chunks = split_chunks(&message.text, MAX_MESSAGE_LEN);
        let mut last = None;
        for chunk in chunks {
            let sent = self
                .inner
                .transport
                .send_message(OutgoingMessage {
                    target: message.target,
                    text: chunk,
                    format: message.format,
                    disable_preview: message.disable_preview,
                    reply_to_message_id: message.reply_to_message_id,
                    reply_markup: message.reply_markup.clone(),
                })
                .await?;
            last = Some(sent);
        }
        last.ok_or_else(|| AppError::Internal("cannot send an empty message".to_string()))
    }

    /// Record a user in the directory so admin commands can show a name for
    /// a bare numeric id later.
    pub(crate) fn record_user(&self, sender: &Sender) -> AppResult<()> {
        let key = format!("user.{}.name", sender.id);
        let name = sender.display_name(true, false);
        self.with_store(|store| {
            if store.get_or(&key, String::new()) != name {
                store.set(&key, &name, true)?;
            }
            Ok(())
        })
    }

    /// Register the webhook with the platform and remember it locally so a
    /// later polling run knows to tear it down.
    pub async fn set_webhook(&self, url: &str) -> AppResult<()> {
        self.inner.transport.set_webhook(url).await?;
        self.with_store(|store| {
            store.set("config.webhook", url, false)?;
            store.set("config.webhook_set", chrono::Utc::now().timestamp(), true)
        })?;
        info!(url, "Webhook registered");
        Ok(())
    }

    pub(crate) async fn disable_webhook(&self) -> AppResult<()> {
        self.inner.transport.delete_webhook().await?;
        self.with_store(|store| store.delete("config.webhook_set", true))?;
        info!("Webhook disabled");
        Ok(())
    }
}

fn split_chunks(text: &str, limit: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut count = 0usize;
    for c in text.chars() {
        if count == limit {
            chunks.push(std::mem::take(&mut current));
            count = 0;
        }
        current.push(c);
        count += 1;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Per-update handler context: who wrote, where, and how to respond.
#[derive(Clone)]
pub struct Ctx {
    pub bot: Bot,
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub user_id: Option<i64>,
    pub message_id: i64,
    /// Sender's language code, used for localized replies.
    pub language: Option<String>,
    /// Set when the handler acknowledges the callback itself, so the
    /// dispatcher skips its fallback acknowledgment.
    pub(crate) callback_acked: Option<Arc<AtomicBool>>,
}

impl Ctx {
    /// Plain HTML reply into the current chat.
    pub async fn reply(&self, text: impl Into<String>) -> HandlerResult {
        self.bot
            .send_message(OutgoingMessage::text(self.chat_id, text.into()))
            .await?;
        Ok(())
    }

    /// Localized message lookup in the sender's language.
    pub fn t(&self, key: &str) -> String {
        t_lang(key, self.language.as_deref())
    }

    pub fn t_args(&self, key: &str, args: &[(&str, &str)]) -> String {
        t_args_lang(key, args, self.language.as_deref())
    }

    /// Ask a question and register it for reply correlation.
    pub async fn ask(&self, ask: Ask) -> AppResult<SentMessage> {
        let markup = match &ask.answers {
            Some(groups) => ReplyMarkup::AnswerKeyboard {
                options: groups
                    .iter()
                    .map(|row| {
                        row.iter()
                            .map(|option| (option.text().to_string(), option.requests_contact()))
                            .collect()
                    })
                    .collect(),
                one_time: !ask.multiple,
                selective: ask.selective,
            },
            None => ReplyMarkup::ForceReply { selective: ask.selective },
        };
        let sent = self
            .bot
            .send_message(OutgoingMessage {
                target: self.chat_id,
                text: ask.text.clone(),
                format: MessageFormat::Html,
                disable_preview: true,
                reply_to_message_id: ask.reply_to.or(Some(self.message_id)),
                reply_markup: Some(markup),
            })
            .await?;

        let question = PendingQuestion {
            id: sent.message_id,
            question: ask.text,
            callback: ask.callback,
            user: ask.user.or(self.user_id),
            answers: ask.answers,
            multiple: ask.multiple,
            contact: ask.contact,
            extra: ask.extra,
            time: chrono::Utc::now().timestamp(),
        };
        {
            let mut replies = self.bot.inner.replies.lock();
            replies.open_question(self.chat_id, question);
            let mut store = self.bot.inner.store.lock();
            replies.persist(&mut store)?;
        }
        Ok(sent)
    }

    /// Send a message with an inline keyboard and register its callback.
    pub async fn ask_inline(&self, ask: AskInline) -> AppResult<SentMessage> {
        let sent = self
            .bot
            .send_message(OutgoingMessage {
                target: self.chat_id,
                text: ask.text,
                format: MessageFormat::Html,
                disable_preview: true,
                reply_to_message_id: ask.reply_to,
                reply_markup: Some(ReplyMarkup::InlineKeyboard(ask.buttons)),
            })
            .await?;

        let entry = InlineCallbackEntry {
            id: sent.message_id,
            time: chrono::Utc::now().timestamp(),
            callback: ask.callback,
            owner: ask.owner.or(self.user_id),
            extra: ask.extra,
        };
        {
            let mut inline = self.bot.inner.inline.lock();
            inline.register(self.chat_id, entry);
            let mut store = self.bot.inner.store.lock();
            inline.persist(&mut store)?;
        }
        Ok(sent)
    }

    /// Drop the free-form waiting state for the current user, if any.
    pub fn stop_waiting(&self) -> AppResult<()> {
        let Some(user_id) = self.user_id else {
            return Ok(());
        };
        let mut replies = self.bot.inner.replies.lock();
        if let Some(question_id) = replies.waiting_for(self.chat_id, user_id) {
            replies.close_question(self.chat_id, question_id);
            let mut store = self.bot.inner.store.lock();
            replies.persist(&mut store)?;
        }
        Ok(())
    }

    /// Acknowledge a pressed inline button, optionally with a toast or alert.
    /// Calling this inside an inline handler replaces the dispatcher's plain
    /// acknowledgment, so the query is never answered twice.
    pub async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> AppResult<()> {
        self.inner_transport()
            .answer_callback(callback_id, text, show_alert)
            .await?;
        if let Some(acked) = &self.callback_acked {
            acked.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    fn inner_transport(&self) -> &dyn Transport {
        self.bot.inner.transport.as_ref()
    }
}

/// Builder for a question posed through [`Ctx::ask`].
#[derive(Default)]
pub struct Ask {
    text: String,
    answers: Option<AnswerGroups>,
    callback: Option<CallbackRef<ReplyFn>>,
    user: Option<i64>,
    multiple: bool,
    contact: bool,
    selective: bool,
    reply_to: Option<i64>,
    extra: Map<String, Value>,
}

impl Ask {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// One row of literal answer options.
    pub fn options(mut self, literals: &[&str]) -> Self {
        let row = literals
            .iter()
            .map(|s| AnswerOption::Text((*s).to_string()))
            .collect();
        self.answers.get_or_insert_with(Vec::new).push(row);
        self
    }

    pub fn answer_rows(mut self, rows: AnswerGroups) -> Self {
        self.answers = Some(rows);
        self
    }

    /// Handler invoked with the correlated answer; named handlers survive a
    /// restart, closures do not.
    pub fn on_reply(mut self, callback: CallbackRef<ReplyFn>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Restrict the answer to a specific user instead of the asker.
    pub fn from_user(mut self, user_id: i64) -> Self {
        self.user = Some(user_id);
        self
    }

    /// Keep the question open after the first valid answer.
    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    /// Expect a shared contact instead of text.
    pub fn contact(mut self) -> Self {
        self.contact = true;
        self
    }

    /// Show the keyboard only to the addressed user.
    pub fn selective(mut self) -> Self {
        self.selective = true;
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Builder for an inline-keyboard message posed through [`Ctx::ask_inline`].
#[derive(Default)]
pub struct AskInline {
    text: String,
    buttons: Vec<Vec<InlineButton>>,
    callback: Option<CallbackRef<InlineFn>>,
    owner: Option<i64>,
    reply_to: Option<i64>,
    extra: Map<String, Value>,
}

impl AskInline {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// One row of (label, callback data) buttons.
    pub fn row(mut self, buttons: &[(&str, &str)]) -> Self {
        self.buttons.push(
            buttons
                .iter()
                .map(|(text, data)| InlineButton {
                    text: (*text).to_string(),
                    data: (*data).to_string(),
                })
                .collect(),
        );
        self
    }

    pub fn on_press(mut self, callback: CallbackRef<InlineFn>) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Restrict presses to a specific user; others are silently ignored.
    pub fn owner(mut self, user_id: i64) -> Self {
        self.owner = Some(user_id);
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Startup-time assembly of a [`Bot`].
pub struct BotBuilder {
    config: BotConfig,
    transport: Option<Arc<dyn Transport>>,
    store: Option<DataStore>,
    commands: CommandRegistry,
    reply_handlers: HashMap<String, ReplyFn>,
    inline_handlers: HashMap<String, InlineFn>,
    unhandled: Option<UnhandledFn>,
    inline_query_hook: Option<InlineQueryFn>,
    registration_error: Option<AppError>,
}

impl BotBuilder {
    pub fn new(config: BotConfig) -> Self {
        Self {
            config,
            transport: None,
            store: None,
            commands: CommandRegistry::new(),
            reply_handlers: HashMap::new(),
            inline_handlers: HashMap::new(),
            unhandled: None,
            inline_query_hook: None,
            registration_error: None,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: DataStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a command handler under its snake_case token.
    pub fn command<F, Fut>(
        mut self,
        token: &str,
        description: &str,
        access: CommandAccess,
        handler: F,
    ) -> Self
    where
        F: Fn(Ctx, Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: CommandFn = Arc::new(move |ctx, event| Box::pin(handler(ctx, event)));
        let result = self.commands.register(CommandSpec {
            token: token.to_string(),
            access,
            description: description.to_string(),
            handler,
        });
        if let Err(e) = result {
            self.registration_error.get_or_insert(e);
        }
        self
    }

    pub fn alias(mut self, alias: &str, target: &str) -> Self {
        if let Err(e) = self.commands.alias(alias, target) {
            self.registration_error.get_or_insert(e);
        }
        self
    }

    /// Register a free-text pattern, tried before token resolution.
    pub fn pattern<F, Fut>(
        mut self,
        pattern: &str,
        name: &str,
        access: CommandAccess,
        handler: F,
    ) -> Self
    where
        F: Fn(Ctx, PatternMatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let compiled = match Regex::new(pattern) {
            Ok(compiled) => compiled,
            Err(e) => {
                self.registration_error
                    .get_or_insert(AppError::Registration(format!(
                        "invalid pattern '{}': {}",
                        name, e
                    )));
                return self;
            }
        };
        let handler: PatternFn = Arc::new(move |ctx, m| Box::pin(handler(ctx, m)));
        self.commands.add_pattern(PatternSpec {
            pattern: compiled,
            name: name.to_string(),
            access,
            handler,
        });
        self
    }

    /// Register a named reply handler, resolvable after a restart.
    pub fn reply_handler<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Ctx, Answer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: ReplyFn = Arc::new(move |ctx, answer| Box::pin(handler(ctx, answer)));
        self.reply_handlers.insert(name.to_string(), handler);
        self
    }

    /// Register a named inline-callback handler, resolvable after a restart.
    pub fn inline_handler<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Ctx, InlineAnswer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler: InlineFn = Arc::new(move |ctx, answer| Box::pin(handler(ctx, answer)));
        self.inline_handlers.insert(name.to_string(), handler);
        self
    }

    /// Fallback for messages no command, pattern or question claimed.
    pub fn on_unhandled<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Ctx, IncomingMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.unhandled = Some(Arc::new(move |ctx, msg| Box::pin(handler(ctx, msg))));
        self
    }

    pub fn on_inline_query<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Ctx, InlineQuery) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.inline_query_hook = Some(Arc::new(move |ctx, q| Box::pin(handler(ctx, q))));
        self
    }

    /// Register the stock administration commands (/trust, /untrust, /admin,
    /// /allow_chat, /list with /start as alias).
    pub fn with_builtin_commands(self) -> Self {
        builtins::register(self)
    }

    /// Assemble the bot, restoring pending questions and inline keyboards
    /// from the durable store.
    pub fn build(self) -> AppResult<Bot> {
        if let Some(e) = self.registration_error {
            return Err(e);
        }
        let transport = self
            .transport
            .ok_or_else(|| AppError::Config("a transport is required".to_string()))?;
        let mut store = match self.store {
            Some(store) => store,
            None => DataStore::load(&self.config.data_file)?,
        };
        let replies = ReplyRegistry::restore(&mut store)?;
        let inline = InlineRegistry::restore(&mut store)?;
        info!(
            inline_keyboards = inline.len(),
            "Registries restored from durable store"
        );

        Ok(Bot {
            inner: Arc::new(Inner {
                config: self.config,
                transport,
                store: Mutex::new(store),
                replies: Mutex::new(replies),
                inline: Mutex::new(inline),
                commands: self.commands,
                reply_handlers: self.reply_handlers,
                inline_handlers: self.inline_handlers,
                unhandled: self.unhandled,
                inline_query_hook: self.inline_query_hook,
                running: AtomicBool::new(false),
            }),
        })
    }
}

pub(crate) fn resolve_reply_handler(
    bot: &Bot,
    callback: &Option<CallbackRef<ReplyFn>>,
) -> Option<ReplyFn> {
    match callback {
        Some(CallbackRef::Direct(f)) => Some(f.clone()),
        Some(CallbackRef::Named(name)) => {
            let found = bot.inner.reply_handlers.get(name).cloned();
            if found.is_none() {
                warn!(handler = %name, "Named reply handler is not registered");
            }
            found
        }
        None => None,
    }
}

pub(crate) fn resolve_inline_handler(
    bot: &Bot,
    callback: &Option<CallbackRef<InlineFn>>,
) -> Option<InlineFn> {
    match callback {
        Some(CallbackRef::Direct(f)) => Some(f.clone()),
        Some(CallbackRef::Named(name)) => {
            let found = bot.inner.inline_handlers.get(name).cloned();
            if found.is_none() {
                warn!(handler = %name, "Named inline handler is not registered");
            }
            found
        }
        None => None,
    }
}
