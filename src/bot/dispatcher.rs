//! Update dispatch: classify, correlate, validate, and invoke exactly one
//! handler per update.
//!
//! Dispatch priority for a text message: pending-question correlation first,
//! then registered patterns, then command-token resolution, then the
//! unhandled hook. A validation failure is not terminal; the message falls
//! through to pattern and command dispatch so "/cancel" still works while a
//! question is open.

use crate::commands::{is_admin, is_allowed, is_global_admin};
use crate::event::{Answer, Event, InlineAnswer, PatternMatch};
use crate::errors::AppResult;
use crate::handler::HandlerFuture;
use crate::replies::ReplyRegistry;
use crate::transport::TransportError;
use crate::update::{IncomingMessage, MembershipChange, Update, UpdateKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::{Bot, Ctx};

impl Bot {
    /// Long-poll for updates until [`Bot::stop`] is called or the error
    /// budget is exhausted.
    pub async fn run_polling(&self) -> AppResult<()> {
        self.inner.running.store(true, Ordering::SeqCst);
        self.before_start().await;

        let step_delay = Duration::from_secs(self.inner.config.step_delay_secs);
        let retry_delay = Duration::from_secs(self.inner.config.retry_delay_secs);
        let mut offset: Option<i64> = None;
        let mut consecutive_errors: u32 = 0;

        while self.inner.running.load(Ordering::SeqCst) {
            let started = Instant::now();
            match self.inner.transport.fetch_updates(offset).await {
                Ok(updates) => {
                    consecutive_errors = 0;
                    for update in updates {
                        offset = Some(update.id + 1);
                        self.process_update(update).await;
                    }
                    // Keep the polling cadence: subtract the time already
                    // spent processing from the step delay.
                    if let Some(rest) = step_delay.checked_sub(started.elapsed()) {
                        tokio::time::sleep(rest).await;
                    }
                }
                Err(TransportError::Conflict(msg)) => {
                    warn!(
                        reason = %msg,
                        "Polling conflict; assuming a stale webhook and disabling it"
                    );
                    if let Err(e) = self.disable_webhook().await {
                        error!(error = %e, "Failed to disable webhook after conflict");
                    }
                }
                Err(e) => {
                    consecutive_errors += 1;
                    error!(
                        error = %e,
                        consecutive_errors,
                        "Polling iteration failed"
                    );
                    if consecutive_errors >= self.inner.config.max_consecutive_errors {
                        error!("Consecutive error budget exhausted, stopping");
                        self.stop();
                        break;
                    }
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
        info!("Polling loop stopped");
        Ok(())
    }

    /// Ask the polling loop to stop after the current iteration.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Cache the bot identity and tear down a stale webhook before polling.
    async fn before_start(&self) {
        match self.inner.transport.bot_identity().await {
            Ok(identity) => {
                info!(
                    bot_id = identity.id,
                    username = %identity.username,
                    "Starting as @{}", identity.username
                );
                let result = self.with_store(|store| {
                    store.set("bot.id", identity.id, false)?;
                    store.set("bot.name", &identity.name, false)?;
                    store.set("bot.username", &identity.username, true)
                });
                if let Err(e) = result {
                    warn!(error = %e, "Failed to cache bot identity");
                }
            }
            Err(e) => warn!(error = %e, "Could not fetch bot identity"),
        }
        if self.with_store(|store| store.contains("config.webhook_set")) {
            warn!("Webhook is registered but polling was requested; disabling webhook");
            if let Err(e) = self.disable_webhook().await {
                error!(error = %e, "Failed to disable webhook");
            }
        }
    }

    /// Dispatch one update. Handler and persistence failures are logged and
    /// reported; they never abort the polling loop.
    pub async fn process_update(&self, update: Update) {
        debug!(update_id = update.id, "Processing update");
        match update.kind {
            UpdateKind::Message(message) | UpdateKind::ChannelPost(message) => {
                self.dispatch_message(message).await;
            }
            UpdateKind::EditedMessage(message) | UpdateKind::EditedChannelPost(message) => {
                info!(
                    chat_id = message.chat_id,
                    message_id = message.message_id,
                    "Skipping edited message"
                );
            }
            UpdateKind::CallbackQuery(query) => self.dispatch_callback(query).await,
            UpdateKind::InlineQuery(query) => self.dispatch_inline_query(query).await,
            UpdateKind::Unsupported => {
                debug!(update_id = update.id, "Ignoring unsupported update kind");
            }
        }
    }

    async fn dispatch_message(&self, message: IncomingMessage) {
        if message.chat_kind.is_channel() && self.inner.config.skip_channel_messages {
            debug!(chat_id = message.chat_id, "Skipping channel post");
            return;
        }
        if let Some(change) = &message.membership {
            self.handle_membership(&message, change.clone());
            return;
        }

        let ctx = self.message_ctx(&message);
        self.adopt_owner(&ctx, &message).await;
        if !message.chat_kind.is_channel() {
            if let Some(sender) = &message.from {
                if let Err(e) = self.record_user(sender) {
                    warn!(error = %e, "Failed to record user");
                }
            }
        }

        if self.inner.config.protect && !self.is_message_allowed(&message) {
            info!(
                chat_id = message.chat_id,
                from = %message.from_name(),
                "Message dropped by protection rules"
            );
            return;
        }

        self.handle_message(ctx, message).await;
    }

    async fn handle_message(&self, ctx: Ctx, message: IncomingMessage) {
        // 1. Reply correlation.
        let correlated = {
            let replies = self.inner.replies.lock();
            replies.correlate(message.chat_id, &message)
        };
        if let (Some(question), reason) = correlated {
            if ReplyRegistry::validate_answer(&question, &message) {
                info!(
                    chat_id = message.chat_id,
                    question_id = question.id,
                    reason = reason.as_str(),
                    "Message correlated to pending question"
                );
                if !question.multiple {
                    let result = {
                        let mut replies = self.inner.replies.lock();
                        replies.close_question(message.chat_id, question.id);
                        let mut store = self.inner.store.lock();
                        replies.persist(&mut store)
                    };
                    if let Err(e) = result {
                        error!(error = %e, "Failed to persist closed question");
                        return;
                    }
                }
                if let Some(handler) = super::resolve_reply_handler(self, &question.callback) {
                    let answer = Answer { message, question };
                    self.invoke(ctx.clone(), handler(ctx, answer)).await;
                }
                return;
            }
            warn!(
                chat_id = message.chat_id,
                question_id = question.id,
                reply = message.text(),
                "Reply did not validate against the question, falling through"
            );
        }

        // 2. Registered patterns; the first regex match wins.
        let text = message.text().to_string();
        if !text.is_empty() {
            for spec in self.inner.commands.patterns() {
                let Some(captures) = spec.pattern.captures(&text) else {
                    continue;
                };
                let allowed = self.with_store(|store| {
                    is_allowed(&spec.access, ctx.user_id, ctx.chat_id, ctx.chat_kind, store)
                });
                if !allowed {
                    debug!(pattern = %spec.name, "Pattern matched but caller is not allowed");
                    return;
                }
                let m = PatternMatch {
                    message: message.clone(),
                    captures: captures
                        .iter()
                        .skip(1)
                        .map(|c| c.map(|c| c.as_str().to_string()))
                        .collect(),
                };
                let handler = spec.handler.clone();
                self.invoke(ctx.clone(), handler(ctx, m)).await;
                return;
            }
        }

        // 3. Command-token resolution.
        if message.is_command() {
            let first_word = text.split_whitespace().next().unwrap_or_default();
            if let Some(spec) = self.inner.commands.resolve(first_word) {
                let allowed = self.with_store(|store| {
                    is_allowed(&spec.access, ctx.user_id, ctx.chat_id, ctx.chat_kind, store)
                });
                if !allowed {
                    info!(
                        command = %spec.token,
                        from = %message.from_name(),
                        "Command denied by access tags"
                    );
                    return;
                }
                let handler = spec.handler.clone();
                let event = Event::new(message);
                self.invoke(ctx.clone(), handler(ctx, event)).await;
                return;
            }
        }

        // 4. Nothing claimed the message.
        if let Some(hook) = &self.inner.unhandled {
            let hook = hook.clone();
            self.invoke(ctx.clone(), hook(ctx, message)).await;
        }
    }

    async fn dispatch_callback(&self, query: crate::update::CallbackQuery) {
        let chat_id = query.chat_id.unwrap_or(query.from.id);
        let Some(message_id) = query.message_id else {
            debug!(callback_id = %query.id, "Callback without a source message");
            return;
        };
        let entry = {
            let inline = self.inner.inline.lock();
            inline.lookup(chat_id, message_id)
        };
        let Some(entry) = entry else {
            debug!(chat_id, message_id, "No inline keyboard registered for callback");
            return;
        };
        if let Some(owner) = entry.owner {
            if owner != query.from.id {
                debug!(
                    chat_id,
                    message_id,
                    from = query.from.id,
                    "Callback from non-owner ignored"
                );
                return;
            }
        }
        let acked = Arc::new(AtomicBool::new(false));
        let ctx = Ctx {
            bot: self.clone(),
            chat_id,
            chat_kind: crate::update::ChatKind::Private,
            user_id: Some(query.from.id),
            message_id,
            language: query.from.language_code.clone(),
            callback_acked: Some(acked.clone()),
        };
        let callback_id = query.id.clone();
        if let Some(handler) = super::resolve_inline_handler(self, &entry.callback) {
            let answer = InlineAnswer { query, entry };
            self.invoke(ctx.clone(), handler(ctx.clone(), answer)).await;
        }
        // Fallback acknowledgment when the handler did not answer the query.
        if !acked.load(Ordering::SeqCst) {
            if let Err(e) = ctx.answer_callback(&callback_id, None, false).await {
                warn!(error = %e, "Failed to acknowledge callback");
            }
        }
    }

    async fn dispatch_inline_query(&self, query: crate::update::InlineQuery) {
        let Some(hook) = &self.inner.inline_query_hook else {
            warn!(from = query.from.id, "Inline queries are not implemented");
            return;
        };
        let ctx = Ctx {
            bot: self.clone(),
            chat_id: query.from.id,
            chat_kind: crate::update::ChatKind::Private,
            user_id: Some(query.from.id),
            message_id: 0,
            language: query.from.language_code.clone(),
            callback_acked: None,
        };
        let hook = hook.clone();
        self.invoke(ctx.clone(), hook(ctx, query)).await;
    }

    fn handle_membership(&self, message: &IncomingMessage, change: MembershipChange) {
        let chat_id = message.chat_id;
        let result = match change {
            MembershipChange::NewMembers(members) => {
                let bot_id = self.with_store(|store| store.get_or("bot.id", 0i64));
                let bot_added = members.iter().any(|m| m.id == bot_id);
                self.with_store(|store| {
                    if bot_added {
                        // Whoever added the bot owns this chat.
                        if let Some(adder) = &message.from {
                            store.set(&format!("chat.{}.owner", chat_id), adder.id, false)?;
                            info!(
                                chat_id,
                                owner = adder.id,
                                "Added to chat, adder recorded as chat owner"
                            );
                        }
                    }
                    if let Some(title) = &message.chat_title {
                        store.set(&format!("chat.{}.info.title", chat_id), title, false)?;
                    }
                    store.save()
                })
            }
            MembershipChange::MemberLeft(member) => {
                info!(chat_id, user = member.id, "Member left chat");
                Ok(())
            }
            MembershipChange::NewTitle(title) => {
                self.with_store(|store| store.set(&format!("chat.{}.info.title", chat_id), &title, true))
            }
            MembershipChange::MigratedFrom(old_chat_id) => {
                // Carry the old group's settings over to the supergroup.
                self.with_store(|store| {
                    let old_key = format!("chat.{}", old_chat_id);
                    if let Some(old) = store.get(&old_key).cloned() {
                        store.set(&format!("chat.{}", chat_id), old, false)?;
                        store.delete(&old_key, false)?;
                    }
                    store.save()
                })
            }
        };
        if let Err(e) = result {
            error!(error = %e, chat_id, "Failed to persist membership change");
        }
    }

    /// Adopt the first human who ever talks to the bot as its owner, unless a
    /// legacy global-admin setting already names one.
    async fn adopt_owner(&self, ctx: &Ctx, message: &IncomingMessage) {
        if message.chat_kind.is_channel() || message.from.is_none() {
            return;
        }
        let already_owned = self.with_store(|store| store.get_or("config.owner", 0i64) != 0);
        if already_owned {
            return;
        }
        let legacy = self.with_store(|store| store.get_or("config.globalAdmin", 0i64));
        let (owner, adopted_sender) = if legacy != 0 {
            (legacy, false)
        } else {
            match ctx.user_id {
                Some(user_id) => (user_id, true),
                None => return,
            }
        };
        let persisted = self.with_store(|store| {
            store.set("config.owner", owner, false)?;
            if legacy != 0 {
                // The legacy key is one-shot; forget it once migrated.
                store.delete("config.globalAdmin", false)?;
            }
            store.save()
        });
        if let Err(e) = persisted {
            error!(error = %e, "Failed to persist owner");
            return;
        }
        warn!(owner, "Bot owner adopted");
        if adopted_sender {
            let greeting = ctx.t("owner-greeting");
            if let Err(e) = ctx.reply(greeting).await {
                warn!(error = %e, "Failed to greet new owner");
            }
        }
    }

    /// Protection rules deciding whether a message is dispatched at all.
    pub fn is_message_allowed(&self, message: &IncomingMessage) -> bool {
        let Some(user_id) = message.sender_id() else {
            return false;
        };
        self.with_store(|store| {
            let white_groups = store.get_or("config.whiteGroups", Vec::<i64>::new());
            if white_groups.contains(&message.chat_id) {
                return true;
            }
            if is_global_admin(store, message.chat_id, message.chat_kind, user_id) {
                return true;
            }
            if !message.chat_kind.is_private()
                && is_admin(store, message.chat_id, message.chat_kind, user_id)
            {
                return true;
            }
            if store.get_or("config.admins", Vec::<i64>::new()).contains(&user_id) {
                return true;
            }
            store.get_or("config.trust", Vec::<i64>::new()).contains(&user_id)
        })
    }

    fn message_ctx(&self, message: &IncomingMessage) -> Ctx {
        Ctx {
            bot: self.clone(),
            chat_id: message.chat_id,
            chat_kind: message.chat_kind,
            user_id: message.sender_id(),
            message_id: message.message_id,
            language: message
                .from
                .as_ref()
                .and_then(|sender| sender.language_code.clone()),
            callback_acked: None,
        }
    }

    /// Handler invocation boundary: a failed handler is logged and reported
    /// to the chat, never propagated.
    async fn invoke(&self, ctx: Ctx, future: HandlerFuture) {
        if let Err(e) = future.await {
            error!(chat_id = ctx.chat_id, error = %e, "Handler failed");
            let text = ctx.t_args("error-running-command", &[("error", &e.to_string())]);
            if let Err(send_err) = ctx.reply(text).await {
                warn!(error = %send_err, "Failed to report handler error to chat");
            }
        }
    }
}
