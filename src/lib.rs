//! # Replybot
//!
//! A Telegram chat-bot framework built around durable conversations: a bot
//! asks a question, the answer may arrive days later (or after a restart),
//! and the framework correlates it back to the right handler. Commands,
//! free-text patterns and inline-keyboard callbacks share a single dispatch
//! pipeline that invokes exactly one handler per update.

pub mod bot;
pub mod commands;
pub mod config;
pub mod errors;
pub mod event;
pub mod handler;
pub mod inline;
pub mod localization;
pub mod replies;
pub mod store;
pub mod transport;
pub mod update;

// Re-export the types most handlers touch
pub use bot::{Ask, AskInline, Bot, BotBuilder, Ctx};
pub use commands::CommandAccess;
pub use errors::{AppError, AppResult};
pub use event::{Answer, AnswerVariant, Event, InlineAnswer, PatternMatch};
pub use handler::{CallbackRef, HandlerResult};
pub use replies::{AnswerOption, MatchReason, PendingQuestion};
