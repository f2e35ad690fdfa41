//! Handler references and stored-callback types.
//!
//! Every handler is addressable either by a stable name (resolved against a
//! registration table built at startup) or directly as a closure. Named
//! references survive a restart; direct closures are a polling-mode
//! convenience and are dropped from persisted state.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

use crate::bot::Ctx;
use crate::event::{Answer, Event, InlineAnswer, PatternMatch};

/// Handler outcome; errors are caught at the dispatch boundary.
pub type HandlerResult = anyhow::Result<()>;

/// Boxed future returned by stored handlers.
pub type HandlerFuture = BoxFuture<'static, HandlerResult>;

/// Command handler: receives the parsed command event.
pub type CommandFn = Arc<dyn Fn(Ctx, Event) -> HandlerFuture + Send + Sync>;

/// Pattern handler: receives the regex captures for the matched text.
pub type PatternFn = Arc<dyn Fn(Ctx, PatternMatch) -> HandlerFuture + Send + Sync>;

/// Reply handler: receives the correlated answer to a pending question.
pub type ReplyFn = Arc<dyn Fn(Ctx, Answer) -> HandlerFuture + Send + Sync>;

/// Inline-callback handler: receives the raw button-press payload.
pub type InlineFn = Arc<dyn Fn(Ctx, InlineAnswer) -> HandlerFuture + Send + Sync>;

/// Reference to a handler: either a registered name or a direct closure.
pub enum CallbackRef<F> {
    /// Stable identifier resolved against a registration table; survives
    /// persistence round-trips.
    Named(String),
    /// Closure invoked as-is; not persistable.
    Direct(F),
}

impl<F> CallbackRef<F> {
    pub fn named(name: impl Into<String>) -> Self {
        CallbackRef::Named(name.into())
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            CallbackRef::Named(name) => Some(name),
            CallbackRef::Direct(_) => None,
        }
    }
}

impl<F: Clone> Clone for CallbackRef<F> {
    fn clone(&self) -> Self {
        match self {
            CallbackRef::Named(name) => CallbackRef::Named(name.clone()),
            CallbackRef::Direct(f) => CallbackRef::Direct(f.clone()),
        }
    }
}

impl<F> fmt::Debug for CallbackRef<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackRef::Named(name) => write!(f, "Named({:?})", name),
            CallbackRef::Direct(_) => write!(f, "Direct(<closure>)"),
        }
    }
}

impl<F> PartialEq for CallbackRef<F> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CallbackRef::Named(a), CallbackRef::Named(b)) => a == b,
            _ => false,
        }
    }
}

/// Serde support for `Option<CallbackRef<F>>` fields: named references
/// persist as their string, direct closures persist as null and come back as
/// `None` (lossy on purpose).
pub mod callback_serde {
    use super::CallbackRef;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S, F>(
        callback: &Option<CallbackRef<F>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match callback {
            Some(CallbackRef::Named(name)) => serializer.serialize_some(name),
            _ => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D, F>(deserializer: D) -> Result<Option<CallbackRef<F>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name: Option<String> = Option::deserialize(deserializer)?;
        Ok(name.map(CallbackRef::Named))
    }
}
