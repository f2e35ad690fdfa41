//! Inline-Callback Registry: button-press routing.
//!
//! Each message sent with an inline keyboard registers an entry keyed by chat
//! and message id. A later callback query is routed back to that entry's
//! handler. Unlike pending questions, inline entries are multi-shot: a lookup
//! never removes them, so a keyboard stays live until explicitly removed or
//! aged out on restore.

use crate::errors::AppResult;
use crate::handler::{callback_serde, CallbackRef, InlineFn};
use crate::replies::RETENTION_SECS;
use crate::store::DataStore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// One live inline keyboard, addressed by the message that carries it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineCallbackEntry {
    /// Message id of the keyboard-carrying message.
    pub id: i64,
    /// Unix seconds the keyboard was posted; drives the retention window.
    pub time: i64,
    #[serde(with = "callback_serde", default)]
    pub callback: Option<CallbackRef<InlineFn>>,
    /// When set, only this user's presses are dispatched.
    #[serde(default)]
    pub owner: Option<i64>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

/// Durable chat → message id → entry mapping for inline keyboards.
#[derive(Debug, Default, Clone)]
pub struct InlineRegistry {
    targets: BTreeMap<i64, BTreeMap<i64, InlineCallbackEntry>>,
}

impl InlineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chat_id: i64, entry: InlineCallbackEntry) {
        debug!(chat_id, message_id = entry.id, "Registered inline keyboard");
        self.targets.entry(chat_id).or_default().insert(entry.id, entry);
    }

    /// Find the entry for a pressed button. Entries are not consumed; a
    /// keyboard can be pressed any number of times.
    pub fn lookup(&self, chat_id: i64, message_id: i64) -> Option<InlineCallbackEntry> {
        self.targets.get(&chat_id)?.get(&message_id).cloned()
    }

    pub fn remove(&mut self, chat_id: i64, message_id: i64) {
        if let Some(entries) = self.targets.get_mut(&chat_id) {
            entries.remove(&message_id);
            if entries.is_empty() {
                self.targets.remove(&chat_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.targets.values().map(|entries| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn persist(&self, store: &mut DataStore) -> AppResult<()> {
        store.set("replies.inline", &self.targets, true)
    }

    /// Rebuild from the store, pruning entries past the retention window.
    pub fn restore(store: &mut DataStore) -> AppResult<Self> {
        let mut targets: BTreeMap<i64, BTreeMap<i64, InlineCallbackEntry>> =
            store.get_or("replies.inline", BTreeMap::new());
        let cutoff = chrono::Utc::now().timestamp() - RETENTION_SECS;
        let mut pruned = 0usize;
        for entries in targets.values_mut() {
            let before = entries.len();
            entries.retain(|_, entry| entry.time >= cutoff);
            pruned += before - entries.len();
        }
        targets.retain(|_, entries| !entries.is_empty());
        let registry = Self { targets };
        if pruned > 0 {
            info!(pruned, "Pruned expired inline keyboards during restore");
            registry.persist(store)?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64, time: i64) -> InlineCallbackEntry {
        InlineCallbackEntry {
            id,
            time,
            callback: Some(CallbackRef::named("on_press")),
            owner: Some(42),
            extra: Map::new(),
        }
    }

    #[test]
    fn lookup_does_not_consume() {
        let mut registry = InlineRegistry::new();
        registry.register(7, entry(10, chrono::Utc::now().timestamp()));
        assert!(registry.lookup(7, 10).is_some());
        assert!(registry.lookup(7, 10).is_some());
        assert!(registry.lookup(7, 11).is_none());
        assert!(registry.lookup(8, 10).is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let mut registry = InlineRegistry::new();
        registry.register(7, entry(10, chrono::Utc::now().timestamp()));
        registry.remove(7, 10);
        assert!(registry.lookup(7, 10).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn persistence_round_trip() {
        let mut store = DataStore::in_memory();
        let mut registry = InlineRegistry::new();
        registry.register(7, entry(10, chrono::Utc::now().timestamp()));
        registry.persist(&mut store).unwrap();

        let restored = InlineRegistry::restore(&mut store).unwrap();
        let e = restored.lookup(7, 10).unwrap();
        assert_eq!(e.owner, Some(42));
        assert_eq!(e.callback, Some(CallbackRef::named("on_press")));
    }

    #[test]
    fn restore_prunes_expired_entries() {
        let mut store = DataStore::in_memory();
        let mut registry = InlineRegistry::new();
        let now = chrono::Utc::now().timestamp();
        registry.register(7, entry(10, now - RETENTION_SECS - 3600));
        registry.register(7, entry(20, now));
        registry.persist(&mut store).unwrap();

        let restored = InlineRegistry::restore(&mut store).unwrap();
        assert!(restored.lookup(7, 10).is_none());
        assert!(restored.lookup(7, 20).is_some());
        assert_eq!(restored.len(), 1);
    }
}
