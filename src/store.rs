//! Durable keyed configuration store.
//!
//! A JSON document addressed by dotted paths ("chat.1234.admins"), persisted
//! to a single file. Every mutating operation optionally flushes to disk
//! right away; losing a pending question is worse than an extra write, so the
//! registries always pass `persist = true`.

use crate::errors::{AppError, AppResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Dotted-path JSON store backed by a file (or memory-only for tests).
#[derive(Debug, Clone)]
pub struct DataStore {
    data: Value,
    path: Option<PathBuf>,
}

impl DataStore {
    /// Load the store from a JSON file, starting empty when the file does not
    /// exist yet. An unreadable or malformed file is a hard error: silently
    /// dropping persisted questions would be worse than refusing to start.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                Value::Object(Map::new())
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| AppError::Persistence(format!("{}: {}", path.display(), e)))?
            }
        } else {
            Value::Object(Map::new())
        };
        Ok(Self { data, path: Some(path) })
    }

    /// Memory-only store, used in tests and throwaway tooling.
    pub fn in_memory() -> Self {
        Self {
            data: Value::Object(Map::new()),
            path: None,
        }
    }

    /// Raw value lookup by dotted path.
    pub fn get(&self, key: &str) -> Option<&Value> {
        let mut current = &self.data;
        for part in key.split('.') {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Typed lookup with a fallback; absent keys and shape mismatches both
    /// yield the default (malformed persisted state is tolerated).
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(value) => serde_json::from_value(value.clone()).unwrap_or(default),
            None => default,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a value at a dotted path, creating intermediate objects as needed.
    /// Non-object intermediates are overwritten.
    pub fn set<T: Serialize>(&mut self, key: &str, value: T, persist: bool) -> AppResult<()> {
        let value = serde_json::to_value(value)?;
        let mut current = &mut self.data;
        let parts: Vec<&str> = key.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            let map = current.as_object_mut().ok_or_else(|| {
                AppError::Persistence(format!("cannot descend into {}", key))
            })?;
            if i == parts.len() - 1 {
                map.insert((*part).to_string(), value);
                break;
            }
            current = map
                .entry((*part).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if persist {
            self.save()?;
        }
        Ok(())
    }

    /// Append a value to the list at a dotted path, creating it when absent.
    pub fn add<T: Serialize>(&mut self, key: &str, value: T, persist: bool) -> AppResult<()> {
        let value = serde_json::to_value(value)?;
        let mut list = match self.get(key) {
            Some(Value::Array(items)) => items.clone(),
            _ => Vec::new(),
        };
        list.push(value);
        self.set(key, Value::Array(list), persist)
    }

    /// Remove the value at a dotted path; missing keys are a no-op.
    pub fn delete(&mut self, key: &str, persist: bool) -> AppResult<()> {
        let parts: Vec<&str> = key.split('.').collect();
        let mut current = &mut self.data;
        for part in &parts[..parts.len() - 1] {
            match current.as_object_mut().and_then(|map| map.get_mut(*part)) {
                Some(next) => current = next,
                None => return Ok(()),
            }
        }
        if let Some(map) = current.as_object_mut() {
            map.remove(parts[parts.len() - 1]);
        }
        if persist {
            self.save()?;
        }
        Ok(())
    }

    /// Flush the whole document to disk. Writes to a sibling temp file first
    /// so a crash mid-write cannot truncate existing state.
    pub fn save(&self) -> AppResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let body = serde_json::to_string_pretty(&self.data)?;
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "Store flushed to disk");
        Ok(())
    }
}
