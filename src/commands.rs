//! Command Resolver: registration table, token normalization and access tags.
//!
//! Commands are registered explicitly at startup into a lookup table; no
//! runtime discovery. A token is resolved by stripping the leading slash,
//! cutting any `@botname` suffix, then checking the alias table before the
//! primary index. Access tags are evaluated against the durable store so a
//! promotion takes effect on the next message without a restart.

use crate::errors::{AppError, AppResult};
use crate::handler::{CommandFn, PatternFn};
use crate::store::DataStore;
use crate::update::{ChatKind, COMMAND_MARKER};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    /// Names that collide with framework internals and can never be commands.
    static ref RESERVED_TOKENS: Vec<&'static str> = vec![
        "new",
        "register",
        "dispatch",
        "handle_update",
        "run",
        "stop",
        "cron",
        "webhook",
    ];
}

/// Who may invoke a command, as a set of restriction tags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandAccess {
    pub global_admin: bool,
    pub admin: bool,
    pub private_only: bool,
    pub hidden: bool,
}

impl CommandAccess {
    /// No restrictions: anyone, anywhere.
    pub fn open() -> Self {
        Self::default()
    }

    /// Chat admins and up.
    pub fn admin() -> Self {
        Self { admin: true, ..Self::default() }
    }

    /// Bot owner and chat owners only.
    pub fn global_admin() -> Self {
        Self { global_admin: true, ..Self::default() }
    }

    pub fn private_only(mut self) -> Self {
        self.private_only = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// One registered command.
#[derive(Clone)]
pub struct CommandSpec {
    pub token: String,
    pub access: CommandAccess,
    pub description: String,
    pub handler: CommandFn,
}

/// One registered free-text pattern, tried before token resolution.
#[derive(Clone)]
pub struct PatternSpec {
    pub pattern: Regex,
    pub name: String,
    pub access: CommandAccess,
    pub handler: PatternFn,
}

/// Startup-built lookup table for commands, aliases and patterns.
#[derive(Default)]
pub struct CommandRegistry {
    commands: Vec<CommandSpec>,
    index: HashMap<String, usize>,
    aliases: HashMap<String, String>,
    patterns: Vec<PatternSpec>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command under its snake_case token. Reserved and duplicate
    /// tokens are registration errors, surfaced at startup rather than
    /// silently shadowing.
    pub fn register(&mut self, spec: CommandSpec) -> AppResult<()> {
        let token = spec.token.clone();
        if RESERVED_TOKENS.contains(&token.as_str()) {
            return Err(AppError::Registration(format!(
                "'{}' is a reserved token",
                token
            )));
        }
        if self.index.contains_key(&token) {
            return Err(AppError::Registration(format!(
                "command '{}' is already registered",
                token
            )));
        }
        self.index.insert(token, self.commands.len());
        self.commands.push(spec);
        Ok(())
    }

    /// Register an alternate spelling for an existing token.
    pub fn alias(&mut self, alias: impl Into<String>, target: impl Into<String>) -> AppResult<()> {
        let alias = alias.into();
        let target = target.into();
        if !self.index.contains_key(&target) {
            return Err(AppError::Registration(format!(
                "alias '{}' targets unknown command '{}'",
                alias, target
            )));
        }
        self.aliases.insert(alias, target);
        Ok(())
    }

    pub fn add_pattern(&mut self, spec: PatternSpec) {
        self.patterns.push(spec);
    }

    pub fn patterns(&self) -> &[PatternSpec] {
        &self.patterns
    }

    /// Normalize a raw first word ("/trust@mybot") and look it up. Alias
    /// resolution happens before the primary index.
    pub fn resolve(&self, raw: &str) -> Option<&CommandSpec> {
        let token = raw.trim_start_matches(COMMAND_MARKER);
        let token = token.split('@').next().unwrap_or(token);
        let token = match self.aliases.get(token) {
            Some(target) => target.as_str(),
            None => token,
        };
        self.index.get(token).map(|i| &self.commands[*i])
    }

    /// Commands visible to a caller, in declaration order.
    pub fn list_available(
        &self,
        store: &DataStore,
        chat_id: i64,
        chat_kind: ChatKind,
        caller: Option<i64>,
    ) -> Vec<&CommandSpec> {
        self.commands
            .iter()
            .filter(|spec| !spec.access.hidden)
            .filter(|spec| is_allowed(&spec.access, caller, chat_id, chat_kind, store))
            .collect()
    }
}

/// Bot owner, or owner of this specific non-private chat.
pub fn is_global_admin(store: &DataStore, chat_id: i64, chat_kind: ChatKind, user_id: i64) -> bool {
    if store.get_or("config.owner", 0i64) == user_id {
        return true;
    }
    if !chat_kind.is_private() {
        let key = format!("chat.{}.owner", chat_id);
        if store.get_or(&key, 0i64) == user_id {
            return true;
        }
    }
    false
}

/// Global admins, configured admins, and this chat's admin list.
pub fn is_admin(store: &DataStore, chat_id: i64, chat_kind: ChatKind, user_id: i64) -> bool {
    if is_global_admin(store, chat_id, chat_kind, user_id) {
        return true;
    }
    if store.get_or("config.admins", Vec::<i64>::new()).contains(&user_id) {
        return true;
    }
    let key = format!("chat.{}.admins", chat_id);
    store.get_or(&key, Vec::<i64>::new()).contains(&user_id)
}

/// Evaluate access tags for a caller. Anonymous callers are always denied,
/// before any tag is considered.
pub fn is_allowed(
    access: &CommandAccess,
    caller: Option<i64>,
    chat_id: i64,
    chat_kind: ChatKind,
    store: &DataStore,
) -> bool {
    let Some(user_id) = caller else {
        return false;
    };
    if access.global_admin && !is_global_admin(store, chat_id, chat_kind, user_id) {
        return false;
    }
    if access.admin && !is_admin(store, chat_id, chat_kind, user_id) {
        return false;
    }
    if access.private_only && !chat_kind.is_private() {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn spec(token: &str, access: CommandAccess) -> CommandSpec {
        CommandSpec {
            token: token.to_string(),
            access,
            description: format!("{} command", token),
            handler: Arc::new(|_, _| Box::pin(async { Ok(()) })),
        }
    }

    #[test]
    fn resolve_strips_marker_and_mention() {
        let mut registry = CommandRegistry::new();
        registry.register(spec("trust", CommandAccess::global_admin())).unwrap();
        assert!(registry.resolve("/trust").is_some());
        assert!(registry.resolve("/trust@mybot").is_some());
        assert!(registry.resolve("trust").is_some());
        assert!(registry.resolve("/unknown").is_none());
    }

    #[test]
    fn alias_resolves_before_index() {
        let mut registry = CommandRegistry::new();
        registry.register(spec("list", CommandAccess::open())).unwrap();
        registry.alias("start", "list").unwrap();
        let resolved = registry.resolve("/start").unwrap();
        assert_eq!(resolved.token, "list");
        assert!(registry.alias("x", "missing").is_err());
    }

    #[test]
    fn reserved_and_duplicate_tokens_rejected() {
        let mut registry = CommandRegistry::new();
        assert!(registry.register(spec("cron", CommandAccess::open())).is_err());
        registry.register(spec("ping", CommandAccess::open())).unwrap();
        assert!(registry.register(spec("ping", CommandAccess::open())).is_err());
    }

    #[test]
    fn admin_tag_accepts_chat_scoped_admin() {
        let mut store = DataStore::in_memory();
        store.set("config.owner", 1i64, false).unwrap();
        store.set("chat.100.admins", vec![5i64], false).unwrap();

        let access = CommandAccess::admin();
        // Owner passes everywhere
        assert!(is_allowed(&access, Some(1), 100, ChatKind::Group, &store));
        // Chat admin passes in their chat only
        assert!(is_allowed(&access, Some(5), 100, ChatKind::Group, &store));
        assert!(!is_allowed(&access, Some(5), 200, ChatKind::Group, &store));
        // Stranger and anonymous callers are denied
        assert!(!is_allowed(&access, Some(9), 100, ChatKind::Group, &store));
        assert!(!is_allowed(&access, None, 100, ChatKind::Group, &store));
    }

    #[test]
    fn global_admin_tag_accepts_chat_owner() {
        let mut store = DataStore::in_memory();
        store.set("config.owner", 1i64, false).unwrap();
        store.set("chat.100.owner", 7i64, false).unwrap();

        let access = CommandAccess::global_admin();
        assert!(is_allowed(&access, Some(7), 100, ChatKind::Group, &store));
        assert!(!is_allowed(&access, Some(7), 200, ChatKind::Group, &store));
        // Chat-owner status never applies in private chats
        assert!(!is_allowed(&access, Some(7), 100, ChatKind::Private, &store));
        assert!(is_allowed(&access, Some(1), 100, ChatKind::Private, &store));
    }

    #[test]
    fn anonymous_caller_is_denied_even_for_open_commands() {
        let store = DataStore::in_memory();
        assert!(!is_allowed(&CommandAccess::open(), None, 7, ChatKind::Group, &store));
        assert!(!is_allowed(
            &CommandAccess::open().private_only(),
            None,
            7,
            ChatKind::Private,
            &store
        ));
        assert!(is_allowed(&CommandAccess::open(), Some(9), 7, ChatKind::Group, &store));
    }

    #[test]
    fn private_only_blocks_groups() {
        let store = DataStore::in_memory();
        let access = CommandAccess::open().private_only();
        assert!(is_allowed(&access, Some(9), 7, ChatKind::Private, &store));
        assert!(!is_allowed(&access, Some(9), 7, ChatKind::Group, &store));
    }

    #[test]
    fn list_available_keeps_order_and_filters() {
        let mut store = DataStore::in_memory();
        store.set("config.owner", 1i64, false).unwrap();
        let mut registry = CommandRegistry::new();
        registry.register(spec("list", CommandAccess::open())).unwrap();
        registry.register(spec("trust", CommandAccess::global_admin())).unwrap();
        registry
            .register(spec("debug", CommandAccess::open().hidden()))
            .unwrap();

        let visible = registry.list_available(&store, 7, ChatKind::Private, Some(9));
        let tokens: Vec<&str> = visible.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, ["list"]);

        let visible = registry.list_available(&store, 7, ChatKind::Private, Some(1));
        let tokens: Vec<&str> = visible.iter().map(|s| s.token.as_str()).collect();
        assert_eq!(tokens, ["list", "trust"]);
    }
}
