//! Stock administration commands: trust management, chat admins, the chat
//! allowlist and the command list.

use crate::commands::CommandAccess;
use crate::event::Event;
use anyhow::anyhow;
use tracing::info;

use super::{BotBuilder, Ctx};

pub(super) fn register(builder: BotBuilder) -> BotBuilder {
    builder
        .command("list", "show available commands", CommandAccess::open(), list)
        .alias("start", "list")
        .command(
            "trust",
            "add a user to the trusted list",
            CommandAccess::global_admin(),
            trust,
        )
        .command(
            "untrust",
            "remove a user from the trusted list",
            CommandAccess::global_admin(),
            untrust,
        )
        .command(
            "admin",
            "make a user an admin of this chat",
            CommandAccess::global_admin(),
            admin,
        )
        .command(
            "allow_chat",
            "add a chat to the allowed list",
            CommandAccess::global_admin().hidden(),
            allow_chat,
        )
}

fn parse_user_id(event: &Event) -> Option<i64> {
    event.param(0).and_then(|raw| raw.parse::<i64>().ok())
}

async fn trust(ctx: Ctx, event: Event) -> anyhow::Result<()> {
    let Some(user_id) = parse_user_id(&event) else {
        ctx.reply(ctx.t("provide-user-id")).await?;
        return Ok(());
    };
    ctx.bot.with_store(|store| {
        let mut trusted = store.get_or("config.trust", Vec::<i64>::new());
        if !trusted.contains(&user_id) {
            trusted.push(user_id);
            store.set("config.trust", &trusted, true)?;
        }
        Ok::<_, crate::errors::AppError>(())
    })?;
    info!(user_id, "User trusted");
    ctx.reply(ctx.t_args("user-trusted", &[("user", &user_id.to_string())]))
        .await
}

async fn untrust(ctx: Ctx, event: Event) -> anyhow::Result<()> {
    let Some(user_id) = parse_user_id(&event) else {
        ctx.reply(ctx.t("provide-user-id")).await?;
        return Ok(());
    };
    let removed = ctx.bot.with_store(|store| {
        let mut trusted = store.get_or("config.trust", Vec::<i64>::new());
        let before = trusted.len();
        trusted.retain(|id| *id != user_id);
        if trusted.len() != before {
            store.set("config.trust", &trusted, true)?;
            Ok::<_, crate::errors::AppError>(true)
        } else {
            Ok(false)
        }
    })?;
    let key = if removed { "user-untrusted" } else { "user-not-in-trust" };
    ctx.reply(ctx.t_args(key, &[("user", &user_id.to_string())]))
        .await
}

async fn admin(ctx: Ctx, event: Event) -> anyhow::Result<()> {
    let Some(user_id) = parse_user_id(&event) else {
        ctx.reply(ctx.t("provide-user-id")).await?;
        return Ok(());
    };
    let name = ctx.bot.with_store(|store| {
        let key = format!("chat.{}.admins", ctx.chat_id);
        let mut admins = store.get_or(&key, Vec::<i64>::new());
        if !admins.contains(&user_id) {
            admins.push(user_id);
            store.set(&key, &admins, true)?;
        }
        let name = store.get_or(&format!("user.{}.name", user_id), String::new());
        Ok::<_, crate::errors::AppError>(name)
    })?;
    let name = if name.is_empty() { ctx.t("user-unknown") } else { name };
    info!(chat_id = ctx.chat_id, user_id, "Chat admin added");
    ctx.reply(ctx.t_args("user-now-admin", &[("user", &name)]))
        .await
}

async fn allow_chat(ctx: Ctx, event: Event) -> anyhow::Result<()> {
    let chat_id = match event.param(0) {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| anyhow!("chat id must be numeric"))?,
        None => ctx.chat_id,
    };
    ctx.bot.with_store(|store| {
        let mut allowed = store.get_or("config.whiteGroups", Vec::<i64>::new());
        if !allowed.contains(&chat_id) {
            allowed.push(chat_id);
            store.set("config.whiteGroups", &allowed, true)?;
        }
        Ok::<_, crate::errors::AppError>(())
    })?;
    info!(chat_id, "Chat allowed");
    ctx.reply(ctx.t_args("chat-allowed", &[("chat", &chat_id.to_string())]))
        .await
}

async fn list(ctx: Ctx, _event: Event) -> anyhow::Result<()> {
    let lines = ctx.bot.with_store(|store| {
        ctx.bot
            .inner
            .commands
            .list_available(store, ctx.chat_id, ctx.chat_kind, ctx.user_id)
            .iter()
            .map(|spec| format!("/{} - {}", spec.token, spec.description))
            .collect::<Vec<_>>()
    });
    let mut text = ctx.t("available-commands");
    for line in lines {
        text.push('\n');
        text.push_str(&line);
    }
    ctx.reply(text).await
}
