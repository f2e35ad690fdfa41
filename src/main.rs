use anyhow::Result;
use replybot::bot::{Ask, Bot};
use replybot::commands::CommandAccess;
use replybot::config::BotConfig;
use replybot::handler::CallbackRef;
use replybot::store::DataStore;
use replybot::transport::telegram::TelegramTransport;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file first
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BotConfig::from_env()?;
    info!(data_file = %config.data_file, "Configuration loaded");

    // HTTP client with an explicit timeout for better reliability
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let transport = Arc::new(TelegramTransport::with_client(config.token.clone(), client));
    let store = DataStore::load(&config.data_file)?;

    let bot = Bot::builder(config)
        .transport(transport)
        .store(store)
        .with_builtin_commands()
        .command("ping", "check that the bot is alive", CommandAccess::open(), {
            |ctx, _event| async move { ctx.reply("pong").await }
        })
        .command(
            "feedback",
            "leave feedback for the bot owner",
            CommandAccess::open(),
            |ctx, _event| async move {
                ctx.ask(
                    Ask::new("What would you like to tell us?")
                        .on_reply(CallbackRef::named("feedback_received")),
                )
                .await?;
                Ok(())
            },
        )
        .reply_handler("feedback_received", |ctx, answer| async move {
            info!(
                chat_id = ctx.chat_id,
                feedback = answer.reply_text(),
                "Feedback received"
            );
            ctx.reply("Thanks, noted!").await
        })
        .build()?;

    // Stop cleanly on Ctrl-C
    let handle = bot.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            handle.stop();
        }
    });

    bot.run_polling().await?;
    Ok(())
}
