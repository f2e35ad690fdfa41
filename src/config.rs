//! # Bot Configuration
//!
//! This module provides the runtime configuration for the bot: credentials,
//! polling cadence, persistence location and dispatch toggles. It supports
//! loading from environment variables and validation before startup.

use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;

/// Bot runtime configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    /// Telegram bot token
    pub token: String,
    /// Path of the durable JSON store
    pub data_file: String,
    /// Minimum seconds between polling iterations
    pub step_delay_secs: u64,
    /// Backoff after a failed polling iteration, in seconds
    pub retry_delay_secs: u64,
    /// Consecutive polling failures tolerated before shutting down
    pub max_consecutive_errors: u32,
    /// Default locale for user-facing messages
    pub locale: String,
    /// When true, only messages passing the allow rules are dispatched
    pub protect: bool,
    /// When true, channel posts are ignored entirely
    pub skip_channel_messages: bool,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            data_file: "data.json".to_string(),
            step_delay_secs: 3,
            retry_delay_secs: 5,
            max_consecutive_errors: 10,
            locale: "en".to_string(),
            protect: false,
            skip_channel_messages: false,
        }
    }
}

impl BotConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        let mut config = Self::default();

        config.token = env::var("TELEGRAM_BOT_TOKEN").map_err(|_| {
            AppError::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        if let Ok(data_file) = env::var("BOT_DATA_FILE") {
            config.data_file = data_file;
        }
        config.step_delay_secs = env::var("BOT_STEP_DELAY_SECS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                AppError::Config("BOT_STEP_DELAY_SECS must be a valid number".to_string())
            })?;
        config.retry_delay_secs = env::var("BOT_RETRY_DELAY_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .map_err(|_| {
                AppError::Config("BOT_RETRY_DELAY_SECS must be a valid number".to_string())
            })?;
        config.max_consecutive_errors = env::var("BOT_MAX_CONSECUTIVE_ERRORS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .map_err(|_| {
                AppError::Config("BOT_MAX_CONSECUTIVE_ERRORS must be a valid number".to_string())
            })?;
        if let Ok(locale) = env::var("BOT_LOCALE") {
            config.locale = locale;
        }
        config.protect = env::var("BOT_PROTECT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config.skip_channel_messages = env::var("BOT_SKIP_CHANNEL_MESSAGES")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        config.validate()?;
        Ok(config)
    }

    /// Validate bot configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.token.trim().is_empty() {
            return Err(AppError::Config("Bot token cannot be empty".to_string()));
        }

        // Basic bot token format validation
        let parts: Vec<&str> = self.token.split(':').collect();
        if parts.len() != 2 {
            return Err(AppError::Config(
                "Bot token format is invalid. Expected format: 'bot_id:bot_token'".to_string(),
            ));
        }

        // Validate bot ID is numeric
        if parts[0].parse::<u64>().is_err() {
            return Err(AppError::Config(
                "Bot token bot ID must be numeric".to_string(),
            ));
        }

        // Validate bot token length
        if parts[1].len() < 20 {
            return Err(AppError::Config(
                "Bot token appears to be too short. Please verify it's a valid token".to_string(),
            ));
        }

        if self.data_file.trim().is_empty() {
            return Err(AppError::Config("Data file path cannot be empty".to_string()));
        }

        if self.max_consecutive_errors == 0 {
            return Err(AppError::Config(
                "Max consecutive errors cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}
