//! # Application Error Types
//!
//! This module defines common error types used throughout the replybot framework.
//! It provides structured error handling for the dispatch, persistence and
//! transport layers.

use std::fmt;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors
    Config(String),
    /// Durable store read/write errors
    Persistence(String),
    /// Messaging transport errors
    Transport(String),
    /// Command/handler registration errors
    Registration(String),
    /// Localization resource errors
    Localization(String),
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Persistence(msg) => write!(f, "[PERSISTENCE] {}", msg),
            AppError::Transport(msg) => write!(f, "[TRANSPORT] {}", msg),
            AppError::Registration(msg) => write!(f, "[REGISTRATION] {}", msg),
            AppError::Localization(msg) => write!(f, "[LOCALIZATION] {}", msg),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<crate::transport::TransportError> for AppError {
    fn from(err: crate::transport::TransportError) -> Self {
        AppError::Transport(err.to_string())
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
