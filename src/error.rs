//! Crate-wide error type.
//!
//! Domain errors carry a stable code (see [`BotError::code`]) so callers can
//! branch on semantics without matching variants across module boundaries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BotError>;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("gift not found")]
    GiftNotFound,

    #[error("gift type {0} not found")]
    GiftTypeNotFound(i64),

    #[error("gift out of stock")]
    GiftOutOfStock,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("auth failed: {0}")]
    Auth(String),

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("purchase rejected: {0}")]
    PurchaseRejected(String),

    #[error("payment verification required: {0}")]
    VerificationNeeded(String),

    #[error("scanner is already running")]
    AlreadyRunning,

    #[error("deals channel closed")]
    ChannelClosed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Stable domain code that survives propagation across components.
    pub fn code(&self) -> &'static str {
        match self {
            BotError::GiftNotFound | BotError::GiftTypeNotFound(_) => "gift_not_found",
            BotError::GiftOutOfStock => "gift_out_of_stock",
            BotError::Forbidden(_) => "forbidden",
            _ => "internal",
        }
    }
}
