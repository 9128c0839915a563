//! Configuration loaded from the environment, plus an optional `.env` file.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{BotError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub postgres: PostgresConfig,
    pub bot: BotConfig,
}

/// Upstream access: API credentials, gateway endpoint and the per-account
/// rate ceiling the scanner divides across the pool.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub rate_per_client_ms: u64,
    pub gateway_url: String,
    pub accounts_path: String,
    pub sessions_dir: String,
}

impl TelegramConfig {
    pub fn rate_per_client(&self) -> Duration {
        Duration::from_millis(self.rate_per_client_ms)
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub dsn: String,
    pub max_idle_conns: u32,
    pub max_open_conns: u32,
    pub conn_max_lifetime: Duration,
}

/// Operator bot: notifications go to and commands come from `admin_id`.
#[derive(Debug, Clone)]
pub struct BotConfig {
    pub token: String,
    pub admin_id: i64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            telegram: TelegramConfig {
                api_id: parse_required("TG_API_ID")?,
                api_hash: required("TG_API_HASH")?,
                rate_per_client_ms: parse_required("RATE_PER_CLIENT_MS")?,
                gateway_url: required("TG_GATEWAY_URL")?,
                accounts_path: optional("ACCOUNTS_PATH").unwrap_or_else(|| "accounts.json".to_string()),
                sessions_dir: optional("SESSIONS_DIR").unwrap_or_else(|| "storage/sessions".to_string()),
            },
            postgres: PostgresConfig {
                dsn: required("PG_DSN")?,
                max_idle_conns: parse_or("PG_MAX_IDLE_CONNS", 5)?,
                max_open_conns: parse_or("PG_MAX_OPEN_CONNS", 5)?,
                conn_max_lifetime: duration_or("PG_CONN_MAX_LIFETIME", Duration::from_secs(300))?,
            },
            bot: BotConfig {
                token: required("BOT_TOKEN")?,
                admin_id: parse_required("BOT_ADMIN_ID")?,
            },
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| BotError::Config(format!("{key} is not set")))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_required<T: FromStr>(key: &str) -> Result<T> {
    required(key)?
        .parse()
        .map_err(|_| BotError::Config(format!("{key} has an invalid value")))
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| BotError::Config(format!("{key} has an invalid value"))),
        None => Ok(default),
    }
}

fn duration_or(key: &str, default: Duration) -> Result<Duration> {
    match optional(key) {
        Some(raw) => parse_duration(&raw)
            .ok_or_else(|| BotError::Config(format!("{key} has an invalid duration"))),
        None => Ok(default),
    }
}

/// Parse `"300"`, `"300s"`, `"5m"` or `"1h"` into a duration. Bare numbers
/// are seconds.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (value, multiplier) = match raw.as_bytes().last()? {
        b's' => (&raw[..raw.len() - 1], 1),
        b'm' => (&raw[..raw.len() - 1], 60),
        b'h' => (&raw[..raw.len() - 1], 3600),
        _ => (raw, 1),
    };
    let value: u64 = value.parse().ok()?;
    Some(Duration::from_secs(value * multiplier))
}
