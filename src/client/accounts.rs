//! Upstream account credentials.

use serde::Deserialize;

use crate::error::{BotError, Result};

/// One upstream account. The password covers two-step verification; the
/// login code exchange is the gateway's concern.
#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub phone: String,
    #[serde(default)]
    pub password: String,
}

/// Load the account list from a JSON file: `[{"phone": "...", "password": "..."}]`.
pub fn load_accounts(path: &str) -> Result<Vec<Account>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| BotError::Config(format!("read accounts file {path}: {err}")))?;
    let accounts: Vec<Account> = serde_json::from_str(&raw)?;
    if accounts.is_empty() {
        return Err(BotError::Config(format!("no accounts in {path}")));
    }
    Ok(accounts)
}
