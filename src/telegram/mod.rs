//! Operator command surface over the chat Bot API.
//!
//! Long-polls `getUpdates`, accepts commands from the configured admin only,
//! and applies them to the scanner watchlist and the runtime settings. This
//! is the only mutation path for those at runtime.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::BotConfig;
use crate::error::Result;
use crate::scanner::MarketScanner;
use crate::valuator::{RuntimeSettings, Valuator};

const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_RETRY_PAUSE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Status,
    AutoBuy,
    SetBalance(Decimal),
    SetDiscount(f64),
    Catalog,
    StartScan,
    StopScan,
    AddScan(i64),
    RemoveScan(i64),
    ListScan,
    ClearScan,
    SetScan(Vec<i64>),
}

#[derive(Debug, PartialEq)]
enum ParseError {
    NotACommand,
    Unknown(String),
    BadArgument(&'static str),
}

#[derive(Debug, Deserialize)]
struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    from: Option<User>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    #[serde(default)]
    result: Vec<Update>,
}

pub struct CommandBot {
    http: reqwest::Client,
    bot_token: String,
    admin_id: i64,
    scanner: Arc<MarketScanner>,
    settings: Arc<RuntimeSettings>,
    valuator: Arc<Valuator>,
}

impl CommandBot {
    pub fn new(
        cfg: &BotConfig,
        scanner: Arc<MarketScanner>,
        settings: Arc<RuntimeSettings>,
        valuator: Arc<Valuator>,
    ) -> Result<Self> {
        // The client timeout must outlast the long-poll window.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            http,
            bot_token: cfg.token.clone(),
            admin_id: cfg.admin_id,
            scanner,
            settings,
            valuator,
        })
    }

    /// Long-poll for updates until shutdown.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!("command bot started");
        let mut offset = 0i64;
        loop {
            let updates = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("command bot stopped");
                    return;
                }
                polled = self.poll_updates(offset) => match polled {
                    Ok(updates) => updates,
                    Err(err) => {
                        tracing::error!(error = %err, "failed to poll updates");
                        tokio::select! {
                            _ = tokio::time::sleep(POLL_RETRY_PAUSE) => continue,
                            _ = shutdown.cancelled() => return,
                        }
                    }
                },
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else {
                    continue;
                };
                let Some(from) = message.from else { continue };
                if from.id != self.admin_id {
                    continue;
                }
                let Some(text) = message.text else { continue };
                self.handle(&text).await;
            }
        }
    }

    async fn poll_updates(&self, offset: i64) -> Result<Vec<Update>> {
        let url = format!("https://api.telegram.org/bot{}/getUpdates", self.bot_token);
        let resp: UpdatesResponse = self
            .http
            .get(&url)
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", POLL_TIMEOUT_SECS.to_string()),
            ])
            .send()
            .await?
            .json()
            .await?;
        Ok(resp.result)
    }

    async fn handle(&self, text: &str) {
        let command = match parse_command(text) {
            Ok(command) => command,
            Err(ParseError::NotACommand) => return,
            Err(ParseError::Unknown(cmd)) => {
                self.reply(&format!("Unknown command: /{cmd}")).await;
                return;
            }
            Err(ParseError::BadArgument(usage)) => {
                self.reply(usage).await;
                return;
            }
        };
        tracing::info!(?command, "operator command");

        match command {
            Command::Start => self.reply(HELP_TEXT).await,
            Command::Status => {
                let watchlist = self.scanner.gift_types();
                let text = format!(
                    "Scanner: {}\nWatchlist: {} type(s)\nBalance: {} TON\nAuto-buy: {}\nBuy on rare: {}\nMin discount: {:.1}%",
                    if self.scanner.is_running() { "running" } else { "idle" },
                    watchlist.len(),
                    self.settings.balance(),
                    on_off(self.settings.auto_buy_enabled()),
                    on_off(self.settings.buy_on_rare()),
                    self.settings.min_discount_percent(),
                );
                self.reply(&text).await;
            }
            Command::AutoBuy => {
                let enabled = self.settings.toggle_auto_buy();
                self.reply(if enabled {
                    "Auto-buy enabled"
                } else {
                    "Auto-buy disabled"
                })
                .await;
            }
            Command::SetBalance(balance) => {
                self.settings.set_balance(balance);
                self.reply(&format!("Balance set to {balance} TON")).await;
            }
            Command::SetDiscount(percent) => {
                self.settings.set_min_discount_percent(percent);
                self.reply(&format!("Min discount set to {percent:.1}%"))
                    .await;
            }
            Command::Catalog => match self.valuator.sync_catalog().await {
                Ok(result) => {
                    self.reply(&format!(
                        "Catalog sync: {} created, {} updated, {} errors",
                        result.created, result.updated, result.errors
                    ))
                    .await;
                }
                Err(err) => self.reply(&format!("Catalog sync failed: {err}")).await,
            },
            Command::StartScan => match self.scanner.clone().start() {
                Ok(()) => self.reply("Scanner started").await,
                Err(err) => self.reply(&format!("{err}")).await,
            },
            Command::StopScan => {
                self.scanner.stop().await;
                self.reply("Scanner stopped").await;
            }
            Command::AddScan(id) => {
                self.scanner.add_gift_type(id);
                self.reply(&format!("Added {id} to the watchlist")).await;
            }
            Command::RemoveScan(id) => {
                self.scanner.remove_gift_type(id);
                self.reply(&format!("Removed {id} from the watchlist"))
                    .await;
            }
            Command::ListScan => {
                let ids = self.scanner.gift_types();
                if ids.is_empty() {
                    self.reply("Watchlist is empty (scanning the full catalog)")
                        .await;
                } else {
                    let list = ids
                        .iter()
                        .map(|id| id.to_string())
                        .collect::<Vec<_>>()
                        .join("\n");
                    self.reply(&list).await;
                }
            }
            Command::ClearScan => {
                self.scanner.clear_gift_types();
                self.reply("Watchlist cleared").await;
            }
            Command::SetScan(ids) => {
                self.scanner.set_gift_types(&ids);
                self.reply(&format!("Watchlist set to {} type(s)", ids.len()))
                    .await;
            }
        }
    }

    async fn reply(&self, text: &str) {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let result = self
            .http
            .post(&url)
            .form(&[("chat_id", self.admin_id.to_string()), ("text", text.to_string())])
            .send()
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "failed to send reply");
        }
    }
}

const HELP_TEXT: &str = "Commands:\n\
    /status - scanner and budget state\n\
    /autobuy - toggle auto-buy\n\
    /setbalance <amount> - set the TON budget\n\
    /setdiscount <0..100> - set the minimum discount\n\
    /catalog - sync the gift-type catalog\n\
    /startscan /stopscan - control the scanner\n\
    /addscan <id> /removescan <id> - edit the watchlist\n\
    /listscan /clearscan /setscan <ids...> - manage the watchlist";

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn parse_command(text: &str) -> std::result::Result<Command, ParseError> {
    let text = text.trim();
    let Some(rest) = text.strip_prefix('/') else {
        return Err(ParseError::NotACommand);
    };

    let mut parts = rest.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    // Strip the @botname suffix used in group chats.
    let cmd = cmd.split('@').next().unwrap_or(cmd).to_lowercase();
    let args: Vec<&str> = parts.collect();

    match cmd.as_str() {
        "start" | "help" => Ok(Command::Start),
        "status" => Ok(Command::Status),
        "autobuy" => Ok(Command::AutoBuy),
        "setbalance" => args
            .first()
            .and_then(|raw| raw.parse::<Decimal>().ok())
            .map(Command::SetBalance)
            .ok_or(ParseError::BadArgument("Usage: /setbalance <amount>")),
        "setdiscount" => args
            .first()
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|percent| (0.0..=100.0).contains(percent))
            .map(Command::SetDiscount)
            .ok_or(ParseError::BadArgument("Usage: /setdiscount <0..100>")),
        "catalog" => Ok(Command::Catalog),
        "startscan" => Ok(Command::StartScan),
        "stopscan" => Ok(Command::StopScan),
        "addscan" => args
            .first()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(Command::AddScan)
            .ok_or(ParseError::BadArgument("Usage: /addscan <gift type id>")),
        "removescan" => args
            .first()
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(Command::RemoveScan)
            .ok_or(ParseError::BadArgument("Usage: /removescan <gift type id>")),
        "listscan" => Ok(Command::ListScan),
        "clearscan" => Ok(Command::ClearScan),
        "setscan" => {
            if args.is_empty() {
                return Err(ParseError::BadArgument("Usage: /setscan <id> [id...]"));
            }
            let ids: Option<Vec<i64>> = args.iter().map(|raw| raw.parse().ok()).collect();
            ids.map(Command::SetScan)
                .ok_or(ParseError::BadArgument("Usage: /setscan <id> [id...]"))
        }
        other => Err(ParseError::Unknown(other.to_string())),
    }
}
