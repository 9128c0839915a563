//! Deal notifications to the operator chat.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{BotError, Result};
use crate::types::Deal;

const RETRY_PAUSE: Duration = Duration::from_secs(3);

/// Where formatted messages go. The production sink is the chat Bot API;
/// tests swap in a scripted one.
#[async_trait]
pub trait DealSink: Send + Sync {
    async fn send_html(&self, text: &str) -> Result<()>;
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[derive(Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API `sendMessage` sink with HTML parse mode.
#[derive(Clone)]
pub struct TelegramSink {
    http: reqwest::Client,
    bot_token: String,
    chat_id: i64,
}

impl TelegramSink {
    pub fn new(bot_token: String, chat_id: i64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            bot_token,
            chat_id,
        })
    }
}

#[async_trait]
impl DealSink for TelegramSink {
    async fn send_html(&self, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let resp: SendMessageResponse = self
            .http
            .post(&url)
            .json(&SendMessageRequest {
                chat_id: self.chat_id,
                text,
                parse_mode: "HTML",
                disable_web_page_preview: true,
            })
            .send()
            .await?
            .json()
            .await?;
        if !resp.ok {
            return Err(BotError::Upstream(format!(
                "sendMessage rejected: {}",
                resp.description.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

/// Consumes the deals channel and forwards every deal to the sink.
pub struct Notifier<S: DealSink> {
    sink: S,
}

impl<S: DealSink> Notifier<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Drain deals until the channel closes or shutdown fires.
    ///
    /// A failed send is retried every few seconds for as long as it takes;
    /// no deal is dropped because of a sink failure. Cancellation aborts the
    /// retry and surfaces as an error.
    pub async fn run(
        &self,
        mut deals: mpsc::Receiver<Deal>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            let deal = tokio::select! {
                _ = shutdown.cancelled() => return Err(BotError::Cancelled),
                deal = deals.recv() => match deal {
                    Some(deal) => deal,
                    None => return Ok(()),
                },
            };
            self.send_deal(&deal, &shutdown).await?;
        }
    }

    async fn send_deal(&self, deal: &Deal, shutdown: &CancellationToken) -> Result<()> {
        let text = format_deal(deal);
        beep();
        loop {
            match self.sink.send_html(&text).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to send deal, retrying");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(RETRY_PAUSE) => {}
                _ = shutdown.cancelled() => return Err(BotError::Cancelled),
            }
        }
    }
}

/// The fixed operator-facing gem message.
fn format_deal(deal: &Deal) -> String {
    let name = deal
        .gift_type
        .as_ref()
        .map(|gift_type| gift_type.name.as_str())
        .unwrap_or("Unknown");
    format!(
        "🔥 <b>GEM FOUND!</b>\n\n\
         🎁 <b>Name:</b> {name}\n\
         💰 <b>StarPrice:</b> {} ⭐\n\
         💰 <b>TonPrice:</b> {:.2}\n\
         📊 <b>Avg StarPrice:</b> {} ⭐\n\
         📉 <b>Profit:</b> {:.1}%\n\n\
         🔗 <a href=\"{}\">Buy Now</a>",
        deal.gift.star_price, deal.gift.ton_price, deal.avg_price, deal.profit, deal.gift.address,
    )
}

/// Best-effort audible ping; not part of the notification contract.
fn beep() {
    #[cfg(target_os = "macos")]
    tokio::task::spawn_blocking(|| {
        let _ = std::process::Command::new("afplay")
            .arg("/System/Library/Sounds/Glass.aiff")
            .status();
    });

    #[cfg(target_os = "windows")]
    tokio::task::spawn_blocking(|| {
        let _ = std::process::Command::new("powershell")
            .args(["-c", "[System.Console]::Beep(1000, 500)"])
            .status();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{deal_shell, gift_type_with_avg, FlakySink};
    use rust_decimal_macros::dec;

    fn sample_deal() -> Deal {
        let mut deal = deal_shell(1, 7, 700, dec!(1.5), "Blue");
        deal.gift_type = Some(gift_type_with_avg(10, 1000));
        deal.avg_price = 1000;
        deal.profit = 30.0;
        deal
    }

    #[test]
    fn test_format_deal() {
        let text = format_deal(&sample_deal());
        assert!(text.contains("GEM FOUND"));
        assert!(text.contains("Test Gift"));
        assert!(text.contains("700 ⭐"));
        assert!(text.contains("1.50"));
        assert!(text.contains("1000 ⭐"));
        assert!(text.contains("30.0%"));
        assert!(text.contains("https://t.me/nft/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_sink_recovers() {
        let sink = FlakySink::failing(2);
        let notifier = Notifier::new(sink.clone());
        let (deals_tx, deals_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { notifier.run(deals_rx, shutdown).await })
        };

        let started = tokio::time::Instant::now();
        deals_tx.send(sample_deal()).await.unwrap();
        drop(deals_tx);

        // Channel closed after the one deal: run returns Ok once delivered.
        task.await.unwrap().unwrap();

        assert_eq!(sink.attempts(), 3);
        assert_eq!(sink.delivered(), 1, "the deal is delivered exactly once");
        assert!(
            started.elapsed() >= Duration::from_secs(6),
            "two retry pauses must pass before the third attempt"
        );

        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_retry() {
        let sink = FlakySink::always_failing();
        let notifier = Notifier::new(sink.clone());
        let (deals_tx, deals_rx) = mpsc::channel(4);
        let shutdown = CancellationToken::new();

        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { notifier.run(deals_rx, shutdown).await })
        };

        deals_tx.send(sample_deal()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(4)).await;
        shutdown.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BotError::Cancelled));
        assert!(sink.attempts() >= 2);
        assert_eq!(sink.delivered(), 0);
    }

    #[tokio::test]
    async fn test_closed_channel_ends_the_run() {
        let sink = FlakySink::failing(0);
        let notifier = Notifier::new(sink);
        let (deals_tx, deals_rx) = mpsc::channel::<Deal>(1);
        drop(deals_tx);

        notifier
            .run(deals_rx, CancellationToken::new())
            .await
            .unwrap();
    }
}
