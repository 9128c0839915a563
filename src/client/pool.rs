//! Round-robin pool of authenticated sessions.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::gateway::HttpGateway;
use super::{Account, MarketApi, Session};
use crate::config::TelegramConfig;
use crate::error::{BotError, Result};
use crate::types::{Deal, Gift, GiftType};

/// Owns one session per configured account and re-exposes the market
/// operations, dispatching each call to the next session in turn.
///
/// Rate limiting is deliberately not done here; the scanner owns the tempo.
#[derive(Debug)]
pub struct ClientPool {
    sessions: Vec<Arc<Session>>,
    cursor: AtomicUsize,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl ClientPool {
    /// Build one session per account, each persisting its authentication
    /// under `sessions_dir/session_<index>.json`.
    pub fn new(cfg: &TelegramConfig, accounts: Vec<Account>) -> Result<Self> {
        let mut sessions = Vec::with_capacity(accounts.len());
        for (index, account) in accounts.into_iter().enumerate() {
            let session_path =
                Path::new(&cfg.sessions_dir).join(format!("session_{index}.json"));
            let gateway = Arc::new(HttpGateway::new(
                &cfg.gateway_url,
                cfg.api_id,
                &cfg.api_hash,
                session_path,
            )?);
            sessions.push(Arc::new(Session::new(index, account, gateway)));
        }
        Self::from_sessions(sessions)
    }

    /// Pool over pre-built sessions.
    pub fn from_sessions(sessions: Vec<Arc<Session>>) -> Result<Self> {
        if sessions.is_empty() {
            return Err(BotError::Config("no accounts provided".into()));
        }
        let (ready_tx, ready_rx) = watch::channel(false);
        Ok(Self {
            sessions,
            cursor: AtomicUsize::new(0),
            ready_tx,
            ready_rx,
        })
    }

    /// Launch every session concurrently and wait until all of them are
    /// authorized. Fails with the first session error observed before the
    /// pool is ready; the latch is then never released and the remaining
    /// sessions wind down with the shutdown token.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<()> {
        let size = self.sessions.len();
        let (ready_tx, mut ready_rx) = mpsc::channel::<usize>(size);
        let (err_tx, mut err_rx) = mpsc::channel::<BotError>(size);

        for session in &self.sessions {
            let session = session.clone();
            let token = shutdown.clone();
            let ready = ready_tx.clone();
            let errors = err_tx.clone();
            tokio::spawn(async move {
                if let Err(err) = session.run(token.clone(), ready).await {
                    if !token.is_cancelled() {
                        tracing::error!(index = session.index(), error = %err, "session terminated");
                        let _ = errors.send(err).await;
                    }
                }
            });
        }
        drop(ready_tx);
        drop(err_tx);

        let mut ready_count = 0usize;
        loop {
            tokio::select! {
                Some(index) = ready_rx.recv() => {
                    ready_count += 1;
                    tracing::info!(index, ready = ready_count, total = size, "session ready");
                    if ready_count == size {
                        let _ = self.ready_tx.send(true);
                        tracing::info!("all sessions ready");
                        return Ok(());
                    }
                }
                Some(err) = err_rx.recv() => return Err(err),
                _ = shutdown.cancelled() => return Err(BotError::Cancelled),
            }
        }
    }

    /// Block until every session is authorized or the token fires.
    pub async fn wait_ready(&self, shutdown: &CancellationToken) -> Result<()> {
        let mut ready = self.ready_rx.clone();
        loop {
            if *ready.borrow() {
                return Ok(());
            }
            tokio::select! {
                changed = ready.changed() => {
                    changed.map_err(|_| BotError::Internal("pool dropped".into()))?;
                }
                _ = shutdown.cancelled() => return Err(BotError::Cancelled),
            }
        }
    }

    pub fn size(&self) -> usize {
        self.sessions.len()
    }

    fn next(&self) -> &Arc<Session> {
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        &self.sessions[index]
    }
}

#[async_trait]
impl MarketApi for ClientPool {
    async fn list_gift_types(&self, catalog_hash: i64) -> Result<Vec<GiftType>> {
        self.next().list_gift_types(catalog_hash).await
    }

    async fn list_recent_prices(&self, gift_type_id: i64, limit: usize) -> Result<Vec<i64>> {
        self.next().list_recent_prices(gift_type_id, limit).await
    }

    async fn list_market_deals(&self, gift_type_id: i64, limit: usize) -> Result<Vec<Deal>> {
        self.next().list_market_deals(gift_type_id, limit).await
    }

    async fn list_page(
        &self,
        gift_type_id: i64,
        offset: &str,
        limit: usize,
    ) -> Result<(Vec<Gift>, String)> {
        self.next().list_page(gift_type_id, offset, limit).await
    }

    async fn buy(&self, deal: &Deal) -> Result<()> {
        self.next().buy(deal).await
    }
}
