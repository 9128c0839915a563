//! The market scan loop.
//!
//! One cooperatively paced task walks the watchlist (or the first hundred
//! catalog types when the watchlist is empty), refreshes price stats, pulls
//! the cheapest listings and pushes gems into the bounded deals channel.
//! Pacing is a single request-slot gate: with N pooled accounts the global
//! tempo is the per-account ceiling divided by N.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::buyer::AutoBuyer;
use crate::error::{BotError, Result};
use crate::storage::GiftTypeStore;
use crate::types::{Deal, GiftType};
use crate::valuator::Valuator;

/// Capacity of the deals channel. A full channel blocks the scanner; the
/// notifier is the downstream flow-control point.
pub const DEALS_CHANNEL_CAPACITY: usize = 100;

pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(750);
const WATCHLIST_FALLBACK_LIMIT: i64 = 100;

/// Spaces scanner RPCs at least one interval apart. The first request passes
/// immediately. Owned by the scan task; never shared.
struct SlotGate {
    interval: Duration,
    last: Option<tokio::time::Instant>,
}

impl SlotGate {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    async fn wait(&mut self, shutdown: &CancellationToken) -> Result<()> {
        if let Some(last) = self.last {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                tokio::select! {
                    _ = tokio::time::sleep(self.interval - elapsed) => {}
                    _ = shutdown.cancelled() => return Err(BotError::Cancelled),
                }
            }
        }
        self.last = Some(tokio::time::Instant::now());
        Ok(())
    }
}

struct ScanControl {
    watchlist: Vec<i64>,
    running: bool,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

pub struct MarketScanner {
    valuator: Arc<Valuator>,
    gift_type_store: Arc<dyn GiftTypeStore>,
    buyer: Arc<AutoBuyer>,
    deals: mpsc::Sender<Deal>,
    request_interval: Duration,
    /// Process root token; each scan run gets a child of it.
    shutdown: CancellationToken,
    control: Mutex<ScanControl>,
}

impl MarketScanner {
    pub fn new(
        valuator: Arc<Valuator>,
        gift_type_store: Arc<dyn GiftTypeStore>,
        buyer: Arc<AutoBuyer>,
        deals: mpsc::Sender<Deal>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            valuator,
            gift_type_store,
            buyer,
            deals,
            request_interval: DEFAULT_REQUEST_INTERVAL,
            shutdown,
            control: Mutex::new(ScanControl {
                watchlist: Vec::new(),
                running: false,
                cancel: None,
                handle: None,
            }),
        }
    }

    /// Derive the request interval from the per-account ceiling and the pool
    /// size.
    pub fn with_rate_control(mut self, rate_per_client: Duration, client_count: usize) -> Self {
        if client_count > 0 {
            self.request_interval = rate_per_client / client_count as u32;
        }
        self
    }

    /// Spawn the scan task. Rejects a scanner that is already running.
    pub fn start(self: Arc<Self>) -> Result<()> {
        let mut control = self.lock();
        if control.running {
            return Err(BotError::AlreadyRunning);
        }

        let cancel = self.shutdown.child_token();
        control.cancel = Some(cancel.clone());
        control.running = true;

        let scanner = self.clone();
        control.handle = Some(tokio::spawn(async move {
            if let Err(err) = scanner.run(cancel).await {
                if !matches!(err, BotError::Cancelled) {
                    tracing::error!(error = %err, "scanner stopped with error");
                }
            }
            let mut control = scanner.lock();
            control.running = false;
            control.cancel = None;
        }));

        Ok(())
    }

    /// Cancel the scan task and wait for it to exit. A no-op when idle.
    pub async fn stop(&self) {
        let handle = {
            let mut control = self.lock();
            if !control.running {
                return;
            }
            if let Some(cancel) = control.cancel.take() {
                cancel.cancel();
            }
            control.handle.take()
        };
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn add_gift_type(&self, id: i64) {
        let mut control = self.lock();
        if !control.watchlist.contains(&id) {
            control.watchlist.push(id);
        }
    }

    pub fn remove_gift_type(&self, id: i64) {
        self.lock().watchlist.retain(|&existing| existing != id);
    }

    pub fn set_gift_types(&self, ids: &[i64]) {
        self.lock().watchlist = ids.to_vec();
    }

    /// Empty the watchlist; the scanner falls back to the full catalog.
    pub fn clear_gift_types(&self) {
        self.lock().watchlist.clear();
    }

    pub fn has_gift_type(&self, id: i64) -> bool {
        self.lock().watchlist.contains(&id)
    }

    pub fn gift_types(&self) -> Vec<i64> {
        self.lock().watchlist.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ScanControl> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The endless cycle loop; exits only on cancellation or a closed deals
    /// channel.
    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(interval = ?self.request_interval, "market scanner started");
        let mut gate = SlotGate::new(self.request_interval);
        loop {
            if shutdown.is_cancelled() {
                tracing::info!("market scanner stopped");
                return Err(BotError::Cancelled);
            }
            self.scan_cycle(&shutdown, &mut gate).await?;
        }
    }

    /// One pass over the resolved gift-type list. Transient per-type failures
    /// skip that type; a watchlist resolution failure aborts the cycle.
    async fn scan_cycle(&self, shutdown: &CancellationToken, gate: &mut SlotGate) -> Result<()> {
        let gift_types = match self.resolve_watchlist().await {
            Ok(list) => list,
            Err(err) => {
                tracing::error!(error = %err, "failed to resolve gift types");
                self.idle(shutdown).await?;
                return Ok(());
            }
        };

        if gift_types.is_empty() {
            tracing::debug!("nothing to scan yet");
            self.idle(shutdown).await?;
            return Ok(());
        }

        let mut deals_found = 0usize;
        for mut gift_type in gift_types {
            if shutdown.is_cancelled() {
                return Err(BotError::Cancelled);
            }
            match self.scan_gift_type(shutdown, gate, &mut gift_type).await {
                Ok(count) => deals_found += count,
                Err(err @ (BotError::Cancelled | BotError::ChannelClosed)) => return Err(err),
                Err(err) => {
                    tracing::error!(
                        id = gift_type.id,
                        name = %gift_type.name,
                        error = %err,
                        "scan failed"
                    );
                    continue;
                }
            }
        }

        if deals_found > 0 {
            tracing::info!(deals_found, "scan cycle completed");
        }
        Ok(())
    }

    /// Pause one interval when a cycle had no work, so an empty catalog does
    /// not turn the loop into a busy spin.
    async fn idle(&self, shutdown: &CancellationToken) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(self.request_interval) => Ok(()),
            _ = shutdown.cancelled() => Err(BotError::Cancelled),
        }
    }

    async fn resolve_watchlist(&self) -> Result<Vec<GiftType>> {
        let ids = self.gift_types();
        if ids.is_empty() {
            return self.gift_type_store.list(WATCHLIST_FALLBACK_LIMIT, 0).await;
        }
        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            result.push(self.gift_type_store.get_by_id(id).await?);
        }
        Ok(result)
    }

    async fn scan_gift_type(
        &self,
        shutdown: &CancellationToken,
        gate: &mut SlotGate,
        gift_type: &mut GiftType,
    ) -> Result<usize> {
        gate.wait(shutdown).await?;
        tracing::debug!(id = gift_type.id, name = %gift_type.name, "scanning");
        gift_type.average_price = self.valuator.average_price(gift_type.id).await?;

        gate.wait(shutdown).await?;
        let gems = self.valuator.check_market(gift_type).await?;
        let count = gems.len();

        for deal in gems {
            let buy_copy = self.valuator.should_auto_buy(&deal).then(|| deal.clone());

            tokio::select! {
                sent = self.deals.send(deal) => {
                    sent.map_err(|_| BotError::ChannelClosed)?;
                }
                _ = shutdown.cancelled() => return Err(BotError::Cancelled),
            }

            if let Some(deal) = buy_copy {
                let buyer = self.buyer.clone();
                tokio::spawn(async move {
                    buyer.auto_buy(deal).await;
                });
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        deal_shell, gift_type_with_avg, MemoryApi, MemoryGiftStore, MemoryGiftTypeStore,
    };
    use crate::valuator::RuntimeSettings;
    use rust_decimal_macros::dec;

    fn build_scanner(
        api: Arc<MemoryApi>,
        types: Arc<MemoryGiftTypeStore>,
        capacity: usize,
    ) -> (Arc<MarketScanner>, mpsc::Receiver<Deal>, CancellationToken) {
        let settings = Arc::new(RuntimeSettings::new());
        let valuator = Arc::new(Valuator::new(
            types.clone(),
            Arc::new(MemoryGiftStore::default()),
            api.clone(),
            settings.clone(),
        ));
        let buyer = Arc::new(AutoBuyer::new(api, settings));
        let (deals_tx, deals_rx) = mpsc::channel(capacity);
        let shutdown = CancellationToken::new();
        let scanner = Arc::new(MarketScanner::new(
            valuator,
            types,
            buyer,
            deals_tx,
            shutdown.clone(),
        ));
        (scanner, deals_rx, shutdown)
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_gate_paces_requests() {
        let shutdown = CancellationToken::new();
        let mut gate = SlotGate::new(Duration::from_millis(750));
        let started = tokio::time::Instant::now();

        // Two watched types cost four gated RPCs per cycle; only the first
        // slot is free.
        for _ in 0..4 {
            gate.wait(&shutdown).await.unwrap();
        }

        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_millis(2250),
            "four slots took only {elapsed:?}"
        );
        assert!(elapsed < Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_gate_aborts_on_cancel() {
        let shutdown = CancellationToken::new();
        let mut gate = SlotGate::new(Duration::from_secs(60));
        gate.wait(&shutdown).await.unwrap();

        shutdown.cancel();
        let err = gate.wait(&shutdown).await.unwrap_err();
        assert!(matches!(err, BotError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_emits_gems_in_listing_order() {
        let api = Arc::new(MemoryApi::default());
        api.set_prices(vec![1000]);
        api.set_deals(vec![
            deal_shell(1, 7, 100, dec!(1), "Red"),
            deal_shell(2, 8, 200, dec!(1), "Red"),
        ]);
        let types = Arc::new(MemoryGiftTypeStore::default());
        types.put(gift_type_with_avg(10, 1000));

        let (scanner, mut deals_rx, _shutdown) = build_scanner(api, types, 16);
        scanner.set_gift_types(&[10]);
        scanner.clone().start().unwrap();

        let first = deals_rx.recv().await.unwrap();
        let second = deals_rx.recv().await.unwrap();
        assert_eq!(first.gift.id, 1);
        assert_eq!(second.gift.id, 2);

        scanner.stop().await;
        assert!(!scanner.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_rejected_while_running() {
        let api = Arc::new(MemoryApi::default());
        let types = Arc::new(MemoryGiftTypeStore::default());
        let (scanner, _deals_rx, _shutdown) = build_scanner(api, types, 16);

        scanner.clone().start().unwrap();
        assert!(scanner.is_running());
        let err = scanner.clone().start().unwrap_err();
        assert!(matches!(err, BotError::AlreadyRunning));

        scanner.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_start_keeps_watchlist() {
        let api = Arc::new(MemoryApi::default());
        let types = Arc::new(MemoryGiftTypeStore::default());
        types.put(gift_type_with_avg(10, 1000));
        types.put(gift_type_with_avg(11, 1000));
        let (scanner, _deals_rx, _shutdown) = build_scanner(api, types, 16);
        scanner.set_gift_types(&[10, 11]);

        scanner.clone().start().unwrap();
        scanner.stop().await;
        assert!(!scanner.is_running());
        assert_eq!(scanner.gift_types(), vec![10, 11]);

        scanner.clone().start().unwrap();
        assert!(scanner.is_running());
        scanner.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_send_is_abandoned_on_cancel() {
        let api = Arc::new(MemoryApi::default());
        api.set_prices(vec![1000]);
        api.set_deals(vec![
            deal_shell(1, 7, 100, dec!(1), "Red"),
            deal_shell(2, 8, 200, dec!(1), "Red"),
            deal_shell(3, 9, 300, dec!(1), "Red"),
        ]);
        let types = Arc::new(MemoryGiftTypeStore::default());
        types.put(gift_type_with_avg(10, 1000));

        // Capacity one and no consumer: the second send blocks.
        let (scanner, mut deals_rx, _shutdown) = build_scanner(api, types, 1);
        scanner.set_gift_types(&[10]);
        scanner.clone().start().unwrap();

        // Let the scan task reach the blocked send, then cancel it.
        tokio::time::sleep(Duration::from_secs(5)).await;
        scanner.stop().await;

        // Exactly one deal made it through; the blocked one was lost.
        assert_eq!(deals_rx.try_recv().unwrap().gift.id, 1);
        assert!(deals_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_watchlist_crud() {
        let api = Arc::new(MemoryApi::default());
        let types = Arc::new(MemoryGiftTypeStore::default());
        let (scanner, _deals_rx, _shutdown) = build_scanner(api, types, 16);

        scanner.add_gift_type(1);
        scanner.add_gift_type(2);
        scanner.add_gift_type(1); // duplicates ignored
        assert_eq!(scanner.gift_types(), vec![1, 2]);
        assert!(scanner.has_gift_type(2));

        scanner.remove_gift_type(1);
        assert_eq!(scanner.gift_types(), vec![2]);
        assert!(!scanner.has_gift_type(1));

        scanner.set_gift_types(&[5, 6, 7]);
        assert_eq!(scanner.gift_types(), vec![5, 6, 7]);

        scanner.clear_gift_types();
        assert!(scanner.gift_types().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_buy_launched_for_qualifying_gems() {
        let api = Arc::new(MemoryApi::default());
        api.set_prices(vec![1000]);
        // 30% discount: gem and auto-buy candidate.
        api.set_deals(vec![deal_shell(1, 85423, 700, dec!(1.5), "Blue")]);
        let types = Arc::new(MemoryGiftTypeStore::default());
        types.put(gift_type_with_avg(10, 1000));

        let settings = Arc::new(RuntimeSettings::new());
        settings.set_balance(dec!(10));
        settings.toggle_auto_buy();
        let valuator = Arc::new(Valuator::new(
            types.clone(),
            Arc::new(MemoryGiftStore::default()),
            api.clone(),
            settings.clone(),
        ));
        let buyer = Arc::new(AutoBuyer::new(api.clone(), settings.clone()));
        let (deals_tx, mut deals_rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();
        let scanner = Arc::new(MarketScanner::new(
            valuator,
            types,
            buyer,
            deals_tx,
            shutdown.clone(),
        ));
        scanner.set_gift_types(&[10]);
        scanner.clone().start().unwrap();

        let deal = deals_rx.recv().await.unwrap();
        assert_eq!(deal.profit, 30.0);

        // Give the fire-and-forget purchase task a chance to run.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(api.buys(), vec![1]);
        assert_eq!(settings.balance(), dec!(8.5));

        scanner.stop().await;
    }
}
