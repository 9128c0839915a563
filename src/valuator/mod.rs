//! Deal valuation: the price, number and rarity signals, plus the caches
//! that keep the scan loop cheap.

mod processed;
mod settings;

pub use processed::ProcessedCache;
pub use settings::{RuntimeSettings, DEFAULT_MIN_DISCOUNT_PERCENT};

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::client::MarketApi;
use crate::error::{BotError, Result};
use crate::score;
use crate::storage::{GiftStore, GiftTypeStore};
use crate::types::{Deal, GiftType, SyncResult};

/// How long a stored average price is served without refreshing.
const PRICE_CACHE_TTL_MINUTES: i64 = 5;
/// Sample size for the running average: the K cheapest current asks.
const PRICE_SAMPLE_SIZE: usize = 10;
/// How many of the cheapest listings each scan probe inspects.
const MAX_OFFERS_TO_CHECK: usize = 20;
/// A number rated above this fires the number signal.
const NUMBER_SIGNAL_THRESHOLD: f64 = 60.0;
/// The single hard-coded rarity trigger.
const RARE_BACKDROP: &str = "Black";
/// Profit above this sends a gem to the auto-buyer regardless of rarity.
const AUTO_BUY_PROFIT_THRESHOLD: f64 = 15.0;

/// Decides gem / not gem for observed listings and owns the supporting
/// state: the average-price refresh, the processed-listings cache and the
/// runtime tunables.
pub struct Valuator {
    gift_types: Arc<dyn GiftTypeStore>,
    gifts: Arc<dyn GiftStore>,
    api: Arc<dyn MarketApi>,
    settings: Arc<RuntimeSettings>,
    processed: ProcessedCache,
    max_offers_to_check: usize,
}

impl Valuator {
    pub fn new(
        gift_types: Arc<dyn GiftTypeStore>,
        gifts: Arc<dyn GiftStore>,
        api: Arc<dyn MarketApi>,
        settings: Arc<RuntimeSettings>,
    ) -> Self {
        Self {
            gift_types,
            gifts,
            api,
            settings,
            processed: ProcessedCache::new(),
            max_offers_to_check: MAX_OFFERS_TO_CHECK,
        }
    }

    /// Current average price for a gift type: the stored value while fresh,
    /// recomputed from the market otherwise. A failed refresh degrades to a
    /// positive stale value; with no stale value it is an error.
    pub async fn average_price(&self, gift_type_id: i64) -> Result<i64> {
        let gift_type = self.gift_types.get_by_id(gift_type_id).await?;
        if price_cache_valid(&gift_type, Utc::now()) {
            return Ok(gift_type.average_price);
        }

        let fresh = match self.fetch_average(gift_type_id).await {
            Ok(average) => average,
            Err(err) => {
                if gift_type.average_price > 0 {
                    tracing::warn!(
                        gift_type_id,
                        cached = gift_type.average_price,
                        error = %err,
                        "price fetch failed, serving stale average"
                    );
                    return Ok(gift_type.average_price);
                }
                return Err(err);
            }
        };

        if let Err(err) = self.gift_types.update_price_stats(gift_type_id, fresh).await {
            tracing::error!(gift_type_id, error = %err, "failed to persist price stats");
        }
        Ok(fresh)
    }

    async fn fetch_average(&self, gift_type_id: i64) -> Result<i64> {
        let prices = self
            .api
            .list_recent_prices(gift_type_id, PRICE_SAMPLE_SIZE)
            .await?;
        Ok(mean_floor(&prices))
    }

    /// Probe the cheapest listings of one type, persist fresh gems and
    /// return them for emission. DB failures skip the affected listing.
    pub async fn check_market(&self, gift_type: &GiftType) -> Result<Vec<Deal>> {
        let shells = self
            .api
            .list_market_deals(gift_type.id, self.max_offers_to_check)
            .await?;

        let mut gems = Vec::new();
        for mut deal in shells {
            if self.processed.contains(deal.gift.id) {
                continue;
            }

            if !self.evaluate(gift_type, &mut deal) {
                self.processed.insert(deal.gift.id);
                continue;
            }

            let exists = match self.gifts.exists(deal.gift.id).await {
                Ok(exists) => exists,
                Err(err) => {
                    tracing::error!(gift_id = deal.gift.id, error = %err, "existence check failed");
                    continue;
                }
            };
            if exists {
                self.processed.insert(deal.gift.id);
                continue;
            }

            if let Err(err) = self.gifts.upsert(&deal.gift).await {
                tracing::error!(gift_id = deal.gift.id, error = %err, "failed to persist gem");
                continue;
            }
            self.processed.insert(deal.gift.id);
            gems.push(deal);
        }

        Ok(gems)
    }

    /// Decide gem / not gem and enrich the deal in place on a positive
    /// decision.
    ///
    /// A gem is anything that is priced well below the running average, or
    /// carries a number worth collecting, or wears the rare backdrop. The
    /// profit is recorded whenever both prices are known, even when the
    /// price signal alone would not have fired.
    pub fn evaluate(&self, gift_type: &GiftType, deal: &mut Deal) -> bool {
        let rating = score::rate(deal.gift.num);

        let mut profit_pct = 0.0;
        let mut good_price = false;
        if gift_type.average_price > 0 && deal.gift.star_price > 0 {
            profit_pct = (gift_type.average_price - deal.gift.star_price) as f64
                / gift_type.average_price as f64
                * 100.0;
            good_price = profit_pct >= self.settings.min_discount_percent();
        }

        let good_number = rating.score > NUMBER_SIGNAL_THRESHOLD;
        let rare = deal.gift.attributes.backdrop == RARE_BACKDROP;

        if !(good_price || good_number || rare) {
            return false;
        }

        deal.gift.num_rating = rating.score;
        deal.gift_type = Some(gift_type.clone());
        deal.avg_price = gift_type.average_price;
        deal.profit = profit_pct;
        true
    }

    /// The stricter follow-up predicate deciding whether a gem goes to the
    /// auto-buyer in addition to the notifier. The rare-backdrop trigger
    /// fires regardless of profit and can be disabled at runtime.
    pub fn should_auto_buy(&self, deal: &Deal) -> bool {
        (self.settings.buy_on_rare() && deal.gift.attributes.backdrop == RARE_BACKDROP)
            || deal.profit > AUTO_BUY_PROFIT_THRESHOLD
    }

    /// Refresh the stored catalog from the upstream. Per-type failures are
    /// counted, not fatal.
    pub async fn sync_catalog(&self) -> Result<SyncResult> {
        tracing::info!("catalog sync started");
        let remote = self.api.list_gift_types(0).await?;
        tracing::info!(count = remote.len(), "fetched gift types");

        let mut result = SyncResult::default();
        for gift_type in remote {
            let id = gift_type.id;
            match self.sync_gift_type(gift_type).await {
                Ok(true) => result.created += 1,
                Ok(false) => result.updated += 1,
                Err(err) => {
                    tracing::error!(id, error = %err, "gift type sync failed");
                    result.errors += 1;
                }
            }
        }

        tracing::info!(
            created = result.created,
            updated = result.updated,
            errors = result.errors,
            "catalog sync finished"
        );
        Ok(result)
    }

    async fn sync_gift_type(&self, mut remote: GiftType) -> Result<bool> {
        let existing = match self.gift_types.get_by_id(remote.id).await {
            Ok(existing) => existing,
            Err(BotError::GiftTypeNotFound(_)) => {
                self.gift_types.create(&remote).await?;
                return Ok(true);
            }
            Err(err) => return Err(err),
        };

        // Locally computed stats survive the sync.
        remote.market_floor_price = existing.market_floor_price;
        remote.average_price = existing.average_price;
        remote.price_updated_at = existing.price_updated_at;
        remote.market_quantity = existing.market_quantity;
        if remote.name.is_empty() {
            remote.name = existing.name;
        }

        self.gift_types.update(&remote).await?;
        Ok(false)
    }
}

fn price_cache_valid(gift_type: &GiftType, now: DateTime<Utc>) -> bool {
    if gift_type.average_price <= 0 {
        return false;
    }
    match gift_type.price_updated_at {
        Some(updated_at) => now - updated_at < Duration::minutes(PRICE_CACHE_TTL_MINUTES),
        None => false,
    }
}

fn mean_floor(prices: &[i64]) -> i64 {
    if prices.is_empty() {
        return 0;
    }
    prices.iter().sum::<i64>() / prices.len() as i64
}
