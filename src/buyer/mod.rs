//! Budget-guarded automatic purchase of gems.

use std::sync::Arc;

use crate::client::MarketApi;
use crate::types::Deal;
use crate::valuator::RuntimeSettings;

/// Executes purchases for deals the valuator flagged for auto-buy.
///
/// Purchases are best effort: no retries, failures are logged and the deal
/// stays in the notifier stream for manual follow-up. The budget is checked
/// but not reserved before the purchase call, so two near-simultaneous gems
/// can both pass; the overshoot is an accepted trade-off against stalling
/// the scanner for multi-second purchase flows.
pub struct AutoBuyer {
    api: Arc<dyn MarketApi>,
    settings: Arc<RuntimeSettings>,
}

impl AutoBuyer {
    pub fn new(api: Arc<dyn MarketApi>, settings: Arc<RuntimeSettings>) -> Self {
        Self { api, settings }
    }

    /// Buy one deal if auto-buy is enabled and the TON price fits the
    /// remaining budget; otherwise return silently.
    pub async fn auto_buy(&self, deal: Deal) {
        let price = deal.gift.ton_price;
        if !self.settings.can_spend(price) {
            tracing::debug!(gift_id = deal.gift.id, ton = %price, "auto-buy skipped");
            return;
        }

        match self.api.buy(&deal).await {
            Ok(()) => {
                self.settings.debit(price);
                tracing::info!(
                    gift_id = deal.gift.id,
                    slug = %deal.gift.slug,
                    ton = %price,
                    balance = %self.settings.balance(),
                    "auto-buy succeeded"
                );
            }
            Err(err) => {
                tracing::warn!(gift_id = deal.gift.id, error = %err, "auto-buy failed");
            }
        }
    }
}
