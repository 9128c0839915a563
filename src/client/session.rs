//! One authenticated upstream session.
//!
//! A session owns a [`RawGateway`], walks it through the
//! `Dialing → Authorizing → (Authorized | Failed)` state machine, then holds
//! the connection for the process lifetime. Every RPC observes a hard 15 s
//! deadline.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::gateway::{
    InvoicePeer, PaymentForm, PaymentOutcome, RawAttribute, RawGateway, RawGiftType, RawListing,
    ResaleInvoice,
};
use super::{Account, MarketApi};
use crate::error::{BotError, Result};
use crate::types::{Deal, Gift, GiftAttributes, GiftType};

const RPC_DEADLINE: Duration = Duration::from_secs(15);
const DEFAULT_PAGE_SIZE: usize = 50;

/// Lifecycle of a session from first dial to steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dialing,
    Authorizing,
    Authorized,
    Failed,
}

pub struct Session {
    index: usize,
    account: Account,
    gateway: Arc<dyn RawGateway>,
    state: RwLock<SessionState>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("index", &self.index)
            .field("account", &self.account)
            .field("state", &self.state)
            .finish()
    }
}

impl Session {
    pub fn new(index: usize, account: Account, gateway: Arc<dyn RawGateway>) -> Self {
        Self {
            index,
            account,
            gateway,
            state: RwLock::new(SessionState::Dialing),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> SessionState {
        *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: SessionState) {
        *self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    /// Dial, authorize, report ready, then hold the session until shutdown.
    /// Any error before ready leaves the session in `Failed`.
    pub async fn run(&self, shutdown: CancellationToken, ready: mpsc::Sender<usize>) -> Result<()> {
        self.set_state(SessionState::Dialing);
        if let Err(err) = self.with_deadline("dial", self.gateway.connect()).await {
            self.set_state(SessionState::Failed);
            return Err(err);
        }

        self.set_state(SessionState::Authorizing);
        if let Err(err) = self.authorize().await {
            self.set_state(SessionState::Failed);
            return Err(err);
        }

        self.set_state(SessionState::Authorized);
        tracing::info!(index = self.index, phone = %self.account.phone, "session authorized");
        let _ = ready.send(self.index).await;

        shutdown.cancelled().await;
        Ok(())
    }

    async fn authorize(&self) -> Result<()> {
        if self
            .with_deadline("auth status", self.gateway.is_authorized())
            .await?
        {
            tracing::debug!(index = self.index, "session already authorized");
            return Ok(());
        }
        tracing::info!(index = self.index, "not authorized, running login flow");
        self.with_deadline(
            "sign in",
            self.gateway
                .sign_in(&self.account.phone, &self.account.password),
        )
        .await
    }

    async fn with_deadline<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(RPC_DEADLINE, fut).await {
            Ok(result) => result,
            Err(_) => Err(BotError::Timeout(op)),
        }
    }

    /// Run the purchase protocol for one deal.
    ///
    /// The invoice slug format differs between upstream versions, so peer and
    /// slug variants are tried in order until one yields a payment form.
    // TODO: drop the slug/peer matrix once the upstream settles on a single
    // resale invoice format.
    async fn buy_deal(&self, deal: &Deal) -> Result<()> {
        let gift = &deal.gift;
        tracing::info!(
            slug = %gift.slug,
            num = gift.num,
            ton = %gift.ton_price,
            "buying deal"
        );

        let peers = [
            InvoicePeer::Myself,
            InvoicePeer::Owner {
                user_id: gift.owner_id,
                access_hash: deal.seller_access_hash,
            },
        ];
        let slugs = [
            format!("{}-{}", gift.slug, gift.num),
            gift.slug.clone(),
            format!("nft/{}", gift.slug),
        ];

        for peer in &peers {
            for slug in &slugs {
                let invoice = ResaleInvoice {
                    slug: slug.clone(),
                    to: peer.clone(),
                    ton: true,
                };
                let form = match self
                    .with_deadline("payment form", self.gateway.payment_form(&invoice))
                    .await
                {
                    Ok(form) => form,
                    Err(err) => {
                        tracing::debug!(slug = %slug, error = %err, "payment form refused");
                        continue;
                    }
                };
                tracing::info!(slug = %slug, form_id = form.form_id, "payment form received");
                return self.submit_payment(form, &invoice).await;
            }
        }

        Err(BotError::PurchaseRejected(
            "no slug/peer combination accepted".into(),
        ))
    }

    async fn submit_payment(&self, form: PaymentForm, invoice: &ResaleInvoice) -> Result<()> {
        if !matches!(form.kind.as_str(), "form" | "stars" | "star_gift") {
            return Err(BotError::PurchaseRejected(format!(
                "unknown payment form kind: {}",
                form.kind
            )));
        }

        tracing::info!(form_id = form.form_id, "submitting payment");
        match self
            .with_deadline(
                "payment submit",
                self.gateway.submit_stars_form(form.form_id, invoice),
            )
            .await?
        {
            PaymentOutcome::Success => {
                tracing::info!("payment succeeded");
                Ok(())
            }
            PaymentOutcome::VerificationNeeded(url) => Err(BotError::VerificationNeeded(url)),
            PaymentOutcome::Unknown(status) => Err(BotError::PurchaseRejected(format!(
                "unknown payment result: {status}"
            ))),
        }
    }
}

#[async_trait]
impl MarketApi for Session {
    async fn list_gift_types(&self, catalog_hash: i64) -> Result<Vec<GiftType>> {
        let page = self
            .with_deadline("catalog", self.gateway.catalog(catalog_hash))
            .await?;
        if page.not_modified {
            return Ok(Vec::new());
        }
        let now = Utc::now();
        Ok(page
            .gifts
            .into_iter()
            .map(|raw| map_gift_type(raw, now))
            .collect())
    }

    async fn list_recent_prices(&self, gift_type_id: i64, limit: usize) -> Result<Vec<i64>> {
        let page = self
            .with_deadline(
                "resale prices",
                self.gateway.resale_listings(gift_type_id, "", limit),
            )
            .await?;
        Ok(page
            .listings
            .iter()
            .map(|listing| listing.star_price)
            .filter(|&price| price > 0)
            .collect())
    }

    async fn list_market_deals(&self, gift_type_id: i64, limit: usize) -> Result<Vec<Deal>> {
        let page = self
            .with_deadline(
                "market deals",
                self.gateway.resale_listings(gift_type_id, "", limit),
            )
            .await?;

        let sellers: HashMap<i64, i64> = page
            .sellers
            .iter()
            .map(|seller| (seller.id, seller.access_hash))
            .collect();

        let now = Utc::now();
        Ok(page
            .listings
            .iter()
            .filter(|listing| listing.star_price > 0)
            .map(|listing| Deal {
                gift: map_gift(listing, gift_type_id, now),
                gift_type: None,
                avg_price: 0,
                profit: 0.0,
                seller_access_hash: sellers.get(&listing.owner_id).copied().unwrap_or(0),
            })
            .collect())
    }

    async fn list_page(
        &self,
        gift_type_id: i64,
        offset: &str,
        limit: usize,
    ) -> Result<(Vec<Gift>, String)> {
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
        let page = self
            .with_deadline(
                "listing page",
                self.gateway.resale_listings(gift_type_id, offset, limit),
            )
            .await?;
        let now = Utc::now();
        let gifts = page
            .listings
            .iter()
            .map(|listing| map_gift(listing, gift_type_id, now))
            .collect();
        Ok((gifts, page.next_offset))
    }

    async fn buy(&self, deal: &Deal) -> Result<()> {
        self.buy_deal(deal).await
    }
}

fn map_gift_type(raw: RawGiftType, now: DateTime<Utc>) -> GiftType {
    GiftType {
        id: raw.id,
        name: raw.title,
        slug: raw.slug,
        store_price: raw.store_price,
        total_supply: raw.total_supply.unwrap_or(0),
        remaining_supply: raw.remaining_supply.unwrap_or(-1),
        market_floor_price: 0,
        average_price: 0,
        price_updated_at: None,
        market_quantity: 0,
        updated_at: now,
    }
}

fn map_gift(listing: &RawListing, gift_type_id: i64, now: DateTime<Utc>) -> Gift {
    Gift {
        id: listing.id,
        type_id: gift_type_id,
        num: listing.num,
        num_rating: 0.0,
        slug: listing.slug.clone(),
        owner_id: listing.owner_id,
        star_price: listing.star_price,
        ton_price: Decimal::new(listing.ton_price_nano, 9),
        attributes: fold_attributes(&listing.attributes),
        address: listing_link(&listing.slug, listing.num),
        updated_at: now,
    }
}

fn fold_attributes(raw: &[RawAttribute]) -> GiftAttributes {
    let mut attrs = GiftAttributes::default();
    for attr in raw {
        match attr.kind.as_str() {
            "model" => {
                attrs.model = attr.name.clone();
                attrs.rarity_per_mille += attr.rarity_per_mille;
            }
            "pattern" => {
                attrs.pattern = attr.name.clone();
                attrs.rarity_per_mille += attr.rarity_per_mille;
            }
            "backdrop" => {
                attrs.backdrop = attr.name.clone();
                attrs.rarity_per_mille += attr.rarity_per_mille;
            }
            "symbol" => attrs.symbol = attr.name.clone(),
            _ => {}
        }
    }
    attrs
}

fn listing_link(slug: &str, num: i64) -> String {
    format!("https://t.me/nft/{slug}-{num}")
}
