//! Upstream market access: the capability trait, authenticated sessions and
//! the round-robin client pool.

mod accounts;
mod gateway;
mod pool;
mod session;

pub use accounts::{load_accounts, Account};
pub use gateway::{
    CatalogPage, HttpGateway, InvoicePeer, PaymentForm, PaymentOutcome, RawAttribute, RawGateway,
    RawGiftType, RawListing, RawSeller, ResaleInvoice, ResalePage,
};
pub use pool::ClientPool;
pub use session::{Session, SessionState};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Deal, Gift, GiftType};

/// The logical market operations the rest of the system depends on.
///
/// A single [`Session`] implements it against one upstream connection; the
/// [`ClientPool`] implements it by round-robin dispatch over its sessions.
#[async_trait]
pub trait MarketApi: Send + Sync {
    /// Fetch the gift-type catalog. An up-to-date `catalog_hash` yields an
    /// empty vec ("not modified") without error.
    async fn list_gift_types(&self, catalog_hash: i64) -> Result<Vec<GiftType>>;

    /// Star prices of the `limit` cheapest currently-listed units of a type.
    async fn list_recent_prices(&self, gift_type_id: i64, limit: usize) -> Result<Vec<i64>>;

    /// Deal shells (gift + seller access hash) for the cheapest `limit`
    /// listings of a type, price ascending.
    async fn list_market_deals(&self, gift_type_id: i64, limit: usize) -> Result<Vec<Deal>>;

    /// One page of the full listing sweep; returns the next opaque cursor.
    async fn list_page(
        &self,
        gift_type_id: i64,
        offset: &str,
        limit: usize,
    ) -> Result<(Vec<Gift>, String)>;

    /// Execute the purchase protocol for a deal.
    async fn buy(&self, deal: &Deal) -> Result<()>;
}
