//! Deterministic in-memory doubles for the upstream and the stores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;

use crate::client::{
    CatalogPage, InvoicePeer, MarketApi, PaymentForm, PaymentOutcome, RawGateway, RawListing,
    RawSeller, ResaleInvoice, ResalePage,
};
use crate::error::{BotError, Result};
use crate::notify::DealSink;
use crate::storage::{GiftStore, GiftTypeStore};
use crate::types::{Deal, Gift, GiftAttributes, GiftType};

pub fn gift_type_with_avg(id: i64, average_price: i64) -> GiftType {
    GiftType {
        id,
        name: "Test Gift".into(),
        slug: "testgift".into(),
        store_price: 100,
        total_supply: 5000,
        remaining_supply: 1000,
        market_floor_price: 0,
        average_price,
        price_updated_at: (average_price > 0).then(Utc::now),
        market_quantity: 0,
        updated_at: Utc::now(),
    }
}

pub fn deal_shell(id: i64, num: i64, star_price: i64, ton_price: Decimal, backdrop: &str) -> Deal {
    Deal {
        gift: Gift {
            id,
            type_id: 10,
            num,
            num_rating: 0.0,
            slug: "testgift".into(),
            owner_id: 33,
            star_price,
            ton_price,
            attributes: GiftAttributes {
                backdrop: backdrop.into(),
                ..GiftAttributes::default()
            },
            address: format!("https://t.me/nft/testgift-{num}"),
            updated_at: Utc::now(),
        },
        gift_type: None,
        avg_price: 0,
        profit: 0.0,
        seller_access_hash: 42,
    }
}

pub fn listing(id: i64, num: i64, slug: &str, star_price: i64, ton_price_nano: i64) -> RawListing {
    RawListing {
        id,
        num,
        slug: slug.into(),
        owner_id: 0,
        star_price,
        ton_price_nano,
        attributes: Vec::new(),
    }
}

pub fn seller(id: i64, access_hash: i64) -> RawSeller {
    RawSeller { id, access_hash }
}

/// Scripted [`RawGateway`].
pub struct MemoryGateway {
    pub authorized: AtomicBool,
    fail_sign_in: AtomicBool,
    catalog_not_modified: AtomicBool,
    listings: Mutex<Vec<RawListing>>,
    sellers: Mutex<Vec<RawSeller>>,
    /// `(slug, self_peer)` combination for which `payment_form` succeeds.
    accepted: Mutex<Option<(String, bool)>>,
    form_kind: Mutex<String>,
    outcome: Mutex<PaymentOutcome>,
    resale_calls: AtomicUsize,
    form_attempts: AtomicUsize,
    submitted: AtomicUsize,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self {
            authorized: AtomicBool::new(true),
            fail_sign_in: AtomicBool::new(false),
            catalog_not_modified: AtomicBool::new(false),
            listings: Mutex::new(Vec::new()),
            sellers: Mutex::new(Vec::new()),
            accepted: Mutex::new(None),
            form_kind: Mutex::new("star_gift".into()),
            outcome: Mutex::new(PaymentOutcome::Success),
            resale_calls: AtomicUsize::new(0),
            form_attempts: AtomicUsize::new(0),
            submitted: AtomicUsize::new(0),
        }
    }
}

impl MemoryGateway {
    pub fn set_fail_sign_in(&self) {
        self.fail_sign_in.store(true, Ordering::SeqCst);
    }

    pub fn set_catalog_not_modified(&self) {
        self.catalog_not_modified.store(true, Ordering::SeqCst);
    }

    pub fn set_listings(&self, listings: Vec<RawListing>) {
        *self.listings.lock().unwrap() = listings;
    }

    pub fn set_sellers(&self, sellers: Vec<RawSeller>) {
        *self.sellers.lock().unwrap() = sellers;
    }

    pub fn accept_invoice(&self, slug: &str, self_peer: bool) {
        *self.accepted.lock().unwrap() = Some((slug.to_string(), self_peer));
    }

    pub fn set_form_kind(&self, kind: &str) {
        *self.form_kind.lock().unwrap() = kind.to_string();
    }

    pub fn set_outcome(&self, outcome: PaymentOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn resale_calls(&self) -> usize {
        self.resale_calls.load(Ordering::SeqCst)
    }

    pub fn form_attempts(&self) -> usize {
        self.form_attempts.load(Ordering::SeqCst)
    }

    pub fn submitted_forms(&self) -> usize {
        self.submitted.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RawGateway for MemoryGateway {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn is_authorized(&self) -> Result<bool> {
        Ok(self.authorized.load(Ordering::SeqCst))
    }

    async fn sign_in(&self, _phone: &str, _password: &str) -> Result<()> {
        if self.fail_sign_in.load(Ordering::SeqCst) {
            return Err(BotError::Auth("invalid credentials".into()));
        }
        self.authorized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn catalog(&self, _catalog_hash: i64) -> Result<CatalogPage> {
        Ok(CatalogPage {
            not_modified: self.catalog_not_modified.load(Ordering::SeqCst),
            gifts: Vec::new(),
        })
    }

    async fn resale_listings(
        &self,
        _gift_type_id: i64,
        _offset: &str,
        _limit: usize,
    ) -> Result<ResalePage> {
        self.resale_calls.fetch_add(1, Ordering::SeqCst);
        Ok(ResalePage {
            listings: self.listings.lock().unwrap().clone(),
            sellers: self.sellers.lock().unwrap().clone(),
            next_offset: String::new(),
        })
    }

    async fn payment_form(&self, invoice: &ResaleInvoice) -> Result<PaymentForm> {
        self.form_attempts.fetch_add(1, Ordering::SeqCst);
        let accepted = self.accepted.lock().unwrap().clone();
        let matches = accepted.is_some_and(|(slug, self_peer)| {
            invoice.slug == slug && (invoice.to == InvoicePeer::Myself) == self_peer
        });
        if !matches {
            return Err(BotError::Upstream("invoice refused".into()));
        }
        Ok(PaymentForm {
            form_id: 777,
            kind: self.form_kind.lock().unwrap().clone(),
        })
    }

    async fn submit_stars_form(
        &self,
        _form_id: i64,
        _invoice: &ResaleInvoice,
    ) -> Result<PaymentOutcome> {
        self.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome.lock().unwrap().clone())
    }
}

/// Scripted [`MarketApi`].
#[derive(Default)]
pub struct MemoryApi {
    gift_types: Mutex<Vec<GiftType>>,
    prices: Mutex<Vec<i64>>,
    deals: Mutex<Vec<Deal>>,
    prices_fail: AtomicBool,
    buy_fail: AtomicBool,
    bought: Mutex<Vec<i64>>,
    price_calls: AtomicUsize,
}

impl MemoryApi {
    pub fn set_gift_types(&self, gift_types: Vec<GiftType>) {
        *self.gift_types.lock().unwrap() = gift_types;
    }

    pub fn set_prices(&self, prices: Vec<i64>) {
        *self.prices.lock().unwrap() = prices;
    }

    pub fn set_deals(&self, deals: Vec<Deal>) {
        *self.deals.lock().unwrap() = deals;
    }

    pub fn fail_prices(&self) {
        self.prices_fail.store(true, Ordering::SeqCst);
    }

    pub fn fail_buys(&self) {
        self.buy_fail.store(true, Ordering::SeqCst);
    }

    pub fn buys(&self) -> Vec<i64> {
        self.bought.lock().unwrap().clone()
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketApi for MemoryApi {
    async fn list_gift_types(&self, _catalog_hash: i64) -> Result<Vec<GiftType>> {
        Ok(self.gift_types.lock().unwrap().clone())
    }

    async fn list_recent_prices(&self, _gift_type_id: i64, _limit: usize) -> Result<Vec<i64>> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        if self.prices_fail.load(Ordering::SeqCst) {
            return Err(BotError::Upstream("prices unavailable".into()));
        }
        Ok(self.prices.lock().unwrap().clone())
    }

    async fn list_market_deals(&self, _gift_type_id: i64, _limit: usize) -> Result<Vec<Deal>> {
        Ok(self.deals.lock().unwrap().clone())
    }

    async fn list_page(
        &self,
        _gift_type_id: i64,
        _offset: &str,
        _limit: usize,
    ) -> Result<(Vec<Gift>, String)> {
        let gifts = self
            .deals
            .lock()
            .unwrap()
            .iter()
            .map(|deal| deal.gift.clone())
            .collect();
        Ok((gifts, String::new()))
    }

    async fn buy(&self, deal: &Deal) -> Result<()> {
        if self.buy_fail.load(Ordering::SeqCst) {
            return Err(BotError::PurchaseRejected("scripted failure".into()));
        }
        self.bought.lock().unwrap().push(deal.gift.id);
        Ok(())
    }
}

/// In-memory [`GiftTypeStore`].
#[derive(Default)]
pub struct MemoryGiftTypeStore {
    rows: Mutex<HashMap<i64, GiftType>>,
}

impl MemoryGiftTypeStore {
    pub fn put(&self, gift_type: GiftType) {
        self.rows.lock().unwrap().insert(gift_type.id, gift_type);
    }

    pub fn get(&self, id: i64) -> Option<GiftType> {
        self.rows.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl GiftTypeStore for MemoryGiftTypeStore {
    async fn create(&self, gift_type: &GiftType) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(gift_type.id, gift_type.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<GiftType> {
        self.get(id).ok_or(BotError::GiftTypeNotFound(id))
    }

    async fn update(&self, gift_type: &GiftType) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if !rows.contains_key(&gift_type.id) {
            return Err(BotError::GiftTypeNotFound(gift_type.id));
        }
        rows.insert(gift_type.id, gift_type.clone());
        Ok(())
    }

    async fn update_price_stats(&self, id: i64, average_price: i64) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(BotError::GiftTypeNotFound(id))?;
        row.average_price = average_price;
        row.price_updated_at = Some(Utc::now());
        Ok(())
    }

    async fn update_stats(
        &self,
        id: i64,
        floor_price: i64,
        average_price: i64,
        quantity: i32,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(BotError::GiftTypeNotFound(id))?;
        row.market_floor_price = floor_price;
        row.average_price = average_price;
        row.market_quantity = quantity;
        row.price_updated_at = Some(Utc::now());
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn decrease_supply(&self, id: i64) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(BotError::GiftTypeNotFound(id))?;
        if row.remaining_supply <= 0 {
            return Err(BotError::GiftOutOfStock);
        }
        row.remaining_supply -= 1;
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<GiftType>> {
        let rows = self.rows.lock().unwrap();
        let mut all: Vec<GiftType> = rows.values().cloned().collect();
        all.sort_by_key(|gift_type| gift_type.id);
        Ok(all
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }
}

/// In-memory [`GiftStore`] mirroring the repository's upsert semantics.
#[derive(Default)]
pub struct MemoryGiftStore {
    rows: Mutex<HashMap<i64, Gift>>,
    upsert_count: AtomicUsize,
}

impl MemoryGiftStore {
    pub fn upserts(&self) -> usize {
        self.upsert_count.load(Ordering::SeqCst)
    }

    pub fn upsert_sync(&self, gift: &Gift) {
        self.apply_upsert(gift);
    }

    fn apply_upsert(&self, gift: &Gift) {
        self.upsert_count.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(&gift.id) {
            Some(existing) => {
                // On conflict only the volatile fields win, like the SQL
                // upsert.
                existing.num = gift.num;
                existing.owner_id = gift.owner_id;
                existing.star_price = gift.star_price;
                existing.ton_price = gift.ton_price;
                existing.updated_at = gift.updated_at;
            }
            None => {
                rows.insert(gift.id, gift.clone());
            }
        }
    }
}

#[async_trait]
impl GiftStore for MemoryGiftStore {
    async fn upsert(&self, gift: &Gift) -> Result<()> {
        self.apply_upsert(gift);
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Gift> {
        self.rows
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(BotError::GiftNotFound)
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        Ok(self.rows.lock().unwrap().contains_key(&id))
    }

    async fn update_price(&self, id: i64, star_price: Option<i64>) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(BotError::GiftNotFound)?;
        row.star_price = star_price.unwrap_or(0);
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn update_owner(&self, id: i64, new_owner_id: i64) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows.get_mut(&id).ok_or(BotError::GiftNotFound)?;
        row.owner_id = new_owner_id;
        row.star_price = 0;
        row.ton_price = Decimal::ZERO;
        row.updated_at = Utc::now();
        Ok(())
    }
}

struct FlakyInner {
    fail_first: usize,
    attempts: AtomicUsize,
    delivered: AtomicUsize,
}

/// [`DealSink`] that fails a scripted number of times before succeeding.
#[derive(Clone)]
pub struct FlakySink {
    inner: Arc<FlakyInner>,
}

impl FlakySink {
    pub fn failing(fail_first: usize) -> Self {
        Self {
            inner: Arc::new(FlakyInner {
                fail_first,
                attempts: AtomicUsize::new(0),
                delivered: AtomicUsize::new(0),
            }),
        }
    }

    pub fn always_failing() -> Self {
        Self::failing(usize::MAX)
    }

    pub fn attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> usize {
        self.inner.delivered.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DealSink for FlakySink {
    async fn send_html(&self, _text: &str) -> Result<()> {
        let attempt = self.inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.inner.fail_first {
            return Err(BotError::Upstream("sink down".into()));
        }
        self.inner.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    // The double must mirror the SQL upsert: conflicting inserts refresh the
    // volatile columns and leave the rest alone.
    #[tokio::test]
    async fn test_memory_gift_store_upsert_semantics() {
        let store = MemoryGiftStore::default();
        let first = deal_shell(1, 7, 100, dec!(1), "Black").gift;
        store.upsert(&first).await.unwrap();

        let mut second = first.clone();
        second.star_price = 90;
        second.owner_id = 55;
        second.attributes.backdrop = "Blue".into();
        store.upsert(&second).await.unwrap();

        let stored = store.get_by_id(1).await.unwrap();
        assert_eq!(stored.star_price, 90);
        assert_eq!(stored.owner_id, 55);
        // Attributes are not part of the conflict update.
        assert_eq!(stored.attributes.backdrop, "Black");
        assert_eq!(store.upserts(), 2);
    }

    #[tokio::test]
    async fn test_memory_gift_type_store_roundtrip() {
        let store = MemoryGiftTypeStore::default();
        let gift_type = gift_type_with_avg(5, 300);
        store.create(&gift_type).await.unwrap();
        assert_eq!(store.get_by_id(5).await.unwrap(), gift_type);
        assert!(matches!(
            store.get_by_id(6).await.unwrap_err(),
            BotError::GiftTypeNotFound(6)
        ));
    }

    #[tokio::test]
    async fn test_decrease_supply_stops_at_zero() {
        let store = MemoryGiftTypeStore::default();
        let mut gift_type = gift_type_with_avg(5, 0);
        gift_type.remaining_supply = 1;
        store.create(&gift_type).await.unwrap();

        store.decrease_supply(5).await.unwrap();
        let err = store.decrease_supply(5).await.unwrap_err();
        assert_eq!(err.code(), "gift_out_of_stock");
    }

    #[tokio::test]
    async fn test_update_owner_delists_the_gift() {
        let store = MemoryGiftStore::default();
        store.upsert(&deal_shell(1, 7, 100, dec!(1), "Red").gift).await.unwrap();

        store.update_owner(1, 99).await.unwrap();
        let stored = store.get_by_id(1).await.unwrap();
        assert_eq!(stored.owner_id, 99);
        assert_eq!(stored.star_price, 0);
        assert_eq!(stored.ton_price, Decimal::ZERO);
    }
}
