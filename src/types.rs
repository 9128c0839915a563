//! Core domain records shared across the crate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A class of collectible (a gift series), plus its running market stats.
///
/// The identifier is assigned by the upstream and never changes. The stats
/// fields (`market_floor_price`, `average_price`, `market_quantity`) are
/// maintained locally and survive catalog re-syncs.
#[derive(Debug, Clone, PartialEq)]
pub struct GiftType {
    pub id: i64,
    pub name: String,
    pub slug: String,
    /// Original mint price in the store, in stars.
    pub store_price: i64,
    pub total_supply: i32,
    pub remaining_supply: i32,
    pub market_floor_price: i64,
    /// Running mean of the cheapest recent asks; 0 until first computed.
    pub average_price: i64,
    pub price_updated_at: Option<DateTime<Utc>>,
    pub market_quantity: i32,
    pub updated_at: DateTime<Utc>,
}

/// Visual attributes of a single numbered unit. Empty strings mean the
/// attribute was not reported by the upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GiftAttributes {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub backdrop: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub pattern: String,
    /// Combined rarity of the reported attributes, per mille.
    #[serde(default, rename = "rarity")]
    pub rarity_per_mille: i32,
}

/// A specific numbered unit as observed on the market.
///
/// A zero `star_price` or `ton_price` means the unit is not listed in that
/// currency; an on-sale listing has at least one of them positive.
#[derive(Debug, Clone, PartialEq)]
pub struct Gift {
    pub id: i64,
    pub type_id: i64,
    pub num: i64,
    /// Cached aesthetic score of `num`, 0-100.
    pub num_rating: f64,
    pub slug: String,
    pub owner_id: i64,
    pub star_price: i64,
    pub ton_price: Decimal,
    pub attributes: GiftAttributes,
    /// External listing link.
    pub address: String,
    pub updated_at: DateTime<Utc>,
}

/// A valuation event flowing from the scanner to the notifier and auto-buyer.
///
/// Plain data, captured by value at valuation time; ownership transfers with
/// the channel send.
#[derive(Debug, Clone)]
pub struct Deal {
    pub gift: Gift,
    /// Snapshot of the gift type as of the moment of valuation.
    pub gift_type: Option<GiftType>,
    /// The average-price benchmark the valuation ran against.
    pub avg_price: i64,
    /// Percentage below the benchmark; zero or negative when only the
    /// non-price signals fired.
    pub profit: f64,
    /// Opaque handle needed to address the seller in the purchase flow.
    pub seller_access_hash: i64,
}

/// Outcome counts of one catalog sync pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub errors: usize,
}
