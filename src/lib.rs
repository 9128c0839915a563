//! Automated arbitrage sniper for a gift resale marketplace.
//!
//! ## Architecture
//!
//! ```text
//! ClientPool → MarketScanner → Valuator → deals channel → (Notifier | AutoBuyer)
//! ```
//!
//! The pool keeps one authenticated upstream session per account and
//! round-robins every call across them. The scanner owns the scheduling
//! tempo, pacing its requests so the pooled accounts stay under the upstream
//! rate ceiling. The valuator combines price, number-aesthetic and rarity
//! signals; gems flow to the operator chat and, within budget, to the
//! auto-buyer.

pub mod buyer;
pub mod client;
pub mod config;
pub mod error;
pub mod notify;
pub mod scanner;
pub mod score;
pub mod storage;
pub mod telegram;
pub mod types;
pub mod valuator;

#[cfg(test)]
pub mod testutil;

pub use client::{ClientPool, MarketApi};
pub use config::Config;
pub use error::{BotError, Result};
