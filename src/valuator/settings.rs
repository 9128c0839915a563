//! Operator-tunable runtime settings.

use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rust_decimal::Decimal;

pub const DEFAULT_MIN_DISCOUNT_PERCENT: f64 = 20.0;

struct Inner {
    balance: Decimal,
    auto_buy_enabled: bool,
    min_discount_percent: f64,
    buy_on_rare: bool,
}

/// Process-wide tunables mutated only through the operator command surface.
///
/// Reads heavily outnumber writes. The lock is held for the duration of one
/// accessor call, never across I/O.
pub struct RuntimeSettings {
    inner: RwLock<Inner>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            inner: RwLock::new(Inner {
                balance: Decimal::ZERO,
                auto_buy_enabled: false,
                min_discount_percent: DEFAULT_MIN_DISCOUNT_PERCENT,
                buy_on_rare: true,
            }),
        }
    }
}

impl RuntimeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn balance(&self) -> Decimal {
        self.read().balance
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.write().balance = balance;
    }

    /// Whether auto-buy is on and the amount fits the remaining budget,
    /// checked under one read guard.
    pub fn can_spend(&self, amount: Decimal) -> bool {
        let inner = self.read();
        inner.auto_buy_enabled && amount <= inner.balance
    }

    /// Deduct a completed purchase from the budget.
    pub fn debit(&self, amount: Decimal) {
        self.write().balance -= amount;
    }

    pub fn auto_buy_enabled(&self) -> bool {
        self.read().auto_buy_enabled
    }

    /// Flip the auto-buy flag and return the new value.
    pub fn toggle_auto_buy(&self) -> bool {
        let mut inner = self.write();
        inner.auto_buy_enabled = !inner.auto_buy_enabled;
        inner.auto_buy_enabled
    }

    pub fn min_discount_percent(&self) -> f64 {
        self.read().min_discount_percent
    }

    pub fn set_min_discount_percent(&self, percent: f64) {
        self.write().min_discount_percent = percent;
    }

    pub fn buy_on_rare(&self) -> bool {
        self.read().buy_on_rare
    }

    pub fn set_buy_on_rare(&self, enabled: bool) {
        self.write().buy_on_rare = enabled;
    }
}
