//! Postgres-backed persistence.
//!
//! The two store traits are the repository contracts the rest of the system
//! depends on; the repositories here implement them over a shared [`PgPool`].

mod gift_types;
mod gifts;

pub use gift_types::GiftTypeRepository;
pub use gifts::GiftRepository;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::config::PostgresConfig;
use crate::error::Result;
use crate::types::{Gift, GiftType};

/// Store contract for gift types (catalog plus running market stats).
#[async_trait]
pub trait GiftTypeStore: Send + Sync {
    async fn create(&self, gift_type: &GiftType) -> Result<()>;
    async fn get_by_id(&self, id: i64) -> Result<GiftType>;
    async fn update(&self, gift_type: &GiftType) -> Result<()>;
    /// Persist a freshly computed average price and stamp `price_updated_at`.
    async fn update_price_stats(&self, id: i64, average_price: i64) -> Result<()>;
    /// Persist full market stats from a sweep.
    async fn update_stats(
        &self,
        id: i64,
        floor_price: i64,
        average_price: i64,
        quantity: i32,
    ) -> Result<()>;
    async fn decrease_supply(&self, id: i64) -> Result<()>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<GiftType>>;
}

/// Store contract for individual gifts (observed listings).
#[async_trait]
pub trait GiftStore: Send + Sync {
    /// Insert a listing, or refresh it if it is already known: on conflict
    /// the number, owner, prices and update stamp overwrite the stored row.
    async fn upsert(&self, gift: &Gift) -> Result<()>;
    async fn get_by_id(&self, id: i64) -> Result<Gift>;
    async fn exists(&self, id: i64) -> Result<bool>;
    /// Set or clear the star ask of a listing (`None` delists it).
    async fn update_price(&self, id: i64, star_price: Option<i64>) -> Result<()>;
    /// Hand the gift to a new owner and delist it.
    async fn update_owner(&self, id: i64, new_owner_id: i64) -> Result<()>;
}

/// Connection handle; ensures the schema on connect.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(cfg: &PostgresConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_open_conns)
            .min_connections(cfg.max_idle_conns.min(cfg.max_open_conns))
            .max_lifetime(cfg.conn_max_lifetime)
            .connect(&cfg.dsn)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;
        Ok(db)
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gift_types (
                id               BIGINT PRIMARY KEY,
                name             TEXT NOT NULL DEFAULT '',
                slug             TEXT NOT NULL DEFAULT '',
                store_price      BIGINT NOT NULL DEFAULT 0,
                total_supply     INT NOT NULL DEFAULT 0,
                remaining_supply INT NOT NULL DEFAULT -1,
                floor_price      BIGINT NOT NULL DEFAULT 0,
                average_price    BIGINT NOT NULL DEFAULT 0,
                price_updated_at TIMESTAMPTZ,
                market_quantity  INT NOT NULL DEFAULT 0,
                updated_at       TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gifts (
                id         BIGINT PRIMARY KEY,
                type_id    BIGINT NOT NULL,
                num        BIGINT NOT NULL,
                num_rating DOUBLE PRECISION NOT NULL DEFAULT 0,
                slug       TEXT NOT NULL DEFAULT '',
                owner_id   BIGINT NOT NULL DEFAULT 0,
                star_price BIGINT NOT NULL DEFAULT 0,
                ton_price  NUMERIC NOT NULL DEFAULT 0,
                attributes JSONB NOT NULL DEFAULT '{}',
                address    TEXT NOT NULL DEFAULT '',
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (type_id, num)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_gifts_type_id ON gifts (type_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
