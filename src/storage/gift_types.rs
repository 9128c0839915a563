//! Gift-type repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;

use super::GiftTypeStore;
use crate::error::{BotError, Result};
use crate::types::GiftType;

pub struct GiftTypeRepository {
    pool: PgPool,
}

impl GiftTypeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct GiftTypeRow {
    id: i64,
    name: String,
    slug: String,
    store_price: i64,
    total_supply: i32,
    remaining_supply: i32,
    floor_price: i64,
    average_price: i64,
    price_updated_at: Option<DateTime<Utc>>,
    market_quantity: i32,
    updated_at: DateTime<Utc>,
}

impl From<GiftTypeRow> for GiftType {
    fn from(row: GiftTypeRow) -> Self {
        GiftType {
            id: row.id,
            name: row.name,
            slug: row.slug,
            store_price: row.store_price,
            total_supply: row.total_supply,
            remaining_supply: row.remaining_supply,
            market_floor_price: row.floor_price,
            average_price: row.average_price,
            price_updated_at: row.price_updated_at,
            market_quantity: row.market_quantity,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = "id, name, slug, store_price, total_supply, remaining_supply, \
                              floor_price, average_price, price_updated_at, market_quantity, \
                              updated_at";

#[async_trait]
impl GiftTypeStore for GiftTypeRepository {
    async fn create(&self, gift_type: &GiftType) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gift_types
                (id, name, slug, store_price, total_supply, remaining_supply,
                 floor_price, average_price, price_updated_at, market_quantity, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(gift_type.id)
        .bind(&gift_type.name)
        .bind(&gift_type.slug)
        .bind(gift_type.store_price)
        .bind(gift_type.total_supply)
        .bind(gift_type.remaining_supply)
        .bind(gift_type.market_floor_price)
        .bind(gift_type.average_price)
        .bind(gift_type.price_updated_at)
        .bind(gift_type.market_quantity)
        .bind(gift_type.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<GiftType> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM gift_types WHERE id = $1");
        let row: Option<GiftTypeRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(GiftType::from)
            .ok_or(BotError::GiftTypeNotFound(id))
    }

    async fn update(&self, gift_type: &GiftType) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE gift_types
            SET name = $2, slug = $3, store_price = $4, total_supply = $5,
                remaining_supply = $6, floor_price = $7, average_price = $8,
                market_quantity = $9, updated_at = $10
            WHERE id = $1
            "#,
        )
        .bind(gift_type.id)
        .bind(&gift_type.name)
        .bind(&gift_type.slug)
        .bind(gift_type.store_price)
        .bind(gift_type.total_supply)
        .bind(gift_type.remaining_supply)
        .bind(gift_type.market_floor_price)
        .bind(gift_type.average_price)
        .bind(gift_type.market_quantity)
        .bind(gift_type.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::GiftTypeNotFound(gift_type.id));
        }
        Ok(())
    }

    async fn update_price_stats(&self, id: i64, average_price: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE gift_types SET average_price = $2, price_updated_at = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(average_price)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::GiftTypeNotFound(id));
        }
        Ok(())
    }

    async fn update_stats(
        &self,
        id: i64,
        floor_price: i64,
        average_price: i64,
        quantity: i32,
    ) -> Result<()> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            UPDATE gift_types
            SET floor_price = $2, average_price = $3, market_quantity = $4,
                price_updated_at = $5, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(floor_price)
        .bind(average_price)
        .bind(quantity)
        .bind(now)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::GiftTypeNotFound(id));
        }
        Ok(())
    }

    async fn decrease_supply(&self, id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE gift_types
            SET remaining_supply = remaining_supply - 1, updated_at = $2
            WHERE id = $1 AND remaining_supply > 0
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::GiftOutOfStock);
        }
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<GiftType>> {
        let query =
            format!("SELECT {SELECT_COLUMNS} FROM gift_types ORDER BY id LIMIT $1 OFFSET $2");
        let rows: Vec<GiftTypeRow> = sqlx::query_as(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(GiftType::from).collect())
    }
}
