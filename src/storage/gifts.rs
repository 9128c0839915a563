//! Gift (listing) repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPool;
use sqlx::types::Json;
use sqlx::FromRow;

use super::GiftStore;
use crate::error::{BotError, Result};
use crate::types::{Gift, GiftAttributes};

pub struct GiftRepository {
    pool: PgPool,
}

impl GiftRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct GiftRow {
    id: i64,
    type_id: i64,
    num: i64,
    num_rating: f64,
    slug: String,
    owner_id: i64,
    star_price: i64,
    ton_price: Decimal,
    attributes: Json<GiftAttributes>,
    address: String,
    updated_at: DateTime<Utc>,
}

impl From<GiftRow> for Gift {
    fn from(row: GiftRow) -> Self {
        Gift {
            id: row.id,
            type_id: row.type_id,
            num: row.num,
            num_rating: row.num_rating,
            slug: row.slug,
            owner_id: row.owner_id,
            star_price: row.star_price,
            ton_price: row.ton_price,
            attributes: row.attributes.0,
            address: row.address,
            updated_at: row.updated_at,
        }
    }
}

const SELECT_COLUMNS: &str = "id, type_id, num, num_rating, slug, owner_id, star_price, \
                              ton_price, attributes, address, updated_at";

#[async_trait]
impl GiftStore for GiftRepository {
    async fn upsert(&self, gift: &Gift) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gifts
                (id, type_id, num, num_rating, slug, owner_id, star_price,
                 ton_price, attributes, address, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (id) DO UPDATE SET
                num        = EXCLUDED.num,
                owner_id   = EXCLUDED.owner_id,
                star_price = EXCLUDED.star_price,
                ton_price  = EXCLUDED.ton_price,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(gift.id)
        .bind(gift.type_id)
        .bind(gift.num)
        .bind(gift.num_rating)
        .bind(&gift.slug)
        .bind(gift.owner_id)
        .bind(gift.star_price)
        .bind(gift.ton_price)
        .bind(Json(&gift.attributes))
        .bind(&gift.address)
        .bind(gift.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: i64) -> Result<Gift> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM gifts WHERE id = $1");
        let row: Option<GiftRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Gift::from).ok_or(BotError::GiftNotFound)
    }

    async fn exists(&self, id: i64) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM gifts WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn update_price(&self, id: i64, star_price: Option<i64>) -> Result<()> {
        let result = sqlx::query("UPDATE gifts SET star_price = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(star_price.unwrap_or(0))
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::GiftNotFound);
        }
        Ok(())
    }

    async fn update_owner(&self, id: i64, new_owner_id: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE gifts
            SET owner_id = $2, star_price = 0, ton_price = 0, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(new_owner_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(BotError::GiftNotFound);
        }
        Ok(())
    }
}
