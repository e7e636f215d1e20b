use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::Promocode;

#[derive(Debug, Clone)]
pub struct PromoRepository {
    pool: PgPool,
}

impl PromoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, code: &str) -> Result<Option<Promocode>> {
        sqlx::query_as::<_, Promocode>("SELECT * FROM promocodes WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch promocode")
    }

    pub async fn create(
        &self,
        code: &str,
        is_percent: bool,
        value: i64,
        max_uses: i32,
    ) -> Result<Promocode> {
        sqlx::query_as::<_, Promocode>(
            r#"
            INSERT INTO promocodes (code, is_percent, value, max_uses)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(code)
        .bind(is_percent)
        .bind(value)
        .bind(max_uses)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create promocode")
    }

    /// Consume one use, guarded against the cap and the validity window in the
    /// same statement so concurrent redemptions cannot overshoot `max_uses`.
    pub async fn redeem(&self, code: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE promocodes
            SET used_count = used_count + 1
            WHERE code = $1
              AND (max_uses = 0 OR used_count < max_uses)
              AND (active_until IS NULL OR active_until >= CURRENT_TIMESTAMP)
            "#,
        )
        .bind(code)
        .execute(&self.pool)
        .await
        .context("Failed to redeem promocode")?;
        Ok(result.rows_affected() == 1)
    }
}
