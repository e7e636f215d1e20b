use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::store::Tariff;

#[derive(Debug, Clone)]
pub struct TariffRepository {
    pool: PgPool,
}

impl TariffRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Tariff>> {
        sqlx::query_as::<_, Tariff>("SELECT * FROM tariffs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tariff by ID")
    }

    /// Active tariffs offered in the shop; trials are issued through their own
    /// flow and never listed here.
    pub async fn get_purchasable(&self) -> Result<Vec<Tariff>> {
        sqlx::query_as::<_, Tariff>(
            "SELECT * FROM tariffs WHERE is_active = TRUE AND is_trial = FALSE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch purchasable tariffs")
    }

    pub async fn get_trial(&self) -> Result<Option<Tariff>> {
        sqlx::query_as::<_, Tariff>(
            "SELECT * FROM tariffs WHERE is_trial = TRUE AND is_active = TRUE ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch trial tariff")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        name: &str,
        duration_days: i32,
        traffic_limit_gb: Option<i64>,
        price_rub: Option<i64>,
        price_stars: Option<i64>,
        price_usd: Option<i64>,
        is_trial: bool,
    ) -> Result<Tariff> {
        sqlx::query_as::<_, Tariff>(
            r#"
            INSERT INTO tariffs (name, duration_days, traffic_limit_gb, price_rub, price_stars, price_usd, is_trial)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(duration_days)
        .bind(traffic_limit_gb)
        .bind(price_rub)
        .bind(price_stars)
        .bind(price_usd)
        .bind(is_trial)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create tariff")
    }

    /// Ensure a single active trial tariff exists and return it. The row is a
    /// placeholder: fulfillment reads the actual trial days/traffic from the
    /// settings snapshot, not from these columns.
    pub async fn ensure_trial(&self) -> Result<Tariff> {
        if let Some(existing) = self.get_trial().await? {
            return Ok(existing);
        }
        self.create("Trial", 0, None, None, None, None, true)
            .await
            .context("Failed to seed trial tariff")
    }
}
