use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::models::store::{Order, OrderStatus, PaymentRail};

#[derive(Debug, Clone)]
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow) -> Order {
        Order {
            id: row.try_get::<i64, _>("id").unwrap_or_default(),
            user_id: row.try_get::<i64, _>("user_id").unwrap_or_default(),
            tariff_id: row.try_get::<i64, _>("tariff_id").unwrap_or_default(),
            amount: row.try_get::<i64, _>("amount").unwrap_or_default(),
            rail: row
                .try_get::<String, _>("rail")
                .ok()
                .and_then(|s| PaymentRail::parse(&s))
                .unwrap_or(PaymentRail::Manual),
            invoice_id: row.try_get::<Option<String>, _>("invoice_id").ok().flatten(),
            promocode: row.try_get::<Option<String>, _>("promocode").ok().flatten(),
            status: row
                .try_get::<String, _>("status")
                .ok()
                .and_then(|s| OrderStatus::parse(&s))
                .unwrap_or(OrderStatus::Pending),
            created_at: row
                .try_get::<DateTime<Utc>, _>("created_at")
                .unwrap_or_else(|_| Utc::now()),
        }
    }

    pub async fn create(
        &self,
        user_id: i64,
        tariff_id: i64,
        amount: i64,
        rail: PaymentRail,
        promocode: Option<&str>,
    ) -> Result<Order> {
        let row = sqlx::query(
            r#"
            INSERT INTO orders (user_id, tariff_id, amount, rail, promocode)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(user_id)
        .bind(tariff_id)
        .bind(amount)
        .bind(rail.as_str())
        .bind(promocode)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create order")?;
        Ok(Self::row_to_order(&row))
    }

    pub async fn get(&self, id: i64) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch order by ID")?;
        Ok(row.map(|r| Self::row_to_order(&r)))
    }

    pub async fn get_by_invoice_id(&self, invoice_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT * FROM orders WHERE invoice_id = $1 ORDER BY id DESC LIMIT 1")
            .bind(invoice_id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch order by invoice ID")?;
        Ok(row.map(|r| Self::row_to_order(&r)))
    }

    pub async fn set_invoice_id(&self, id: i64, invoice_id: &str) -> Result<()> {
        sqlx::query("UPDATE orders SET invoice_id = $1 WHERE id = $2")
            .bind(invoice_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to store order invoice ID")?;
        Ok(())
    }

    pub async fn cancel(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("UPDATE orders SET status = 'canceled' WHERE id = $1 AND status = 'pending'")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to cancel order")?;
        Ok(result.rows_affected() == 1)
    }

    /// Terminal fulfillment write: flips the order to paid and persists the
    /// resolved panel account id in one transaction. The `status = 'pending'`
    /// guard is what makes order-level fulfillment idempotent; a second caller
    /// gets `false` and nothing is written.
    pub async fn commit_fulfillment(
        &self,
        order_id: i64,
        user_id: i64,
        remote_uuid: &str,
        mark_trial_used: bool,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE orders SET status = 'paid' WHERE id = $1 AND status = 'pending'")
            .bind(order_id)
            .execute(&mut *tx)
            .await
            .context("Failed to mark order paid")?;

        if updated.rows_affected() != 1 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        sqlx::query(
            "UPDATE users SET remote_uuid = $1, is_trial_used = is_trial_used OR $2 WHERE id = $3",
        )
        .bind(remote_uuid)
        .bind(mark_trial_used)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("Failed to persist account link")?;

        tx.commit().await?;
        Ok(true)
    }
}
