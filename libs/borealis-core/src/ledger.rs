use anyhow::Result;
use async_trait::async_trait;

use borealis_db::models::store::{Order, Tariff, User};
use borealis_db::repositories::{OrderRepository, TariffRepository, UserRepository};

/// Local ledger seam consumed by the fulfillment engine. Production delegates
/// to the Postgres repositories; tests use an in-memory ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn order(&self, id: i64) -> Result<Option<Order>>;
    async fn tariff(&self, id: i64) -> Result<Option<Tariff>>;
    async fn account_link(&self, identity: i64) -> Result<Option<User>>;

    /// Atomically mark the order paid and persist the resolved panel account
    /// id (plus the trial flag when applicable). Returns `false` when the
    /// order was no longer pending, in which case nothing was written.
    async fn commit_fulfillment(
        &self,
        order_id: i64,
        identity: i64,
        remote_uuid: &str,
        mark_trial_used: bool,
    ) -> Result<bool>;
}

#[derive(Debug, Clone)]
pub struct PgLedger {
    orders: OrderRepository,
    tariffs: TariffRepository,
    users: UserRepository,
}

impl PgLedger {
    pub fn new(orders: OrderRepository, tariffs: TariffRepository, users: UserRepository) -> Self {
        Self {
            orders,
            tariffs,
            users,
        }
    }
}

#[async_trait]
impl Ledger for PgLedger {
    async fn order(&self, id: i64) -> Result<Option<Order>> {
        self.orders.get(id).await
    }

    async fn tariff(&self, id: i64) -> Result<Option<Tariff>> {
        self.tariffs.get(id).await
    }

    async fn account_link(&self, identity: i64) -> Result<Option<User>> {
        self.users.get(identity).await
    }

    async fn commit_fulfillment(
        &self,
        order_id: i64,
        identity: i64,
        remote_uuid: &str,
        mark_trial_used: bool,
    ) -> Result<bool> {
        self.orders
            .commit_fulfillment(order_id, identity, remote_uuid, mark_trial_used)
            .await
    }
}
