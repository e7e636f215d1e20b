use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use borealis_db::models::store::PaymentRail;

pub mod cryptomus;
pub mod stars;
pub mod yookassa;

#[derive(Debug, Clone)]
pub struct PaymentIntent {
    pub payment_id: String,
    /// Checkout URL for redirect-based gateways; `None` for gateways settled
    /// in-chat (Stars invoices).
    pub redirect: Option<String>,
}

/// One payment rail's provider. `metadata` always carries `order_id` so the
/// success callback can find its way back to the ledger.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_payment(
        &self,
        amount_minor: i64,
        description: &str,
        metadata: &Value,
    ) -> Result<PaymentIntent>;

    async fn check_payment(&self, payment_id: &str) -> Result<bool>;

    fn name(&self) -> &str;
}

#[derive(Clone, Default)]
pub struct GatewayRegistry {
    inner: Arc<HashMap<PaymentRail, Arc<dyn PaymentGateway>>>,
}

impl GatewayRegistry {
    pub fn new(map: HashMap<PaymentRail, Arc<dyn PaymentGateway>>) -> Self {
        Self {
            inner: Arc::new(map),
        }
    }

    pub fn get(&self, rail: PaymentRail) -> Option<&Arc<dyn PaymentGateway>> {
        self.inner.get(&rail)
    }
}

/// Render minor units as a decimal amount string ("10000" -> "100.00"),
/// the shape YooKassa and Cryptomus expect.
pub fn format_amount(amount_minor: i64) -> String {
    format!("{}.{:02}", amount_minor / 100, amount_minor % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_formatting() {
        assert_eq!(format_amount(10_000), "100.00");
        assert_eq!(format_amount(5), "0.05");
        assert_eq!(format_amount(199), "1.99");
    }
}
