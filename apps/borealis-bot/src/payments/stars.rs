use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::payments::{PaymentGateway, PaymentIntent};

/// Telegram Stars rail. There is no external checkout: the bot sends an XTR
/// invoice in-chat and settlement arrives push-only as a `SuccessfulPayment`
/// message, so `check_payment` has nothing to poll.
pub struct StarsGateway;

#[async_trait]
impl PaymentGateway for StarsGateway {
    async fn create_payment(
        &self,
        _amount_minor: i64,
        _description: &str,
        _metadata: &Value,
    ) -> Result<PaymentIntent> {
        Ok(PaymentIntent {
            payment_id: uuid::Uuid::new_v4().to_string(),
            redirect: None,
        })
    }

    async fn check_payment(&self, _payment_id: &str) -> Result<bool> {
        Ok(false)
    }

    fn name(&self) -> &str {
        "stars"
    }
}
