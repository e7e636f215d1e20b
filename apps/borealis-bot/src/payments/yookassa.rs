use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use crate::payments::{PaymentGateway, PaymentIntent, format_amount};

const API_BASE: &str = "https://api.yookassa.ru/v3";

/// YooKassa REST gateway for the RUB rail. Redirect confirmation; the
/// terminal state arrives both via the webhook (`payment.succeeded`) and the
/// in-chat "I've paid" poll.
pub struct YookassaGateway {
    client: Client,
    shop_id: String,
    secret_key: String,
    return_url: String,
}

impl YookassaGateway {
    pub fn new(shop_id: String, secret_key: String, return_url: String) -> Self {
        Self {
            client: Client::new(),
            shop_id,
            secret_key,
            return_url,
        }
    }
}

#[async_trait]
impl PaymentGateway for YookassaGateway {
    async fn create_payment(
        &self,
        amount_minor: i64,
        description: &str,
        metadata: &Value,
    ) -> Result<PaymentIntent> {
        let body = json!({
            "amount": { "value": format_amount(amount_minor), "currency": "RUB" },
            "capture": true,
            "confirmation": { "type": "redirect", "return_url": self.return_url },
            "description": description,
            "metadata": metadata,
        });

        let resp: Value = self
            .client
            .post(format!("{API_BASE}/payments"))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .header("Idempotence-Key", uuid::Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let payment_id = resp
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("YooKassa response missing payment id: {resp}"))?
            .to_string();
        let redirect = resp
            .pointer("/confirmation/confirmation_url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(PaymentIntent {
            payment_id,
            redirect,
        })
    }

    async fn check_payment(&self, payment_id: &str) -> Result<bool> {
        let resp: Value = self
            .client
            .get(format!("{API_BASE}/payments/{payment_id}"))
            .basic_auth(&self.shop_id, Some(&self.secret_key))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.get("status").and_then(|v| v.as_str()) == Some("succeeded"))
    }

    fn name(&self) -> &str {
        "yookassa"
    }
}
