use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde_json::{Value, json};

use crate::payments::{PaymentGateway, PaymentIntent, format_amount};

const API_BASE: &str = "https://api.cryptomus.com/v1";

pub fn sign(body: &str, api_key: &str) -> String {
    let encoded = base64::engine::general_purpose::STANDARD.encode(body);
    format!("{:x}", md5::compute(format!("{encoded}{api_key}")))
}

/// Webhook bodies carry their signature inline as `sign`, computed over the
/// raw body with that member removed. The provider signs its own key order,
/// so verification must re-serialize without reordering keys (serde_json's
/// `preserve_order` feature). Returns the parsed payload on success.
pub fn verify_callback(raw_body: &str, api_key: &str) -> Result<Value> {
    let mut payload: Value = serde_json::from_str(raw_body)?;
    let map = payload
        .as_object_mut()
        .ok_or_else(|| anyhow!("Cryptomus callback is not an object"))?;
    let got = match map.remove("sign") {
        Some(Value::String(s)) => s,
        _ => return Err(anyhow!("Cryptomus callback missing sign field")),
    };
    let expected = sign(&serde_json::to_string(&payload)?, api_key);

    if got == expected {
        Ok(payload)
    } else {
        Err(anyhow!("Invalid Cryptomus signature"))
    }
}

/// Cryptomus gateway for the USD rail. Requests carry a `merchant` header and
/// an md5-over-base64 body signature; the webhook is verified with the same
/// signature routine.
pub struct CryptomusGateway {
    client: Client,
    merchant_id: String,
    api_key: String,
    callback_url: String,
}

impl CryptomusGateway {
    pub fn new(merchant_id: String, api_key: String, callback_url: String) -> Self {
        Self {
            client: Client::new(),
            merchant_id,
            api_key,
            callback_url,
        }
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let body_str = serde_json::to_string(body)?;
        let sign = sign(&body_str, &self.api_key);

        let resp: Value = self
            .client
            .post(format!("{API_BASE}/{endpoint}"))
            .header("merchant", &self.merchant_id)
            .header("sign", sign)
            .header("Content-Type", "application/json")
            .body(body_str)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(resp)
    }
}

#[async_trait]
impl PaymentGateway for CryptomusGateway {
    async fn create_payment(
        &self,
        amount_minor: i64,
        _description: &str,
        metadata: &Value,
    ) -> Result<PaymentIntent> {
        let order_id = metadata
            .get("order_id")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| anyhow!("metadata missing order_id"))?;

        let body = json!({
            "amount": format_amount(amount_minor),
            "currency": "USD",
            "order_id": order_id.to_string(),
            "url_callback": self.callback_url,
        });
        let resp = self.post("payment", &body).await?;

        let result = resp
            .get("result")
            .ok_or_else(|| anyhow!("Cryptomus error: {resp}"))?;
        let payment_id = result
            .get("uuid")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Cryptomus response missing uuid: {resp}"))?
            .to_string();
        let redirect = result
            .get("url")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        Ok(PaymentIntent {
            payment_id,
            redirect,
        })
    }

    async fn check_payment(&self, payment_id: &str) -> Result<bool> {
        let resp = self
            .post("payment/info", &json!({ "uuid": payment_id }))
            .await?;
        let status = resp
            .pointer("/result/payment_status")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        Ok(matches!(status, "paid" | "paid_over"))
    }

    fn name(&self) -> &str {
        "cryptomus"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_md5_of_base64_body_plus_key() {
        let body = r#"{"amount":"1.00"}"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(body);
        let expected = format!("{:x}", md5::compute(format!("{encoded}secret")));
        assert_eq!(sign(body, "secret"), expected);
    }

    #[test]
    fn callback_verification_accepts_provider_key_order() {
        // Cryptomus does not send keys alphabetically; the signature covers
        // the body exactly as transmitted, minus the sign member.
        let unsigned = r#"{"type":"payment","uuid":"abc","order_id":"7","status":"paid"}"#;
        let sig = sign(unsigned, "secret");
        let body = format!(
            r#"{{"type":"payment","uuid":"abc","order_id":"7","status":"paid","sign":"{sig}"}}"#
        );

        let payload = verify_callback(&body, "secret").unwrap();
        assert_eq!(payload["order_id"], "7");
    }

    #[test]
    fn callback_verification_rejects_bad_signature() {
        let body = r#"{"order_id":"7","status":"paid","sign":"bogus"}"#;
        assert!(verify_callback(body, "secret").is_err());
        assert!(verify_callback(r#"{"order_id":"7"}"#, "secret").is_err());
    }
}
