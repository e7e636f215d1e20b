use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bot_token: String,
    pub database_url: String,
    pub panel_base_url: String,
    pub panel_api_token: String,
    pub webhook_port: u16,
    /// Public HTTPS base of the webhook server, used for gateway callbacks
    /// and payment return URLs.
    pub public_url: String,
    pub admin_ids: Vec<i64>,
    pub yookassa_shop_id: Option<String>,
    pub yookassa_secret_key: Option<String>,
    pub cryptomus_merchant_id: Option<String>,
    pub cryptomus_api_key: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            bot_token: env::var("BOT_TOKEN").context("BOT_TOKEN is not set")?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL is not set")?,
            panel_base_url: env::var("PANEL_BASE_URL").context("PANEL_BASE_URL is not set")?,
            panel_api_token: env::var("PANEL_API_TOKEN").context("PANEL_API_TOKEN is not set")?,
            webhook_port: env::var("WEBHOOK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8081),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            admin_ids: env::var("ADMIN_IDS")
                .unwrap_or_default()
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect(),
            yookassa_shop_id: env::var("YOOKASSA_SHOP_ID").ok(),
            yookassa_secret_key: env::var("YOOKASSA_SECRET_KEY").ok(),
            cryptomus_merchant_id: env::var("CRYPTOMUS_MERCHANT_ID").ok(),
            cryptomus_api_key: env::var("CRYPTOMUS_API_KEY").ok(),
        })
    }

    pub fn is_admin(&self, tg_id: i64) -> bool {
        self.admin_ids.contains(&tg_id)
    }
}
