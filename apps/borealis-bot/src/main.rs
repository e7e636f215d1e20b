use std::collections::HashMap;
use std::sync::Arc;

use dotenvy::dotenv;
use teloxide::Bot;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bot;
mod config;
mod payments;
mod services;
mod state;
mod webhook;

use borealis_core::{FulfillmentEngine, PanelApi, PanelClient, PgLedger};
use borealis_db::models::store::PaymentRail;
use borealis_db::repositories::{
    OrderRepository, PromoRepository, SettingsRepository, TariffRepository, UserRepository,
};

use crate::config::AppConfig;
use crate::payments::cryptomus::CryptomusGateway;
use crate::payments::stars::StarsGateway;
use crate::payments::yookassa::YookassaGateway;
use crate::payments::{GatewayRegistry, PaymentGateway};
use crate::services::settings_service::SettingsService;
use crate::state::AppState;
use crate::webhook::WebhookState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "borealis_bot=debug,borealis_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    info!("Starting Borealis bot...");

    let pool = borealis_db::connect(&config.database_url).await?;

    let users = UserRepository::new(pool.clone());
    let tariffs = TariffRepository::new(pool.clone());
    let orders = OrderRepository::new(pool.clone());
    let promos = PromoRepository::new(pool.clone());
    let settings = SettingsService::new(SettingsRepository::new(pool.clone()));

    let panel: Arc<dyn PanelApi> = Arc::new(PanelClient::new(
        config.panel_base_url.clone(),
        config.panel_api_token.clone(),
    ));
    let ledger = PgLedger::new(orders.clone(), tariffs.clone(), users.clone());
    let engine = FulfillmentEngine::new(Arc::new(ledger), panel.clone());

    let mut gateways: HashMap<PaymentRail, Arc<dyn PaymentGateway>> = HashMap::new();
    gateways.insert(PaymentRail::Stars, Arc::new(StarsGateway));
    if let (Some(shop_id), Some(secret)) = (
        config.yookassa_shop_id.clone(),
        config.yookassa_secret_key.clone(),
    ) {
        gateways.insert(
            PaymentRail::Rub,
            Arc::new(YookassaGateway::new(shop_id, secret, config.public_url.clone())),
        );
    }
    if let (Some(merchant), Some(api_key)) = (
        config.cryptomus_merchant_id.clone(),
        config.cryptomus_api_key.clone(),
    ) {
        let callback_url = format!(
            "{}/webhooks/cryptomus",
            config.public_url.trim_end_matches('/')
        );
        gateways.insert(
            PaymentRail::Usd,
            Arc::new(CryptomusGateway::new(merchant, api_key, callback_url)),
        );
    }

    let state = AppState {
        config: config.clone(),
        settings,
        users,
        tariffs,
        orders,
        promos,
        panel,
        engine,
        gateways: GatewayRegistry::new(gateways),
    };

    let bot = Bot::new(config.bot_token.clone());

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = ctrl_c_tx.send(());
        }
    });

    let webhook_state = WebhookState {
        app: state.clone(),
        bot: bot.clone(),
    };
    let webhook_port = config.webhook_port;
    let webhook_rx = shutdown_tx.subscribe();
    let webhook_handle = tokio::spawn(async move {
        if let Err(e) = webhook::run_webhook_server(webhook_state, webhook_port, webhook_rx).await {
            error!("Webhook server failed: {}", e);
        }
    });

    bot::run_bot(bot, shutdown_tx.subscribe(), state).await;

    let _ = shutdown_tx.send(());
    let _ = webhook_handle.await;
    info!("Borealis bot stopped");
    Ok(())
}
