use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use serde_json::{Value, json};
use teloxide::Bot;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::bot::handlers::payment::settle_order;
use crate::payments::cryptomus;
use crate::state::AppState;

#[derive(Clone)]
pub struct WebhookState {
    pub app: AppState,
    pub bot: Bot,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/yookassa", post(yookassa_callback))
        .route("/webhooks/cryptomus", post(cryptomus_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_webhook_server(
    state: WebhookState,
    port: u16,
    mut shutdown_signal: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Webhook server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_signal.recv().await;
        })
        .await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Shared tail of both gateway callbacks: load the order and settle it. A
/// settlement that cannot complete yet returns 500 so the provider retries.
async fn settle_by_order_id(state: &WebhookState, order_id: i64, source: &str) -> StatusCode {
    let order = match state.app.orders.get(order_id).await {
        Ok(Some(o)) => o,
        Ok(None) => {
            warn!(order_id, source, "webhook for unknown order");
            return StatusCode::NOT_FOUND;
        }
        Err(e) => {
            error!(order_id, source, error = %e, "failed to load order for webhook");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    match settle_order(&state.bot, &state.app, &order).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => {
            warn!(order_id, source, "webhook settlement did not complete");
            StatusCode::INTERNAL_SERVER_ERROR
        }
        Err(e) => {
            error!(order_id, source, error = %e, "webhook settlement failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn yookassa_callback(
    State(state): State<WebhookState>,
    Json(payload): Json<Value>,
) -> (StatusCode, &'static str) {
    let event = payload.get("event").and_then(|v| v.as_str()).unwrap_or("");

    // metadata.order_id round-trips through YooKassa as either number or
    // string; older payments created before metadata was attached are found
    // by the provider payment id instead.
    let order_id = match payload
        .pointer("/object/metadata/order_id")
        .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()))
    {
        Some(id) => Some(id),
        None => match payload.pointer("/object/id").and_then(|v| v.as_str()) {
            Some(payment_id) => state
                .app
                .orders
                .get_by_invoice_id(payment_id)
                .await
                .ok()
                .flatten()
                .map(|o| o.id),
            None => None,
        },
    };

    match event {
        "payment.succeeded" => {
            let Some(order_id) = order_id else {
                warn!("YooKassa callback without resolvable order");
                return (StatusCode::BAD_REQUEST, "missing order_id");
            };
            (settle_by_order_id(&state, order_id, "yookassa").await, "OK")
        }
        "payment.canceled" => {
            if let Some(order_id) = order_id {
                match state.app.orders.cancel(order_id).await {
                    Ok(true) => warn!(order_id, "order canceled by YooKassa"),
                    Ok(false) => {}
                    Err(e) => error!(order_id, error = %e, "failed to cancel order"),
                }
            }
            (StatusCode::OK, "OK")
        }
        _ => (StatusCode::OK, "OK"),
    }
}

// Signature covers the raw body, so this handler takes the body as text and
// lets `verify_callback` do the parsing.
async fn cryptomus_callback(
    State(state): State<WebhookState>,
    body: String,
) -> (StatusCode, &'static str) {
    let Some(api_key) = state.app.config.cryptomus_api_key.as_deref() else {
        return (StatusCode::NOT_FOUND, "gateway not configured");
    };
    let payload = match cryptomus::verify_callback(&body, api_key) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "rejected Cryptomus callback");
            return (StatusCode::FORBIDDEN, "bad signature");
        }
    };

    let status = payload.get("status").and_then(|v| v.as_str()).unwrap_or("");
    if !matches!(status, "paid" | "paid_over") {
        return (StatusCode::OK, "OK");
    }

    let order_id = payload
        .get("order_id")
        .and_then(|v| v.as_i64().or_else(|| v.as_str()?.parse().ok()));
    let Some(order_id) = order_id else {
        warn!("Cryptomus callback without order_id");
        return (StatusCode::BAD_REQUEST, "missing order_id");
    };

    (settle_by_order_id(&state, order_id, "cryptomus").await, "OK")
}
