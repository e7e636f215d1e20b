use anyhow::Result;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode, PreCheckoutQuery};
use tracing::{error, info};

use borealis_db::models::store::{Order, OrderStatus};

use crate::bot::utils::escape_md;
use crate::state::AppState;

pub async fn pre_checkout_handler(
    bot: Bot,
    q: PreCheckoutQuery,
) -> Result<(), teloxide::RequestError> {
    bot.answer_pre_checkout_query(q.id, true).await?;
    Ok(())
}

/// Invoice payload for Stars invoices, resolved back to the order when the
/// `SuccessfulPayment` message arrives.
pub fn order_payload(order_id: i64) -> String {
    format!("order:{order_id}")
}

pub fn parse_order_payload(payload: &str) -> Option<i64> {
    payload.strip_prefix("order:")?.parse().ok()
}

/// Best subscription link for a fulfilled user: the remote account's own URL
/// when the panel reports one, else the conventional `/sub/{id}` path.
pub async fn subscription_link(state: &AppState, user_id: i64) -> Option<String> {
    let user = state.users.get(user_id).await.ok().flatten()?;
    let uuid = user.remote_uuid?;

    let fallback = format!(
        "{}/sub/{}",
        state.config.panel_base_url.trim_end_matches('/'),
        uuid
    );
    match state.panel.get_account(&uuid).await {
        Ok(account) => Some(account.subscription_url.unwrap_or(fallback)),
        Err(e) => {
            error!(user_id, error = %e, "failed to fetch account for link rendering");
            Some(fallback)
        }
    }
}

/// Run fulfillment for a confirmed order and deliver the subscription link to
/// the buyer. Safe to call twice: an already-paid order skips straight to
/// delivery, and the fulfillment commit refuses a second pending->paid flip.
pub async fn settle_order(bot: &Bot, state: &AppState, order: &Order) -> Result<bool> {
    if order.status != OrderStatus::Paid {
        let settings = state.settings.trial_settings().await;
        if !state.engine.fulfill(order.id, &settings).await {
            return Ok(false);
        }
        info!(order_id = order.id, user_id = order.user_id, "order settled");
    }

    let text = match subscription_link(state, order.user_id).await {
        Some(link) => format!(
            "✅ *Your access is ready\\!*\n\nSubscription link:\n`{}`",
            escape_md(&link)
        ),
        None => "✅ *Payment received\\!* Your access is being prepared\\.".to_string(),
    };
    bot.send_message(ChatId(order.user_id), text)
        .parse_mode(ParseMode::MarkdownV2)
        .await?;
    Ok(true)
}
