use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{CallbackQueryId, ChatId, LabeledPrice, ParseMode};
use tracing::{error, info, warn};

use borealis_db::models::store::{Order, OrderStatus, PaymentRail, Tariff};

use crate::bot::handlers::command::promo_prompt;
use crate::bot::handlers::payment::{order_payload, settle_order};
use crate::bot::keyboards::{payment_keyboard, rail_keyboard};
use crate::bot::utils::{escape_md, format_price};
use crate::state::AppState;

pub fn tariff_card(tariff: &Tariff) -> String {
    let mut text = format!("💎 *{}*\n", escape_md(&tariff.name));
    if let Some(desc) = &tariff.description {
        text.push_str(&format!("_{}_\n", escape_md(desc)));
    }
    text.push_str(&format!("⏱ Duration: {} days\n", tariff.duration_days));
    match tariff.traffic_limit_gb {
        Some(gb) => text.push_str(&format!("📊 Traffic: {gb} GB\n")),
        None => text.push_str("📊 Traffic: unlimited\n"),
    }
    text
}

pub async fn callback_handler(
    bot: Bot,
    q: CallbackQuery,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let callback_id = q.id.clone();
    let tg_id = q.from.id.0 as i64;

    let Some(data) = q.data else {
        return Ok(());
    };
    info!(tg_id, data = %data, "received callback");

    let chat_id = q
        .message
        .as_ref()
        .map(|m| m.chat().id)
        .unwrap_or(ChatId(tg_id));

    match data.as_str() {
        tariff if tariff.starts_with("tariff_") => {
            let tariff_id: i64 = tariff
                .strip_prefix("tariff_")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let _ = bot.answer_callback_query(callback_id).await;

            match state.tariffs.get(tariff_id).await {
                Ok(Some(t)) if t.is_active && !t.is_trial => {
                    let _ = bot
                        .send_message(chat_id, tariff_card(&t))
                        .parse_mode(ParseMode::MarkdownV2)
                        .reply_markup(rail_keyboard(&t, None))
                        .await;
                }
                Ok(_) => {
                    let _ = bot
                        .send_message(chat_id, "❌ This tariff is no longer available.")
                        .await;
                }
                Err(e) => error!(tariff_id, error = %e, "failed to load tariff"),
            }
        }

        promo if promo.starts_with("promo_") => {
            let tariff_id: i64 = promo
                .strip_prefix("promo_")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            let _ = bot.answer_callback_query(callback_id).await;

            let (prompt, markup) = promo_prompt(tariff_id);
            let _ = bot.send_message(chat_id, prompt).reply_markup(markup).await;
        }

        buy if buy.starts_with("buy_") => {
            handle_buy(&bot, &state, chat_id, tg_id, callback_id, buy).await;
        }

        check if check.starts_with("check_") => {
            let order_id: i64 = check
                .strip_prefix("check_")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0);
            handle_check(&bot, &state, tg_id, callback_id, order_id).await;
        }

        _ => {
            let _ = bot.answer_callback_query(callback_id).await;
        }
    }

    Ok(())
}

/// `buy_{tariff}_{rail}` or `buy_{tariff}_{rail}_{promo}`; promo codes may
/// themselves contain underscores, so the code is the whole tail.
fn parse_buy_data(data: &str) -> Option<(i64, PaymentRail, Option<String>)> {
    let mut parts = data.splitn(4, '_').skip(1);
    let tariff_id: i64 = parts.next()?.parse().ok()?;
    let rail = parts.next().and_then(PaymentRail::parse)?;
    let promo_code = parts.next().map(str::to_string);
    Some((tariff_id, rail, promo_code))
}

/// Stars invoices price in whole XTR; the ledger stores i64 minor units.
fn stars_amount(amount_minor: i64) -> Option<u32> {
    u32::try_from(amount_minor).ok()
}

async fn handle_buy(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    tg_id: i64,
    callback_id: CallbackQueryId,
    data: &str,
) {
    let Some((tariff_id, rail, promo_code)) = parse_buy_data(data) else {
        let _ = bot.answer_callback_query(callback_id).await;
        return;
    };

    let tariff = match state.tariffs.get(tariff_id).await {
        Ok(Some(t)) if t.is_active => t,
        _ => {
            let _ = bot
                .answer_callback_query(callback_id)
                .text("This tariff is no longer available.")
                .show_alert(true)
                .await;
            return;
        }
    };
    let Some(mut amount) = tariff.price_for(rail) else {
        let _ = bot
            .answer_callback_query(callback_id)
            .text("This payment method is not available for the tariff.")
            .show_alert(true)
            .await;
        return;
    };

    // Discount is applied at order creation; the redemption counter moves in
    // the same breath so a shared code cannot overshoot its cap.
    if let Some(code) = &promo_code {
        let usable = matches!(
            state.promos.get(code).await,
            Ok(Some(p)) if p.is_usable(chrono::Utc::now())
        );
        let redeemed = usable && state.promos.redeem(code).await.unwrap_or(false);
        if !redeemed {
            let _ = bot
                .answer_callback_query(callback_id)
                .text("This promo code is no longer valid.")
                .show_alert(true)
                .await;
            return;
        }
        if let Ok(Some(p)) = state.promos.get(code).await {
            amount = p.apply(amount);
        }
    }

    let order = match state
        .orders
        .create(tg_id, tariff.id, amount, rail, promo_code.as_deref())
        .await
    {
        Ok(o) => o,
        Err(e) => {
            error!(tg_id, tariff_id, error = %e, "failed to create order");
            let _ = bot
                .answer_callback_query(callback_id)
                .text("Something went wrong, please try again.")
                .show_alert(true)
                .await;
            return;
        }
    };
    let _ = bot.answer_callback_query(callback_id).await;

    // A promo can discount the order to zero; settle it like a manual grant.
    if amount == 0 {
        if let Err(e) = settle_order(bot, state, &order).await {
            error!(order_id = order.id, error = %e, "zero-amount settlement failed");
        }
        return;
    }

    match rail {
        PaymentRail::Stars => {
            let Some(stars) = stars_amount(amount) else {
                error!(order_id = order.id, amount, "stars amount does not fit an invoice");
                let _ = bot
                    .send_message(chat_id, "❌ Could not create the invoice, try again later.")
                    .await;
                return;
            };
            let prices = vec![LabeledPrice {
                label: tariff.name.clone(),
                amount: stars,
            }];
            let _ = bot
                .send_invoice(
                    chat_id,
                    tariff.name.clone(),
                    format!("VPN access: {} days", tariff.duration_days),
                    order_payload(order.id),
                    "XTR",
                    prices,
                )
                .await
                .map_err(|e| error!(order_id = order.id, "failed to send invoice: {}", e));
        }
        PaymentRail::Rub | PaymentRail::Usd => {
            let Some(gateway) = state.gateways.get(rail) else {
                warn!(rail = rail.as_str(), "no gateway configured for rail");
                let _ = bot
                    .send_message(chat_id, "❌ This payment method is currently unavailable.")
                    .await;
                return;
            };
            let description = format!("Order #{}: {}", order.id, tariff.name);
            let metadata = json!({ "order_id": order.id });
            match gateway.create_payment(amount, &description, &metadata).await {
                Ok(intent) => {
                    let _ = state.orders.set_invoice_id(order.id, &intent.payment_id).await;
                    let pay_url = intent.redirect.unwrap_or_default();
                    let _ = bot
                        .send_message(
                            chat_id,
                            format!(
                                "💳 Invoice for *{}* created\\.\n\nPay via the button, \
                                 then tap \"I've paid\"\\.",
                                escape_md(&format_price(amount))
                            ),
                        )
                        .parse_mode(ParseMode::MarkdownV2)
                        .reply_markup(payment_keyboard(&pay_url, order.id))
                        .await;
                }
                Err(e) => {
                    error!(order_id = order.id, error = %e, "gateway payment creation failed");
                    let _ = bot
                        .send_message(chat_id, "❌ Could not create the invoice, try again later.")
                        .await;
                }
            }
        }
        PaymentRail::Manual => {
            if let Err(e) = settle_order(bot, state, &order).await {
                error!(order_id = order.id, error = %e, "manual settlement failed");
            }
        }
    }
}

async fn handle_check(
    bot: &Bot,
    state: &AppState,
    tg_id: i64,
    callback_id: CallbackQueryId,
    order_id: i64,
) {
    let order: Option<Order> = state.orders.get(order_id).await.ok().flatten();
    let Some(order) = order.filter(|o| o.user_id == tg_id) else {
        let _ = bot.answer_callback_query(callback_id).await;
        return;
    };

    if order.status == OrderStatus::Paid {
        let _ = bot.answer_callback_query(callback_id).await;
        let _ = settle_order(bot, state, &order).await;
        return;
    }

    let confirmed = match (&order.invoice_id, state.gateways.get(order.rail)) {
        (Some(invoice_id), Some(gateway)) => {
            gateway.check_payment(invoice_id).await.unwrap_or_else(|e| {
                warn!(order_id, error = %e, "payment status check failed");
                false
            })
        }
        _ => false,
    };

    if !confirmed {
        let _ = bot
            .answer_callback_query(callback_id)
            .text("Payment not confirmed yet. Give it a minute and try again.")
            .show_alert(true)
            .await;
        return;
    }

    let _ = bot.answer_callback_query(callback_id).await;
    match settle_order(bot, state, &order).await {
        Ok(true) => {}
        Ok(false) => {
            let _ = bot
                .send_message(
                    ChatId(tg_id),
                    "⏳ Payment confirmed, activation is in progress. Tap the button again shortly.",
                )
                .await;
        }
        Err(e) => error!(order_id, error = %e, "settlement after check failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_data_keeps_underscored_promo_codes() {
        let (tariff, rail, promo) = parse_buy_data("buy_3_stars_NEW_YEAR_25").unwrap();
        assert_eq!(tariff, 3);
        assert_eq!(rail, PaymentRail::Stars);
        assert_eq!(promo.as_deref(), Some("NEW_YEAR_25"));

        assert_eq!(parse_buy_data("buy_3_rub").unwrap().2, None);
        assert!(parse_buy_data("buy_x_rub").is_none());
        assert!(parse_buy_data("buy_3_cash").is_none());
    }

    #[test]
    fn out_of_range_stars_amounts_are_refused() {
        assert_eq!(stars_amount(250), Some(250));
        assert_eq!(stars_amount(-1), None);
        assert_eq!(stars_amount(i64::from(u32::MAX) + 1), None);
    }

    // Telegram callback ids are a newtype, not a bare string; answering a
    // query only compiles when the id keeps its API type end to end.
    #[test]
    fn callback_ids_keep_their_api_type() {
        fn answers_with(_: CallbackQueryId) {}
        answers_with(CallbackQueryId("77".into()));
    }
}
