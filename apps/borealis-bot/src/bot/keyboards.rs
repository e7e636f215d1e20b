use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup};

use borealis_db::models::store::{PaymentRail, Tariff};

use crate::bot::utils::format_price;

pub fn main_menu() -> KeyboardMarkup {
    KeyboardMarkup::new(vec![
        vec![
            KeyboardButton::new("🛒 Buy VPN"),
            KeyboardButton::new("🎁 Free Trial"),
        ],
        vec![
            KeyboardButton::new("👤 Profile"),
            KeyboardButton::new("❓ Support"),
        ],
    ])
    .resize_keyboard()
}

pub fn tariff_list(tariffs: &[Tariff]) -> InlineKeyboardMarkup {
    let buttons = tariffs
        .iter()
        .map(|t| {
            vec![InlineKeyboardButton::callback(
                t.name.clone(),
                format!("tariff_{}", t.id),
            )]
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(buttons)
}

/// Per-rail price buttons for one tariff card. Rails without a price are not
/// offered. `promo` rides along in the callback data so the discount survives
/// the round trip through Telegram.
pub fn rail_keyboard(tariff: &Tariff, promo: Option<&str>) -> InlineKeyboardMarkup {
    let suffix = promo.map(|c| format!("_{c}")).unwrap_or_default();
    let mut buttons = Vec::new();

    if let Some(price) = tariff.price_rub {
        buttons.push(vec![InlineKeyboardButton::callback(
            format!("💳 {} ₽", format_price(price)),
            format!("buy_{}_{}{suffix}", tariff.id, PaymentRail::Rub.as_str()),
        )]);
    }
    if let Some(stars) = tariff.price_stars {
        buttons.push(vec![InlineKeyboardButton::callback(
            format!("⭐ {stars} Stars"),
            format!("buy_{}_{}{suffix}", tariff.id, PaymentRail::Stars.as_str()),
        )]);
    }
    if let Some(price) = tariff.price_usd {
        buttons.push(vec![InlineKeyboardButton::callback(
            format!("🪙 ${} crypto", format_price(price)),
            format!("buy_{}_{}{suffix}", tariff.id, PaymentRail::Usd.as_str()),
        )]);
    }
    if promo.is_none() {
        buttons.push(vec![InlineKeyboardButton::callback(
            "🎟 Promo code",
            format!("promo_{}", tariff.id),
        )]);
    }

    InlineKeyboardMarkup::new(buttons)
}

pub fn payment_keyboard(pay_url: &str, order_id: i64) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    if let Ok(url) = pay_url.parse() {
        rows.push(vec![InlineKeyboardButton::url("💳 Pay", url)]);
    }
    rows.push(vec![InlineKeyboardButton::callback(
        "✅ I've paid",
        format!("check_{order_id}"),
    )]);
    InlineKeyboardMarkup::new(rows)
}
