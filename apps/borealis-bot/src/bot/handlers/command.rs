use anyhow::Result as AnyhowResult;
use teloxide::prelude::*;
use teloxide::types::{ForceReply, ParseMode};
use tracing::{error, info, warn};

use borealis_core::{PanelApi, discover, trial_permitted};
use borealis_db::models::store::{PaymentRail, User};

use crate::bot::handlers::callback::tariff_card;
use crate::bot::handlers::payment::{parse_order_payload, settle_order, subscription_link};
use crate::bot::keyboards::{main_menu, rail_keyboard, tariff_list};
use crate::bot::utils::{escape_md, format_gb, format_price};
use crate::services::settings_service::{
    SUPPORT_CONTACT_KEY, TRIAL_DAYS_KEY, TRIAL_GROUP_KEY, TRIAL_TRAFFIC_KEY,
};
use crate::state::AppState;

pub async fn message_handler(
    bot: Bot,
    msg: Message,
    state: AppState,
) -> Result<(), teloxide::RequestError> {
    let tg_id = msg.chat.id.0;

    // Stars settle push-based: the invoice payload points back at the order.
    if let Some(payment) = msg.successful_payment() {
        info!(
            tg_id,
            payload = %payment.invoice_payload,
            "received successful Stars payment"
        );
        let Some(order_id) = parse_order_payload(&payment.invoice_payload) else {
            warn!(tg_id, payload = %payment.invoice_payload, "unrecognized invoice payload");
            return Ok(());
        };
        match state.orders.get(order_id).await {
            Ok(Some(order)) => {
                let _ = state
                    .orders
                    .set_invoice_id(order.id, &payment.provider_payment_charge_id)
                    .await;
                match settle_order(&bot, &state, &order).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let _ = bot
                            .send_message(
                                msg.chat.id,
                                "⏳ Payment received, activation is in progress. \
                                 You will get your link shortly.",
                            )
                            .await;
                    }
                    Err(e) => error!(order_id, error = %e, "stars settlement failed"),
                }
            }
            Ok(None) => warn!(order_id, "stars payment for unknown order"),
            Err(e) => error!(order_id, error = %e, "failed to load order for stars payment"),
        }
        return Ok(());
    }

    let Some(text) = msg.text() else {
        return Ok(());
    };

    let username = msg.from.as_ref().and_then(|u| u.username.as_deref());
    let full_name = msg.from.as_ref().map(|u| u.full_name());

    let user: Option<User> = if text.starts_with("/start") {
        match state
            .users
            .upsert(tg_id, username, full_name.as_deref())
            .await
        {
            Ok(u) => Some(u),
            Err(e) => {
                error!(tg_id, error = %e, "failed to upsert user on /start");
                None
            }
        }
    } else {
        state.users.get(tg_id).await.ok().flatten()
    };

    let Some(user) = user else {
        let _ = bot
            .send_message(msg.chat.id, "Please send /start first.")
            .await;
        return Ok(());
    };

    if text.starts_with("/start") {
        let name = full_name.unwrap_or_else(|| "there".to_string());
        let _ = bot
            .send_message(
                msg.chat.id,
                format!(
                    "👋 *Hello, {}\\!*\n\nUse the menu below to buy VPN access, \
                     grab a free trial, or check your profile\\.",
                    escape_md(&name)
                ),
            )
            .parse_mode(ParseMode::MarkdownV2)
            .reply_markup(main_menu())
            .await
            .map_err(|e| error!("Failed to send welcome: {}", e));
        return Ok(());
    }

    // Promo entry arrives as a reply to the ForceReply prompt.
    if let Some(reply) = msg.reply_to_message() {
        if let Some(reply_text) = reply.text() {
            if let Some(rest) = reply_text.split("tariff #").nth(1) {
                let tariff_id: i64 = rest
                    .split(|c: char| !c.is_ascii_digit())
                    .next()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(0);
                handle_promo_reply(&bot, &msg, &state, tariff_id, text.trim()).await;
                return Ok(());
            }
        }
    }

    if state.config.is_admin(tg_id) && text.starts_with('/') {
        if handle_admin_command(&bot, &msg, &state, text).await {
            return Ok(());
        }
    }

    match text {
        "🛒 Buy VPN" | "/buy" => {
            let tariffs = state.tariffs.get_purchasable().await.unwrap_or_default();
            if tariffs.is_empty() {
                let _ = bot
                    .send_message(msg.chat.id, "❌ No tariffs available at the moment.")
                    .reply_markup(main_menu())
                    .await;
            } else {
                let _ = bot
                    .send_message(msg.chat.id, "🛒 *Choose a tariff:*")
                    .parse_mode(ParseMode::MarkdownV2)
                    .reply_markup(tariff_list(&tariffs))
                    .await;
            }
        }

        "🎁 Free Trial" | "/trial" => {
            handle_trial(&bot, &msg, &state, &user).await;
        }

        "👤 Profile" | "/profile" => {
            handle_profile(&bot, &msg, &state, &user).await;
        }

        "❓ Support" | "/support" => {
            let contact = state
                .settings
                .get_or_default(SUPPORT_CONTACT_KEY, "")
                .await;
            if contact.is_empty() {
                let _ = bot
                    .send_message(msg.chat.id, "❌ Support contact is not configured yet.")
                    .await;
            } else {
                let clean = contact.trim_start_matches('@');
                let _ = bot
                    .send_message(msg.chat.id, format!("Need help? Contact https://t.me/{clean}"))
                    .await;
            }
        }

        _ => {
            // Ignore unknown input
        }
    }

    Ok(())
}

async fn handle_trial(bot: &Bot, msg: &Message, state: &AppState, user: &User) {
    let permitted = trial_permitted(
        state.panel.as_ref(),
        user.id,
        user.remote_uuid.as_deref(),
    )
    .await;

    match permitted {
        Ok(false) => {
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "❌ You have already used your free trial. Check out the paid tariffs!",
                )
                .await;
        }
        Err(e) => {
            warn!(user_id = user.id, error = %e, "trial check unavailable");
            let _ = bot
                .send_message(
                    msg.chat.id,
                    "⏳ The service is temporarily unavailable, please try again later.",
                )
                .await;
        }
        Ok(true) => {
            let order = async {
                let tariff = state.tariffs.ensure_trial().await?;
                state
                    .orders
                    .create(user.id, tariff.id, 0, PaymentRail::Manual, None)
                    .await
            }
            .await;

            match order {
                Ok(order) => match settle_order(bot, state, &order).await {
                    Ok(true) => {}
                    Ok(false) => {
                        let text = trial_denied_reply(
                            state.panel.as_ref(),
                            user.id,
                            user.remote_uuid.as_deref(),
                        )
                        .await;
                        let _ = bot.send_message(msg.chat.id, text).await;
                    }
                    Err(e) => error!(order_id = order.id, error = %e, "trial settlement failed"),
                },
                Err(e) => {
                    error!(user_id = user.id, error = %e, "failed to create trial order");
                    let _ = bot
                        .send_message(msg.chat.id, "❌ Something went wrong, please try again.")
                        .await;
                }
            }
        }
    }
}

/// A settlement that returns false means the engine itself refused the order.
/// For a trial the usual cause is a marker race: another activation landed
/// between the fast-path eligibility check and fulfillment. Re-check the
/// marker so the reply distinguishes that from a transient failure.
async fn trial_denied_reply(
    panel: &dyn PanelApi,
    tg_id: i64,
    remote_uuid: Option<&str>,
) -> &'static str {
    match trial_permitted(panel, tg_id, remote_uuid).await {
        Ok(false) => "❌ You have already used your free trial. Check out the paid tariffs!",
        _ => "❌ Could not activate the trial right now, please try again later.",
    }
}

async fn handle_profile(bot: &Bot, msg: &Message, state: &AppState, user: &User) {
    let mut text = format!(
        "👤 *PROFILE*\n\n🆔 ID: `{}`\n💰 Balance: `{} ₽`\n🎁 Trial used: {}\n",
        user.id,
        escape_md(&format_price(user.balance)),
        if user.is_trial_used { "yes" } else { "no" },
    );

    match discover(state.panel.as_ref(), user.id).await {
        Ok(found) => match found.primary() {
            Some(account) => {
                text.push_str("\n📡 *VPN account*\n");
                if let Some(limit) = account.traffic_limit_bytes {
                    let used = account.traffic_used_bytes.unwrap_or(0);
                    text.push_str(&format!(
                        "📊 Traffic: `{} / {} GB`\n",
                        escape_md(&format!("{:.2}", format_gb(used))),
                        escape_md(&format!("{:.0}", format_gb(limit))),
                    ));
                }
                if let Some(expire) = account.expire_at {
                    text.push_str(&format!(
                        "⌛ Expires: `{}`\n",
                        escape_md(&expire.format("%Y-%m-%d").to_string())
                    ));
                }
                if let Some(link) = subscription_link(state, user.id).await {
                    text.push_str(&format!("\n🔗 Link:\n`{}`\n", escape_md(&link)));
                }
            }
            None => {
                text.push_str("\n📡 VPN account: ❌ *none yet*\n");
            }
        },
        Err(e) => {
            warn!(user_id = user.id, error = %e, "profile discovery failed");
            text.push_str("\n📡 VPN account: ⏳ _status unavailable_\n");
        }
    }

    let _ = bot
        .send_message(msg.chat.id, text)
        .parse_mode(ParseMode::MarkdownV2)
        .await
        .map_err(|e| error!("Failed to send profile: {}", e));
}

async fn handle_promo_reply(bot: &Bot, msg: &Message, state: &AppState, tariff_id: i64, code: &str) {
    let tariff = match state.tariffs.get(tariff_id).await {
        Ok(Some(t)) => t,
        _ => {
            let _ = bot
                .send_message(msg.chat.id, "❌ This tariff is no longer available.")
                .await;
            return;
        }
    };

    let promo: AnyhowResult<_> = state.promos.get(code).await;
    let valid = matches!(&promo, Ok(Some(p)) if p.is_usable(chrono::Utc::now()));
    if !valid {
        let _ = bot
            .send_message(msg.chat.id, "❌ This promo code is invalid or expired.")
            .await;
        return;
    }

    let _ = bot
        .send_message(
            msg.chat.id,
            format!(
                "🎟 Promo code `{}` applied\\!\n\n{}",
                escape_md(code),
                tariff_card(&tariff)
            ),
        )
        .parse_mode(ParseMode::MarkdownV2)
        .reply_markup(rail_keyboard(&tariff, Some(code)))
        .await;
}

/// Returns true when the text was consumed as an admin command.
async fn handle_admin_command(bot: &Bot, msg: &Message, state: &AppState, text: &str) -> bool {
    let (cmd, rest) = text.split_once(' ').unwrap_or((text, ""));

    match cmd {
        "/add_tariff" => {
            // name|days|gb|rub|stars|usd, "-" for an absent value
            let parts: Vec<&str> = rest.split('|').map(str::trim).collect();
            if parts.len() != 6 {
                let _ = bot
                    .send_message(
                        msg.chat.id,
                        "Usage: /add_tariff name|days|gb|rub|stars|usd (use - for none)",
                    )
                    .await;
                return true;
            }
            let opt = |s: &str| -> Option<i64> {
                if s == "-" { None } else { s.parse().ok() }
            };
            let days: i32 = parts[1].parse().unwrap_or(30);
            let created = state
                .tariffs
                .create(
                    parts[0],
                    days,
                    opt(parts[2]),
                    opt(parts[3]),
                    opt(parts[4]),
                    opt(parts[5]),
                    false,
                )
                .await;
            let reply = match created {
                Ok(t) => format!("✅ Tariff #{} \"{}\" created.", t.id, t.name),
                Err(e) => {
                    error!(error = %e, "failed to create tariff");
                    "❌ Failed to create tariff.".to_string()
                }
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
            true
        }

        "/add_promo" => {
            // code|percent|value|max_uses
            let parts: Vec<&str> = rest.split('|').map(str::trim).collect();
            if parts.len() != 4 {
                let _ = bot
                    .send_message(msg.chat.id, "Usage: /add_promo code|percent|value|max_uses")
                    .await;
                return true;
            }
            let is_percent = matches!(parts[1], "1" | "true" | "percent");
            let value: i64 = parts[2].parse().unwrap_or(0);
            let max_uses: i32 = parts[3].parse().unwrap_or(0);
            let reply = match state
                .promos
                .create(parts[0], is_percent, value, max_uses)
                .await
            {
                Ok(p) => format!("✅ Promo \"{}\" created.", p.code),
                Err(e) => {
                    error!(error = %e, "failed to create promocode");
                    "❌ Failed to create promo code.".to_string()
                }
            };
            let _ = bot.send_message(msg.chat.id, reply).await;
            true
        }

        "/trial_settings" => {
            let snapshot = state.settings.trial_settings().await;
            let _ = bot
                .send_message(
                    msg.chat.id,
                    format!(
                        "Trial: {} days, {} GB, group: {}",
                        snapshot.trial_days,
                        snapshot.trial_traffic_gb,
                        snapshot.trial_group_id.as_deref().unwrap_or("(unset)"),
                    ),
                )
                .await;
            true
        }

        "/set_trial" => {
            let mut parts = rest.split_whitespace();
            let (Some(days), Some(gb)) = (parts.next(), parts.next()) else {
                let _ = bot
                    .send_message(msg.chat.id, "Usage: /set_trial <days> <traffic_gb>")
                    .await;
                return true;
            };
            let ok = state.settings.set(TRIAL_DAYS_KEY, days).await.is_ok()
                && state.settings.set(TRIAL_TRAFFIC_KEY, gb).await.is_ok();
            let _ = bot
                .send_message(
                    msg.chat.id,
                    if ok { "✅ Trial settings updated." } else { "❌ Update failed." },
                )
                .await;
            true
        }

        "/set_trial_group" => {
            let ok = state.settings.set(TRIAL_GROUP_KEY, rest.trim()).await.is_ok();
            let _ = bot
                .send_message(
                    msg.chat.id,
                    if ok { "✅ Trial group updated." } else { "❌ Update failed." },
                )
                .await;
            true
        }

        _ => false,
    }
}

/// ForceReply prompt the promo reply handler keys on.
pub fn promo_prompt(tariff_id: i64) -> (String, ForceReply) {
    (
        format!("🎟 Enter your promo code for tariff #{tariff_id}:"),
        ForceReply::new().selective(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use borealis_core::{AccountPatch, PanelError, RemoteAccount, TRIAL_MARKER, panel_username};

    struct OneAccountPanel {
        account: RemoteAccount,
    }

    #[async_trait]
    impl PanelApi for OneAccountPanel {
        async fn find_accounts(&self, query: &str) -> Result<Vec<RemoteAccount>, PanelError> {
            Ok(if self.account.username == query {
                vec![self.account.clone()]
            } else {
                Vec::new()
            })
        }

        async fn get_account(&self, uuid: &str) -> Result<RemoteAccount, PanelError> {
            if self.account.uuid == uuid {
                Ok(self.account.clone())
            } else {
                Err(PanelError::NotFound(uuid.to_string()))
            }
        }

        async fn create_account(
            &self,
            _identity: i64,
            _display_name: &str,
        ) -> Result<RemoteAccount, PanelError> {
            unimplemented!("not exercised")
        }

        async fn update_account(&self, _patch: &AccountPatch) -> Result<RemoteAccount, PanelError> {
            unimplemented!("not exercised")
        }

        async fn add_account_to_group(
            &self,
            _uuid: &str,
            _group_id: &str,
        ) -> Result<(), PanelError> {
            unimplemented!("not exercised")
        }
    }

    fn panel_account(identity: i64, tag: Option<&str>) -> RemoteAccount {
        RemoteAccount {
            uuid: "u-1".into(),
            username: panel_username(identity),
            telegram_id: Some(identity),
            tag: tag.map(str::to_string),
            traffic_limit_bytes: None,
            traffic_used_bytes: None,
            expire_at: None,
            subscription_url: None,
        }
    }

    // A refused trial settlement re-checks the remote marker: marker present
    // means the user raced a second activation and gets the already-used
    // reply, not the generic retry one.
    #[tokio::test]
    async fn refused_trial_names_the_marker_when_present() {
        let panel = OneAccountPanel {
            account: panel_account(9, Some(TRIAL_MARKER)),
        };
        let text = trial_denied_reply(&panel, 9, None).await;
        assert!(text.contains("already used"), "got: {text}");
    }

    #[tokio::test]
    async fn refused_trial_without_marker_reads_as_transient() {
        let panel = OneAccountPanel {
            account: panel_account(9, None),
        };
        let text = trial_denied_reply(&panel, 9, None).await;
        assert!(text.contains("try again later"), "got: {text}");
    }
}
