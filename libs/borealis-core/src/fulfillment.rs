use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use borealis_db::models::store::{OrderStatus, Tariff};

use crate::discovery::panel_username;
use crate::ledger::Ledger;
use crate::panel::client::{PanelApi, PanelError};
use crate::panel::types::{AccountPatch, RemoteAccount, format_expire_at};
use crate::trial::TRIAL_MARKER;

const GIB: i64 = 1 << 30;

/// One consistent view of the mutable process-wide settings, loaded by the
/// caller before the fulfillment call so the whole call sees the same values.
#[derive(Debug, Clone)]
pub struct FulfillmentSettings {
    pub trial_days: i64,
    pub trial_traffic_gb: i64,
    pub trial_group_id: Option<String>,
}

impl Default for FulfillmentSettings {
    fn default() -> Self {
        Self {
            trial_days: 3,
            trial_traffic_gb: 100,
            trial_group_id: None,
        }
    }
}

#[derive(Error, Debug)]
enum FulfillError {
    #[error("order {0} missing or already settled")]
    OrderUnavailable(i64),
    #[error("account link missing for identity {0}")]
    LinkMissing(i64),
    #[error("tariff {0} missing")]
    TariffMissing(i64),
    #[error("could not create nor locate a panel account for identity {0}")]
    Unprovisionable(i64),
    #[error("trial already consumed on the panel side")]
    TrialConsumed,
    #[error(transparent)]
    Panel(#[from] PanelError),
    #[error("ledger failure: {0}")]
    Ledger(#[from] anyhow::Error),
}

impl FulfillError {
    /// Permanent failures need operator attention; everything else is safe to
    /// retry because each retry re-derives state from the panel.
    fn is_permanent(&self) -> bool {
        matches!(
            self,
            FulfillError::OrderUnavailable(_)
                | FulfillError::LinkMissing(_)
                | FulfillError::TariffMissing(_)
                | FulfillError::Unprovisionable(_)
        )
    }
}

/// Idempotent order fulfillment: provision or repair the panel account for the
/// order's identity, apply the tariff additively, then commit the terminal
/// `paid` transition locally. Remote mutations happen before the local commit,
/// so a failed call leaves the order pending and retry-safe; partial remote
/// mutations are accepted (no remote compensation).
#[derive(Clone)]
pub struct FulfillmentEngine {
    ledger: Arc<dyn Ledger>,
    panel: Arc<dyn PanelApi>,
}

impl FulfillmentEngine {
    pub fn new(ledger: Arc<dyn Ledger>, panel: Arc<dyn PanelApi>) -> Self {
        Self { ledger, panel }
    }

    /// Never panics and never surfaces an error: every failure class collapses
    /// to `false` with a log line carrying the order id. A trial rejection is
    /// also `false`, logged as a rejection rather than a failure so callers
    /// and operators can tell the branches apart.
    pub async fn fulfill(&self, order_id: i64, settings: &FulfillmentSettings) -> bool {
        match self.run(order_id, settings).await {
            Ok(()) => {
                info!(order_id, "order fulfilled");
                true
            }
            Err(FulfillError::TrialConsumed) => {
                warn!(order_id, "fulfillment rejected: trial already used");
                false
            }
            Err(e) if e.is_permanent() => {
                error!(order_id, error = %e, "fulfillment failed permanently; manual intervention needed");
                false
            }
            Err(e) => {
                error!(order_id, error = %e, "fulfillment failed; safe to retry");
                false
            }
        }
    }

    async fn run(&self, order_id: i64, settings: &FulfillmentSettings) -> Result<(), FulfillError> {
        let order = self
            .ledger
            .order(order_id)
            .await?
            .filter(|o| o.status == OrderStatus::Pending)
            .ok_or(FulfillError::OrderUnavailable(order_id))?;

        let identity = order.user_id;
        let link = self
            .ledger
            .account_link(identity)
            .await?
            .ok_or(FulfillError::LinkMissing(identity))?;
        let tariff = self
            .ledger
            .tariff(order.tariff_id)
            .await?
            .ok_or(FulfillError::TariffMissing(order.tariff_id))?;

        info!(
            order_id,
            identity,
            tariff = %tariff.name,
            is_trial = tariff.is_trial,
            "fulfillment started"
        );

        // 1. Self-heal: a cached account id that 404s is cleared, not fatal.
        // The cleared state lives in this call only; the final commit persists
        // whatever id the call ends up with.
        let mut remote_uuid = link.remote_uuid.clone();
        if let Some(uuid) = remote_uuid.as_deref() {
            match self.panel.get_account(uuid).await {
                Ok(_) => {}
                Err(PanelError::NotFound(_)) => {
                    debug!(order_id, uuid, "cached panel id stale, re-provisioning");
                    remote_uuid = None;
                }
                Err(e) => return Err(e.into()),
            }
        }

        // 2. Provision, falling back to exact-username recovery on collision.
        let uuid = match remote_uuid {
            Some(uuid) => uuid,
            None => self.provision(identity, &link.full_name).await?,
        };

        // 3. Single snapshot reused for every decision below; interleaved
        // external reads would race.
        let snapshot = self.panel.get_account(&uuid).await?;

        if tariff.is_trial && !crate::trial::trial_available(&snapshot) {
            return Err(FulfillError::TrialConsumed);
        }

        // 4. One additive update batch.
        let patch = build_patch(&snapshot, &tariff, settings, Utc::now());
        self.panel.update_account(&patch).await?;

        // 5. Trial group assignment; an unset group id is log-and-skip.
        if tariff.is_trial {
            match settings.trial_group_id.as_deref() {
                None | Some("") => {
                    warn!(order_id, "trial group not configured, skipping assignment");
                }
                Some(group_id) => {
                    self.panel.add_account_to_group(&uuid, group_id).await?;
                    info!(order_id, group_id, "account added to trial group");
                }
            }
        }

        // 6. One local transaction; a lost race to settle the order shows up
        // as a refused commit.
        let committed = self
            .ledger
            .commit_fulfillment(order_id, identity, &uuid, tariff.is_trial)
            .await?;
        if !committed {
            return Err(FulfillError::OrderUnavailable(order_id));
        }
        Ok(())
    }

    async fn provision(
        &self,
        identity: i64,
        display_name: &Option<String>,
    ) -> Result<String, FulfillError> {
        let name = display_name.as_deref().unwrap_or("unknown");
        match self.panel.create_account(identity, name).await {
            Ok(account) => {
                info!(identity, uuid = %account.uuid, "panel account created");
                Ok(account.uuid)
            }
            Err(e) => {
                // Likely a username collision: the account already exists
                // under the deterministic name. Recover it by exact match.
                info!(identity, error = %e, "account creation failed, searching for existing");
                let target = panel_username(identity);
                let existing = self
                    .panel
                    .find_accounts(&target)
                    .await?
                    .into_iter()
                    .find(|a| a.username == target)
                    .ok_or(FulfillError::Unprovisionable(identity))?;
                info!(identity, uuid = %existing.uuid, "existing account relinked");
                Ok(existing.uuid)
            }
        }
    }
}

/// Expiry stacking: extend from the current expiry when the account is still
/// active, from now when it is expired or unset. A renewal bought early must
/// not shorten coverage; one bought late must not backdate into the lapse.
pub fn stacked_expiry(
    now: DateTime<Utc>,
    current: Option<DateTime<Utc>>,
    days: i64,
) -> DateTime<Utc> {
    let base = match current {
        Some(ts) if ts > now => ts,
        _ => now,
    };
    base + Duration::days(days)
}

/// Traffic stacking: purchases add to the remaining limit, never reset it.
pub fn stacked_traffic(current: Option<i64>, add_gb: i64) -> i64 {
    current.unwrap_or(0) + add_gb * GIB
}

fn build_patch(
    snapshot: &RemoteAccount,
    tariff: &Tariff,
    settings: &FulfillmentSettings,
    now: DateTime<Utc>,
) -> AccountPatch {
    // Trials take their size from the settings snapshot, not the tariff row.
    let (traffic_gb, duration_days) = if tariff.is_trial {
        (Some(settings.trial_traffic_gb), settings.trial_days)
    } else {
        (tariff.traffic_limit_gb, i64::from(tariff.duration_days))
    };

    let mut patch = AccountPatch {
        uuid: snapshot.uuid.clone(),
        on_hold: Some(false),
        ..AccountPatch::default()
    };

    if tariff.is_trial {
        let mut tags = snapshot.tags();
        if tags.insert(TRIAL_MARKER) {
            patch.tag = Some(tags.serialize());
        }
    }

    if let Some(gb) = traffic_gb.filter(|gb| *gb > 0) {
        patch.traffic_limit_bytes = Some(stacked_traffic(snapshot.traffic_limit_bytes, gb));
        patch.traffic_limit_strategy = Some("NO_RESET".to_string());
    }

    if duration_days > 0 {
        patch.expire_at = Some(format_expire_at(stacked_expiry(
            now,
            snapshot.expire_at,
            duration_days,
        )));
    }

    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(
        tag: Option<&str>,
        traffic_limit_bytes: Option<i64>,
        expire_at: Option<DateTime<Utc>>,
    ) -> RemoteAccount {
        RemoteAccount {
            uuid: "u-1".into(),
            username: "tg_1".into(),
            telegram_id: Some(1),
            tag: tag.map(|t| t.to_string()),
            traffic_limit_bytes,
            traffic_used_bytes: None,
            expire_at,
            subscription_url: None,
        }
    }

    fn paid_tariff(days: i32, gb: Option<i64>) -> Tariff {
        Tariff {
            id: 1,
            name: "Monthly".into(),
            description: None,
            price_rub: Some(10_000),
            price_stars: None,
            price_usd: None,
            duration_days: days,
            traffic_limit_gb: gb,
            is_trial: false,
            is_active: true,
        }
    }

    #[test]
    fn expiry_stacks_on_active_account() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let current = Some(now + Duration::days(5));
        assert_eq!(stacked_expiry(now, current, 10), now + Duration::days(15));
    }

    #[test]
    fn expiry_restarts_from_now_when_expired() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let current = Some(now - Duration::days(5));
        assert_eq!(stacked_expiry(now, current, 10), now + Duration::days(10));
    }

    #[test]
    fn expiry_restarts_from_now_when_unset() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(stacked_expiry(now, None, 10), now + Duration::days(10));
    }

    #[test]
    fn traffic_adds_to_current_limit() {
        assert_eq!(stacked_traffic(Some(5 * GIB), 10), 15 * GIB);
        assert_eq!(stacked_traffic(None, 10), 10 * GIB);
    }

    #[test]
    fn patch_for_paid_tariff_skips_tags() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let snap = snapshot(Some("VIP"), Some(GIB), None);
        let patch = build_patch(&snap, &paid_tariff(30, Some(10)), &FulfillmentSettings::default(), now);
        assert_eq!(patch.tag, None);
        assert_eq!(patch.traffic_limit_bytes, Some(11 * GIB));
        assert_eq!(patch.traffic_limit_strategy.as_deref(), Some("NO_RESET"));
        assert_eq!(patch.on_hold, Some(false));
        assert!(patch.expire_at.is_some());
    }

    #[test]
    fn patch_for_trial_uses_settings_and_appends_marker() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut tariff = paid_tariff(0, None);
        tariff.is_trial = true;
        let settings = FulfillmentSettings {
            trial_days: 3,
            trial_traffic_gb: 100,
            trial_group_id: None,
        };
        let snap = snapshot(Some("VIP"), None, None);
        let patch = build_patch(&snap, &tariff, &settings, now);
        assert_eq!(patch.tag.as_deref(), Some("VIP,TRIAL_YES"));
        assert_eq!(patch.traffic_limit_bytes, Some(100 * GIB));
        assert_eq!(
            patch.expire_at.as_deref(),
            Some("2025-01-04T00:00:00.000Z")
        );
    }

    #[test]
    fn zero_duration_tariff_leaves_expiry_alone() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let snap = snapshot(None, None, Some(now + Duration::days(2)));
        let patch = build_patch(&snap, &paid_tariff(0, Some(5)), &FulfillmentSettings::default(), now);
        assert_eq!(patch.expire_at, None);
        assert_eq!(patch.traffic_limit_bytes, Some(5 * GIB));
    }

    #[test]
    fn unlimited_tariff_leaves_traffic_alone() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let snap = snapshot(None, Some(GIB), None);
        let patch = build_patch(&snap, &paid_tariff(30, None), &FulfillmentSettings::default(), now);
        assert_eq!(patch.traffic_limit_bytes, None);
        assert_eq!(patch.traffic_limit_strategy, None);
    }
}
