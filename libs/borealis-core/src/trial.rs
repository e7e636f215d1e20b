use tracing::debug;

use crate::discovery::panel_username;
use crate::panel::client::{PanelApi, PanelError};
use crate::panel::types::RemoteAccount;

/// Tag marker the panel carries once an identity has consumed its trial. The
/// panel, not the local ledger, is the durable witness: local `is_trial_used`
/// is only a hint that can be stale or bypassed by manual panel edits.
pub const TRIAL_MARKER: &str = "TRIAL_YES";

pub fn trial_available(account: &RemoteAccount) -> bool {
    !account.tags().contains(TRIAL_MARKER)
}

/// Remote-first trial eligibility check, used as the fast path before a trial
/// order is even created. Resolution order: the cached account id if it still
/// resolves, else an exact-username search. No resolvable account at all means
/// the trial is permitted — remote absence is authoritative even when the
/// local flag claims the trial was used (deleting the panel account resets
/// eligibility, an accepted tradeoff). Transport errors propagate so the
/// caller can fail closed.
pub async fn trial_permitted(
    panel: &dyn PanelApi,
    identity: i64,
    cached_uuid: Option<&str>,
) -> Result<bool, PanelError> {
    let mut account = None;

    if let Some(uuid) = cached_uuid {
        match panel.get_account(uuid).await {
            Ok(found) => account = Some(found),
            Err(PanelError::NotFound(_)) => {
                debug!(identity, uuid, "cached panel id stale during trial check");
            }
            Err(e) => return Err(e),
        }
    }

    if account.is_none() {
        let target = panel_username(identity);
        account = panel
            .find_accounts(&target)
            .await?
            .into_iter()
            .find(|a| a.username == target);
    }

    Ok(account.map(|a| trial_available(&a)).unwrap_or(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account_with_tag(tag: Option<&str>) -> RemoteAccount {
        RemoteAccount {
            uuid: "u-1".into(),
            username: "tg_1".into(),
            telegram_id: Some(1),
            tag: tag.map(|t| t.to_string()),
            traffic_limit_bytes: None,
            traffic_used_bytes: None,
            expire_at: None,
            subscription_url: None,
        }
    }

    #[test]
    fn marker_blocks_trial() {
        assert!(!trial_available(&account_with_tag(Some("VIP,TRIAL_YES"))));
    }

    #[test]
    fn unrelated_tags_do_not_block() {
        assert!(trial_available(&account_with_tag(Some("VIP"))));
        assert!(trial_available(&account_with_tag(None)));
    }
}
