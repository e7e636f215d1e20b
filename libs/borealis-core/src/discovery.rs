use crate::panel::client::{PanelApi, PanelError};
use crate::panel::types::RemoteAccount;

/// Deterministic panel username for a Telegram identity.
pub fn panel_username(identity: i64) -> String {
    format!("tg_{identity}")
}

/// Panel accounts resolved for one identity. `canonical` is the account the
/// bot itself would provision (deterministic username); `foreign` accounts
/// were linked to the identity some other way, typically provisioned by an
/// operator by hand. Foreign ordering is whatever the panel search returned
/// and is not guaranteed stable.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    pub canonical: Option<RemoteAccount>,
    pub foreign: Vec<RemoteAccount>,
}

impl Discovered {
    pub fn is_empty(&self) -> bool {
        self.canonical.is_none() && self.foreign.is_empty()
    }

    /// Best account to show the user: canonical first, else first foreign.
    pub fn primary(&self) -> Option<&RemoteAccount> {
        self.canonical.as_ref().or_else(|| self.foreign.first())
    }
}

/// Classify fuzzy-search candidates. The panel search over-matches on
/// substrings, so a candidate is accepted only on an exact `telegramId` match
/// or an exact deterministic-username match.
pub fn classify(identity: i64, candidates: Vec<RemoteAccount>) -> Discovered {
    let target = panel_username(identity);
    let mut discovered = Discovered::default();

    for candidate in candidates {
        let id_match = candidate.telegram_id == Some(identity);
        let name_match = candidate.username == target;
        if !id_match && !name_match {
            continue;
        }
        if name_match && discovered.canonical.is_none() {
            discovered.canonical = Some(candidate);
        } else {
            discovered.foreign.push(candidate);
        }
    }

    discovered
}

/// Resolve the panel accounts for an identity via the fuzzy search endpoint.
pub async fn discover(panel: &dyn PanelApi, identity: i64) -> Result<Discovered, PanelError> {
    let candidates = panel.find_accounts(&identity.to_string()).await?;
    Ok(classify(identity, candidates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(username: &str, telegram_id: Option<i64>) -> RemoteAccount {
        RemoteAccount {
            uuid: format!("u-{username}"),
            username: username.to_string(),
            telegram_id,
            tag: None,
            traffic_limit_bytes: None,
            traffic_used_bytes: None,
            expire_at: None,
            subscription_url: None,
        }
    }

    #[test]
    fn classifies_canonical_and_foreign_and_drops_strangers() {
        let candidates = vec![
            account("tg_42", Some(42)),
            account("bob", Some(42)),
            account("tg_99", Some(99)),
        ];
        let discovered = classify(42, candidates);
        assert_eq!(discovered.canonical.as_ref().unwrap().username, "tg_42");
        assert_eq!(discovered.foreign.len(), 1);
        assert_eq!(discovered.foreign[0].username, "bob");
    }

    #[test]
    fn canonical_username_wins_without_telegram_id() {
        // Accounts provisioned before the panel stored telegram ids.
        let discovered = classify(42, vec![account("tg_42", None)]);
        assert_eq!(discovered.canonical.as_ref().unwrap().username, "tg_42");
        assert!(discovered.foreign.is_empty());
    }

    #[test]
    fn substring_overmatch_is_rejected() {
        // Searching "42" fuzzily also returns tg_420 and tg_142.
        let candidates = vec![account("tg_420", Some(420)), account("tg_142", Some(142))];
        assert!(classify(42, candidates).is_empty());
    }
}
