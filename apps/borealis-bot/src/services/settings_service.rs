use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use borealis_core::FulfillmentSettings;
use borealis_db::repositories::SettingsRepository;

pub const TRIAL_DAYS_KEY: &str = "trial_days";
pub const TRIAL_TRAFFIC_KEY: &str = "trial_traffic_gb";
pub const TRIAL_GROUP_KEY: &str = "trial_group_id";
pub const SUPPORT_CONTACT_KEY: &str = "support_contact";

#[derive(Clone)]
pub struct SettingsService {
    repo: SettingsRepository,
    cache: Arc<RwLock<HashMap<String, String>>>,
}

impl SettingsService {
    pub fn new(repo: SettingsRepository) -> Self {
        Self {
            repo,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let cache = self.cache.read().await;
        if let Some(val) = cache.get(key) {
            return Some(val.clone());
        }
        drop(cache);

        match self.repo.get(key).await {
            Ok(Some(val)) => {
                let mut cache = self.cache.write().await;
                cache.insert(key.to_string(), val.clone());
                Some(val)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "settings lookup failed");
                None
            }
        }
    }

    pub async fn get_or_default(&self, key: &str, default: &str) -> String {
        self.get(key).await.unwrap_or_else(|| default.to_string())
    }

    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.repo.set(key, value).await?;
        let mut cache = self.cache.write().await;
        cache.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// One consistent snapshot of the trial knobs, handed to each fulfillment
    /// call so a mid-call settings edit cannot produce a mixed view.
    pub async fn trial_settings(&self) -> FulfillmentSettings {
        let defaults = FulfillmentSettings::default();
        FulfillmentSettings {
            trial_days: self
                .get(TRIAL_DAYS_KEY)
                .await
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trial_days),
            trial_traffic_gb: self
                .get(TRIAL_TRAFFIC_KEY)
                .await
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.trial_traffic_gb),
            trial_group_id: self.get(TRIAL_GROUP_KEY).await.filter(|v| !v.is_empty()),
        }
    }
}
