use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, error};

use crate::discovery::panel_username;
use crate::panel::types::{AccountPatch, RemoteAccount, account_list, format_expire_at, unwrap_envelope};

#[derive(Error, Debug)]
pub enum PanelError {
    /// 404 on an account lookup. Expected in normal operation: it means a
    /// locally cached account id went stale, which callers self-heal from.
    #[error("account not found: {0}")]
    NotFound(String),
    #[error("panel request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("panel API error: status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("unexpected panel payload: {0}")]
    Decode(String),
}

impl PanelError {
    /// Transport failures and 5xx responses are worth retrying the whole
    /// fulfillment call for; 4xx responses are not.
    pub fn is_transient(&self) -> bool {
        match self {
            PanelError::Request(_) => true,
            PanelError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Seam between the engine and the panel's REST API. Production uses
/// [`PanelClient`]; tests swap in an in-memory panel.
#[async_trait]
pub trait PanelApi: Send + Sync {
    async fn find_accounts(&self, query: &str) -> Result<Vec<RemoteAccount>, PanelError>;
    async fn get_account(&self, uuid: &str) -> Result<RemoteAccount, PanelError>;
    async fn create_account(
        &self,
        identity: i64,
        display_name: &str,
    ) -> Result<RemoteAccount, PanelError>;
    async fn update_account(&self, patch: &AccountPatch) -> Result<RemoteAccount, PanelError>;
    async fn add_account_to_group(&self, uuid: &str, group_id: &str) -> Result<(), PanelError>;
}

#[derive(Clone)]
pub struct PanelClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl PanelClient {
    pub fn new(base_url: String, api_token: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    async fn request(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<Value, PanelError> {
        let url = format!("{}/api/{}", self.base_url, endpoint);
        let mut req = self
            .client
            .request(method.clone(), &url)
            .bearer_auth(&self.api_token);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let response = req.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 404 {
                // Stale-reference probe, not a failure; callers recover.
                debug!(%method, url, "panel returned 404");
                return Err(PanelError::NotFound(endpoint.to_string()));
            }
            error!(%method, url, status = status.as_u16(), body, "panel request failed");
            return Err(PanelError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payload: Value = response.json().await?;
        Ok(unwrap_envelope(payload))
    }

    fn decode_account(payload: Value) -> Result<RemoteAccount, PanelError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| PanelError::Decode(format!("{e}: {payload}")))
    }
}

#[async_trait]
impl PanelApi for PanelClient {
    /// `GET users?search=` is a fuzzy substring match on the panel side;
    /// callers must re-verify every candidate.
    async fn find_accounts(&self, query: &str) -> Result<Vec<RemoteAccount>, PanelError> {
        let payload = self
            .request(
                Method::GET,
                &format!("users?search={}", urlencoding::encode(query)),
                None,
            )
            .await?;
        Ok(account_list(&payload))
    }

    async fn get_account(&self, uuid: &str) -> Result<RemoteAccount, PanelError> {
        let payload = self
            .request(Method::GET, &format!("users/{uuid}"), None)
            .await?;
        Self::decode_account(payload)
    }

    async fn create_account(
        &self,
        identity: i64,
        display_name: &str,
    ) -> Result<RemoteAccount, PanelError> {
        let body = json!({
            "username": panel_username(identity),
            "telegramId": identity,
            "note": format!("User {display_name} ({identity})"),
            "status": "ACTIVE",
            // Created expired; fulfillment extends from now.
            "expireAt": format_expire_at(Utc::now()),
        });
        let payload = self.request(Method::POST, "users", Some(body)).await?;
        Self::decode_account(payload)
    }

    /// `PATCH users` with the uuid in the body, not the path.
    async fn update_account(&self, patch: &AccountPatch) -> Result<RemoteAccount, PanelError> {
        let body = serde_json::to_value(patch)
            .map_err(|e| PanelError::Decode(format!("patch serialization: {e}")))?;
        let payload = self.request(Method::PATCH, "users", Some(body)).await?;
        Self::decode_account(payload)
    }

    async fn add_account_to_group(&self, uuid: &str, group_id: &str) -> Result<(), PanelError> {
        self.request(
            Method::POST,
            &format!("internal-squads/{group_id}/bulk-actions/add-users"),
            Some(json!({ "users": [uuid] })),
        )
        .await?;
        Ok(())
    }
}
