use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp shape the panel expects: ISO-8601 UTC, millisecond precision,
/// literal `Z` suffix.
pub fn format_expire_at(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Non-authoritative view of a panel account. The panel owns this data; a
/// fetched value is only trusted within the single fulfillment call that
/// fetched it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAccount {
    #[serde(alias = "id")]
    pub uuid: String,
    pub username: String,
    #[serde(default)]
    pub telegram_id: Option<i64>,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub traffic_limit_bytes: Option<i64>,
    #[serde(default)]
    pub traffic_used_bytes: Option<i64>,
    #[serde(default)]
    pub expire_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub subscription_url: Option<String>,
}

impl RemoteAccount {
    pub fn tags(&self) -> TagSet {
        TagSet::parse(self.tag.as_deref())
    }
}

/// Partial update for `PATCH users`. The panel wants the account id in the
/// body, not the path; absent fields are left untouched remotely.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPatch {
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_limit_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traffic_limit_strategy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expire_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_hold: Option<bool>,
}

/// The panel's `tag` field is a free-text comma-joined marker list. Parsing it
/// into a set at the boundary keeps marker handling from ever degenerating
/// into string concatenation (duplicate or garbled markers).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet {
    markers: Vec<String>,
}

impl TagSet {
    pub fn parse(raw: Option<&str>) -> Self {
        let mut set = TagSet::default();
        for part in raw.unwrap_or_default().split(',') {
            let marker = part.trim();
            if !marker.is_empty() {
                set.insert(marker);
            }
        }
        set
    }

    pub fn contains(&self, marker: &str) -> bool {
        self.markers.iter().any(|m| m == marker)
    }

    pub fn insert(&mut self, marker: &str) -> bool {
        if self.contains(marker) {
            return false;
        }
        self.markers.push(marker.to_string());
        true
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn serialize(&self) -> String {
        self.markers.join(",")
    }
}

/// Peel `{"response": ...}` wrappers off a single-object payload. Applied to
/// every success body before deserialization; some panel deployments wrap,
/// some do not.
pub fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("response") {
            Some(inner) => unwrap_envelope(inner),
            None => Value::Object(map),
        },
        other => other,
    }
}

fn candidate_array(value: &Value) -> Option<&Vec<Value>> {
    match value {
        Value::Array(arr) => Some(arr),
        Value::Object(map) => ["users", "data", "items", "response"]
            .iter()
            .filter_map(|key| map.get(*key))
            .find_map(candidate_array),
        _ => None,
    }
}

/// Normalize a list payload into accounts, whatever envelope the deployed
/// panel version uses: a bare array, or an array nested one or two levels
/// under `users` / `data` / `items` / `response`. Candidates that do not
/// deserialize as accounts are dropped rather than failing the whole list.
pub fn account_list(value: &Value) -> Vec<RemoteAccount> {
    let Some(arr) = candidate_array(value) else {
        return Vec::new();
    };
    arr.iter()
        .filter_map(|v| serde_json::from_value(v.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn account_json(username: &str) -> Value {
        json!({ "uuid": format!("u-{username}"), "username": username })
    }

    #[test]
    fn normalizes_every_known_envelope_shape() {
        let expected = vec!["alice", "bob"];
        let shapes = vec![
            json!([account_json("alice"), account_json("bob")]),
            json!({ "users": [account_json("alice"), account_json("bob")] }),
            json!({ "data": [account_json("alice"), account_json("bob")] }),
            json!({ "items": [account_json("alice"), account_json("bob")] }),
            json!({ "response": { "users": [account_json("alice"), account_json("bob")] } }),
        ];
        for shape in shapes {
            let names: Vec<String> = account_list(&shape)
                .into_iter()
                .map(|a| a.username)
                .collect();
            assert_eq!(names, expected, "shape: {shape}");
        }
    }

    #[test]
    fn unknown_envelope_yields_empty_list() {
        assert!(account_list(&json!({ "weird": [account_json("alice")] })).is_empty());
        assert!(account_list(&json!("nope")).is_empty());
    }

    #[test]
    fn unwrap_envelope_peels_nested_response() {
        let wrapped = json!({ "response": { "response": { "uuid": "x", "username": "y" } } });
        assert_eq!(
            unwrap_envelope(wrapped),
            json!({ "uuid": "x", "username": "y" })
        );
    }

    #[test]
    fn account_accepts_id_alias() {
        let acc: RemoteAccount =
            serde_json::from_value(json!({ "id": "abc", "username": "tg_7" })).unwrap();
        assert_eq!(acc.uuid, "abc");
    }

    #[test]
    fn tag_set_round_trip_preserves_unrelated_markers() {
        let mut tags = TagSet::parse(Some("VIP, PROMO_2024"));
        assert!(tags.insert("TRIAL_YES"));
        assert!(!tags.insert("TRIAL_YES"));
        assert_eq!(tags.serialize(), "VIP,PROMO_2024,TRIAL_YES");
    }

    #[test]
    fn tag_set_parses_empty_and_whitespace() {
        assert!(TagSet::parse(None).is_empty());
        assert!(TagSet::parse(Some("  , ,")).is_empty());
    }

    #[test]
    fn expire_at_format_has_millis_and_z() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 45).unwrap();
        assert_eq!(format_expire_at(ts), "2025-03-01T12:30:45.000Z");
    }
}
