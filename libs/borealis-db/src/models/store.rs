use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Local account link for a Telegram identity. `remote_uuid` is the cached
/// panel account id and may go stale when the panel is edited out-of-band;
/// `is_trial_used` is an advisory fast-path hint only, the panel tag is the
/// authoritative record of trial consumption.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64, // Telegram ID
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub remote_uuid: Option<String>,
    pub balance: i64,
    pub is_trial_used: bool,
    pub created_at: DateTime<Utc>,
}

/// Purchasable plan. Prices are minor units per rail (kopeks / stars / cents);
/// a NULL price means the rail is not offered for this tariff.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tariff {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price_rub: Option<i64>,
    pub price_stars: Option<i64>,
    pub price_usd: Option<i64>,
    pub duration_days: i32,
    pub traffic_limit_gb: Option<i64>, // None = unlimited
    pub is_trial: bool,
    pub is_active: bool,
}

impl Tariff {
    pub fn price_for(&self, rail: PaymentRail) -> Option<i64> {
        match rail {
            PaymentRail::Rub => self.price_rub,
            PaymentRail::Stars => self.price_stars,
            PaymentRail::Usd => self.price_usd,
            PaymentRail::Manual => Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "canceled" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentRail {
    Rub,
    Stars,
    Usd,
    Manual,
}

impl PaymentRail {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRail::Rub => "rub",
            PaymentRail::Stars => "stars",
            PaymentRail::Usd => "usd",
            PaymentRail::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rub" => Some(PaymentRail::Rub),
            "stars" => Some(PaymentRail::Stars),
            "usd" => Some(PaymentRail::Usd),
            "manual" => Some(PaymentRail::Manual),
            _ => None,
        }
    }
}

/// Purchase intent. Status only ever moves pending -> paid or
/// pending -> canceled; rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub tariff_id: i64,
    pub amount: i64, // minor units of the rail
    pub rail: PaymentRail,
    pub invoice_id: Option<String>,
    pub promocode: Option<String>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Promocode {
    pub code: String,
    pub is_percent: bool, // true = %, false = fixed minor units
    pub value: i64,
    pub max_uses: i32, // 0 = unlimited
    pub used_count: i32,
    pub active_until: Option<DateTime<Utc>>,
}

impl Promocode {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.active_until {
            if until < now {
                return false;
            }
        }
        self.max_uses == 0 || self.used_count < self.max_uses
    }

    /// Discounted amount, floored at zero.
    pub fn apply(&self, amount: i64) -> i64 {
        let discounted = if self.is_percent {
            amount - amount * self.value / 100
        } else {
            amount - self.value
        };
        discounted.max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Setting {
    pub key: String,
    pub value: String,
}
