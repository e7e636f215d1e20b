//! Fulfillment and remote-reconciliation engine.
//!
//! The local order ledger and the external subscription panel drift apart:
//! panel accounts are created and deleted by operators, tags are edited by
//! hand, and the panel API wraps its responses in whatever envelope the
//! deployed version feels like. This crate owns the machinery that keeps the
//! two sides consistent — a typed panel client, account discovery, the trial
//! gate, and the idempotent order fulfillment state machine.

pub mod discovery;
pub mod fulfillment;
pub mod ledger;
pub mod panel;
pub mod trial;

pub use discovery::{Discovered, discover, panel_username};
pub use fulfillment::{FulfillmentEngine, FulfillmentSettings};
pub use ledger::{Ledger, PgLedger};
pub use panel::client::{PanelApi, PanelClient, PanelError};
pub use panel::types::{AccountPatch, RemoteAccount, TagSet};
pub use trial::{TRIAL_MARKER, trial_available, trial_permitted};
