//! Serialized shapes shared by the engine's storage boundary and any outer
//! layer (CLI, future API) that reads what the engine writes.
//!
//! Amounts are always signed integer **minor units** (cents).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod transaction {
    use super::*;

    /// One row of the pending-transactions file or of the closed history.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct TransactionRecord {
        /// Type-prefixed id (`tr0004`).
        pub id: String,
        /// Fingerprint of the settlement run that produced the transaction.
        pub event_id: Option<Uuid>,
        pub sender_id: String,
        pub receiver_id: String,
        /// Always > 0.
        pub amount: i64,
        pub time_created: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub time_closed: Option<DateTime<Utc>>,
        pub pending: bool,
    }
}

pub mod balance {
    use super::*;

    /// Sign of a participant's net balance.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "snake_case")]
    pub enum MemberStatus {
        Debitor,
        Creditor,
        SettledUp,
    }

    impl MemberStatus {
        pub fn as_str(self) -> &'static str {
            match self {
                Self::Debitor => "debitor",
                Self::Creditor => "creditor",
                Self::SettledUp => "settled_up",
            }
        }
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BalanceEntry {
        pub name: String,
        pub status: MemberStatus,
        pub balance: i64,
        pub settled: bool,
        pub spent_total: i64,
        /// Only present in list summaries. Values are decimal strings.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub sharing_weights: Option<BTreeMap<String, String>>,
    }

    /// `{participant_id: entry}`, ordered by id.
    pub type BalanceReport = BTreeMap<String, BalanceEntry>;
}
