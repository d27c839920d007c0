//! Typed payloads for the finance collections

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CollectionKey, Record, RecordId, Settings};
use crate::error::{Error, Result};

/// A typed view over a collection's record payload.
pub trait Payload: Serialize + DeserializeOwned {
    /// Collection this payload type lives in
    const COLLECTION: CollectionKey;

    /// Decode a record's payload
    fn from_record(record: &Record) -> Result<Self> {
        serde_json::from_value(record.payload.clone()).map_err(|error| Error::MalformedRecord {
            collection: Self::COLLECTION,
            reason: format!("record '{}': {error}", record.id),
        })
    }

    /// Encode into a record stamped with `updated_at`
    fn into_record(self, id: RecordId, updated_at: i64) -> Result<Record> {
        Ok(Record {
            id,
            updated_at: Some(updated_at),
            payload: serde_json::to_value(self)?,
        })
    }
}

/// Validate a raw payload against the collection's typed shape
pub fn validate_payload(collection: CollectionKey, record: &Record) -> Result<()> {
    if !record.payload.is_object() {
        return Err(Error::MalformedRecord {
            collection,
            reason: format!("payload of '{}' is not an object", record.id),
        });
    }

    match collection {
        CollectionKey::Transactions => Transaction::from_record(record).map(drop),
        CollectionKey::Accounts => Account::from_record(record).map(drop),
        CollectionKey::Investments => Investment::from_record(record).map(drop),
        CollectionKey::Goals => Goal::from_record(record).map(drop),
        CollectionKey::Settings => Settings::from_record(record).map(drop),
    }
}

/// A ledger entry. Amounts are signed minor units (cents).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub account_id: String,
    pub amount_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Calendar date of the transaction (`YYYY-MM-DD`)
    pub occurred_on: chrono::NaiveDate,
    /// Deletions are payload state so they merge like any other edit
    #[serde(default)]
    pub deleted: bool,
}

impl Payload for Transaction {
    const COLLECTION: CollectionKey = CollectionKey::Transactions;
}

/// Kind of account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Checking,
    Savings,
    Credit,
    Cash,
    Brokerage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    pub kind: AccountKind,
    pub currency: String,
    pub balance_cents: i64,
    #[serde(default)]
    pub archived: bool,
}

impl Payload for Account {
    const COLLECTION: CollectionKey = CollectionKey::Accounts;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Investment {
    pub account_id: String,
    pub symbol: String,
    pub units: f64,
    pub cost_basis_cents: i64,
    /// Last quoted price; derived and volatile
    #[serde(default)]
    pub last_price_cents: Option<i64>,
    #[serde(default)]
    pub deleted: bool,
}

impl Payload for Investment {
    const COLLECTION: CollectionKey = CollectionKey::Investments;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub name: String,
    pub target_cents: i64,
    #[serde(default)]
    pub saved_cents: i64,
    #[serde(default)]
    pub due_on: Option<chrono::NaiveDate>,
    #[serde(default)]
    pub deleted: bool,
}

impl Goal {
    /// Progress towards the target, clamped to `0.0..=1.0`
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self) -> f64 {
        if self.target_cents <= 0 {
            return 1.0;
        }
        (self.saved_cents as f64 / self.target_cents as f64).clamp(0.0, 1.0)
    }
}

impl Payload for Goal {
    const COLLECTION: CollectionKey = CollectionKey::Goals;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transaction_roundtrip_through_record() {
        let tx = Transaction {
            account_id: "acc-1".to_string(),
            amount_cents: -1_250,
            currency: "EUR".to_string(),
            category: Some("groceries".to_string()),
            description: "Market".to_string(),
            occurred_on: chrono::NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            deleted: false,
        };

        let record = tx.clone().into_record("tx-1".into(), 100).unwrap();
        assert_eq!(record.payload["occurred_on"], "2024-03-09");
        assert_eq!(Transaction::from_record(&record).unwrap(), tx);
    }

    #[test]
    fn validate_payload_reports_missing_fields() {
        let record = Record::with_id("acc-1", 1, json!({"name": "Wallet"}));
        let error = validate_payload(CollectionKey::Accounts, &record).unwrap_err();
        assert!(matches!(
            error,
            Error::MalformedRecord {
                collection: CollectionKey::Accounts,
                ..
            }
        ));
    }

    #[test]
    fn validate_payload_accepts_minimal_goal() {
        let record = Record::with_id("g-1", 1, json!({"name": "Bike", "target_cents": 50000}));
        assert!(validate_payload(CollectionKey::Goals, &record).is_ok());
    }

    #[test]
    fn goal_progress_is_clamped() {
        let goal = Goal {
            name: "Trip".to_string(),
            target_cents: 1_000,
            saved_cents: 2_500,
            due_on: None,
            deleted: false,
        };
        assert!((goal.progress() - 1.0).abs() < f64::EPSILON);
    }
}
