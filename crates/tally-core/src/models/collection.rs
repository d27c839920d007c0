//! Collection keys

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// The independently reconciled record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKey {
    /// Ledger transactions
    Transactions,
    /// Bank, card and cash accounts
    Accounts,
    /// Investment holdings
    Investments,
    /// Savings goals
    Goals,
    /// User preferences
    Settings,
}

impl CollectionKey {
    /// Every collection, in scheduling order
    pub const ALL: [Self; 5] = [
        Self::Transactions,
        Self::Accounts,
        Self::Investments,
        Self::Goals,
        Self::Settings,
    ];

    /// Wire and storage name of the collection
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::Accounts => "accounts",
            Self::Investments => "investments",
            Self::Goals => "goals",
            Self::Settings => "settings",
        }
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollectionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown collection '{}'", s.trim())))
    }
}
