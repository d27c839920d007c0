//! Application settings model

use serde::{Deserialize, Serialize};

use super::{CollectionKey, Payload, RecordId};

/// Theme mode options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemeMode {
    /// Light theme
    Light,
    /// Dark theme
    Dark,
    /// Follow system preference
    #[default]
    System,
}

/// User preferences, synced as a single record of the settings collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// ISO 4217 code used when a transaction does not specify one
    pub default_currency: String,
    /// Theme mode
    pub theme: ThemeMode,
    /// First day of the budgeting month (1-28)
    pub month_start_day: u8,
    /// Hide balances on the dashboard until revealed
    pub privacy_mode: bool,
}

impl Settings {
    /// Id of the single settings record
    pub const RECORD_ID: &'static str = "user-settings";

    pub fn record_id() -> RecordId {
        RecordId::from(Self::RECORD_ID)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            theme: ThemeMode::System,
            month_start_day: 1,
            privacy_mode: false,
        }
    }
}

impl Payload for Settings {
    const COLLECTION: CollectionKey = CollectionKey::Settings;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use serde_json::json;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.month_start_day, 1);
        assert_eq!(settings.theme, ThemeMode::System);
    }

    #[test]
    fn test_partial_settings_payload_uses_defaults() {
        let record = Record::with_id(Settings::RECORD_ID, 1, json!({"theme": "dark"}));
        let settings = Settings::from_record(&record).unwrap();
        assert_eq!(settings.theme, ThemeMode::Dark);
        assert_eq!(settings.default_currency, "USD");
    }
}
