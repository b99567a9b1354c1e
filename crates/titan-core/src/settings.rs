//! # Sync Settings
//!
//! Process-wide tunables of the engine. The coordinator owns the live copy and
//! mutates it only through [`SyncSettings::apply`], so every change goes through
//! the same validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::validation::validate_sync_interval;
use crate::DEFAULT_SYNC_INTERVAL_MS;

/// Live engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SyncSettings {
    /// Master switch. When false every cycle is a no-op success.
    pub enabled: bool,
    /// Push stock deltas when a sale completes.
    pub auto_update_on_sale: bool,
    /// Period of the automatic product cycle, in milliseconds.
    #[serde(rename = "syncInterval", alias = "syncIntervalMs")]
    #[ts(type = "number")]
    pub sync_interval_ms: u64,
    /// Completion time of the last cycle that reached the inventory system.
    #[ts(as = "Option<String>")]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            enabled: true,
            auto_update_on_sale: true,
            sync_interval_ms: DEFAULT_SYNC_INTERVAL_MS,
            last_sync: None,
        }
    }
}

impl SyncSettings {
    /// Validates `setting` and applies it. On error nothing changes.
    pub fn apply(&mut self, setting: &SyncSetting) -> CoreResult<()> {
        match *setting {
            SyncSetting::Enabled(on) => self.enabled = on,
            SyncSetting::AutoUpdateOnSale(on) => self.auto_update_on_sale = on,
            SyncSetting::SyncInterval(ms) => self.sync_interval_ms = validate_sync_interval(ms)?,
        }
        Ok(())
    }
}

/// One recognized setting together with its typed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "key", content = "value", rename_all = "camelCase")]
pub enum SyncSetting {
    Enabled(bool),
    AutoUpdateOnSale(bool),
    /// Milliseconds. Signed so that non-positive input reaches validation.
    SyncInterval(i64),
}

impl SyncSetting {
    /// Parses the loose `{key, value}` pair used by `updateSyncSetting`.
    ///
    /// Accepts camelCase and snake_case keys, plus `syncIntervalMs`.
    pub fn parse(key: &str, value: &Value) -> CoreResult<Self> {
        let expect_bool = |v: &Value| {
            v.as_bool().ok_or_else(|| CoreError::InvalidSettingValue {
                key: key.to_string(),
                expected: "boolean",
            })
        };

        match key {
            "enabled" | "syncEnabled" | "sync_enabled" => Ok(SyncSetting::Enabled(expect_bool(value)?)),
            "autoUpdateOnSale" | "auto_update_on_sale" => {
                Ok(SyncSetting::AutoUpdateOnSale(expect_bool(value)?))
            }
            "syncInterval" | "syncIntervalMs" | "sync_interval" | "sync_interval_ms" => value
                .as_i64()
                .map(SyncSetting::SyncInterval)
                .ok_or_else(|| CoreError::InvalidSettingValue {
                    key: key.to_string(),
                    expected: "integer (milliseconds)",
                }),
            other => Err(CoreError::UnknownSetting {
                key: other.to_string(),
            }),
        }
    }

    /// Canonical key, as published in `config_updated`.
    pub fn key(&self) -> &'static str {
        match self {
            SyncSetting::Enabled(_) => "enabled",
            SyncSetting::AutoUpdateOnSale(_) => "autoUpdateOnSale",
            SyncSetting::SyncInterval(_) => "syncInterval",
        }
    }

    pub fn value(&self) -> Value {
        match *self {
            SyncSetting::Enabled(on) | SyncSetting::AutoUpdateOnSale(on) => Value::Bool(on),
            SyncSetting::SyncInterval(ms) => Value::from(ms),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = SyncSettings::default();
        assert!(settings.enabled);
        assert!(settings.auto_update_on_sale);
        assert_eq!(settings.sync_interval_ms, 300_000);
        assert!(settings.last_sync.is_none());
    }

    #[test]
    fn test_apply_keeps_previous_value_on_error() {
        let mut settings = SyncSettings::default();

        settings.apply(&SyncSetting::SyncInterval(60_000)).unwrap();
        assert_eq!(settings.sync_interval_ms, 60_000);

        assert!(settings.apply(&SyncSetting::SyncInterval(0)).is_err());
        assert!(settings.apply(&SyncSetting::SyncInterval(-5)).is_err());
        assert_eq!(settings.sync_interval_ms, 60_000);

        // Tiny but positive values are stored as given
        settings.apply(&SyncSetting::SyncInterval(1)).unwrap();
        assert_eq!(settings.sync_interval_ms, 1);
    }

    #[test]
    fn test_parse_keys() {
        assert_eq!(
            SyncSetting::parse("autoUpdateOnSale", &json!(false)).unwrap(),
            SyncSetting::AutoUpdateOnSale(false)
        );
        assert_eq!(
            SyncSetting::parse("sync_interval_ms", &json!(1000)).unwrap(),
            SyncSetting::SyncInterval(1000)
        );
        assert!(matches!(
            SyncSetting::parse("enabled", &json!("yes")),
            Err(CoreError::InvalidSettingValue { .. })
        ));
        assert!(matches!(
            SyncSetting::parse("colour", &json!(1)),
            Err(CoreError::UnknownSetting { .. })
        ));
    }

    #[test]
    fn test_settings_wire_names() {
        let settings = SyncSettings {
            sync_interval_ms: 12_345,
            ..SyncSettings::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["syncInterval"], 12_345);
        assert!(json.get("syncIntervalMs").is_none());
        assert_eq!(json["autoUpdateOnSale"], true);

        let legacy: SyncSettings = serde_json::from_value(json!({
            "enabled": true,
            "autoUpdateOnSale": false,
            "syncIntervalMs": 9_000,
            "lastSync": null
        }))
        .unwrap();
        assert_eq!(legacy.sync_interval_ms, 9_000);
    }

    #[test]
    fn test_tagged_json() {
        let setting: SyncSetting =
            serde_json::from_value(json!({"key": "syncInterval", "value": 5000})).unwrap();
        assert_eq!(setting, SyncSetting::SyncInterval(5000));
        assert_eq!(setting.key(), "syncInterval");
        assert_eq!(setting.value(), json!(5000));
    }
}
