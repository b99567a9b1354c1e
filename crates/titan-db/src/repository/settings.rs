//! # Settings Repository
//!
//! Persists [`SyncSettings`] as key/value rows in `sync_settings`.
//!
//! | key                   | value example                        |
//! |-----------------------|--------------------------------------|
//! | `enabled`             | `true`                               |
//! | `auto_update_on_sale` | `false`                              |
//! | `sync_interval_ms`    | `300000`                             |
//! | `last_sync`           | `2026-10-16T09:30:00.123456+00:00`   |

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::DbResult;
use titan_core::SyncSettings;

const KEY_ENABLED: &str = "enabled";
const KEY_AUTO_UPDATE_ON_SALE: &str = "auto_update_on_sale";
const KEY_SYNC_INTERVAL_MS: &str = "sync_interval_ms";
const KEY_LAST_SYNC: &str = "last_sync";

/// Repository for engine settings.
#[derive(Debug, Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        SettingsRepository { pool }
    }

    /// Whether settings have ever been written.
    pub async fn is_initialized(&self) -> DbResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_settings")
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    /// Loads stored settings on top of `defaults`.
    ///
    /// Missing keys keep the default. Unreadable values are logged and
    /// also keep the default.
    pub async fn load(&self, defaults: &SyncSettings) -> DbResult<SyncSettings> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT key, value FROM sync_settings")
            .fetch_all(&self.pool)
            .await?;

        let mut settings = defaults.clone();
        for (key, value) in rows {
            let parsed = match key.as_str() {
                KEY_ENABLED => value.parse().map(|v| settings.enabled = v).is_ok(),
                KEY_AUTO_UPDATE_ON_SALE => value
                    .parse()
                    .map(|v| settings.auto_update_on_sale = v)
                    .is_ok(),
                KEY_SYNC_INTERVAL_MS => value
                    .parse::<u64>()
                    .ok()
                    .filter(|ms| *ms > 0)
                    .map(|ms| settings.sync_interval_ms = ms)
                    .is_some(),
                KEY_LAST_SYNC => DateTime::parse_from_rfc3339(&value)
                    .map(|at| settings.last_sync = Some(at.with_timezone(&Utc)))
                    .is_ok(),
                _ => true,
            };

            if !parsed {
                warn!(key = %key, value = %value, "Ignoring unreadable sync setting");
            }
        }

        Ok(settings)
    }

    /// Writes every setting in one transaction.
    pub async fn save(&self, settings: &SyncSettings) -> DbResult<()> {
        let now = Utc::now();
        let mut rows = vec![
            (KEY_ENABLED, settings.enabled.to_string()),
            (
                KEY_AUTO_UPDATE_ON_SALE,
                settings.auto_update_on_sale.to_string(),
            ),
            (KEY_SYNC_INTERVAL_MS, settings.sync_interval_ms.to_string()),
        ];
        if let Some(at) = settings.last_sync {
            rows.push((KEY_LAST_SYNC, at.to_rfc3339()));
        }

        let mut tx = self.pool.begin().await?;
        for (key, value) in rows {
            upsert(&mut tx, key, &value, now).await?;
        }
        tx.commit().await?;

        debug!(
            enabled = settings.enabled,
            interval_ms = settings.sync_interval_ms,
            "Sync settings saved"
        );
        Ok(())
    }

    /// Records the completion time of the last cycle.
    pub async fn set_last_sync(&self, at: DateTime<Utc>) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        upsert(&mut conn, KEY_LAST_SYNC, &at.to_rfc3339(), Utc::now()).await
    }
}

async fn upsert(
    conn: &mut sqlx::SqliteConnection,
    key: &str,
    value: &str,
    now: DateTime<Utc>,
) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO sync_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(key)
    .bind(value)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn repo() -> SettingsRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().settings()
    }

    #[tokio::test]
    async fn test_load_without_rows_returns_defaults() {
        let repo = repo().await;
        assert!(!repo.is_initialized().await.unwrap());

        let settings = repo.load(&SyncSettings::default()).await.unwrap();
        assert_eq!(settings, SyncSettings::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let repo = repo().await;
        let settings = SyncSettings {
            enabled: false,
            auto_update_on_sale: false,
            sync_interval_ms: 42_000,
            last_sync: None,
        };
        repo.save(&settings).await.unwrap();
        assert!(repo.is_initialized().await.unwrap());

        let loaded = repo.load(&SyncSettings::default()).await.unwrap();
        assert_eq!(loaded, settings);

        let at = Utc::now();
        repo.set_last_sync(at).await.unwrap();
        let loaded = repo.load(&SyncSettings::default()).await.unwrap();
        assert_eq!(loaded.last_sync, Some(at));
    }

    #[tokio::test]
    async fn test_unreadable_value_keeps_default() {
        let repo = repo().await;
        sqlx::query(
            "INSERT INTO sync_settings (key, value, updated_at) VALUES ('sync_interval_ms', 'soon', 'x')",
        )
        .execute(&repo.pool)
        .await
        .unwrap();

        let loaded = repo.load(&SyncSettings::default()).await.unwrap();
        assert_eq!(loaded.sync_interval_ms, SyncSettings::default().sync_interval_ms);
    }
}
