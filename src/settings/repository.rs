//! Settings persistence
//!
//! Reads and writes the `ai_description` document in the shared settings
//! table (`setting_key` / `setting_json`).

use super::types::DescriberSettings;
use crate::error::Result;
use sqlx::mysql::MySqlPool;
use sqlx::Row;

const SETTING_KEY: &str = "ai_description";

/// Repository for the settings table
#[derive(Clone)]
pub struct SettingsRepository {
    pool: MySqlPool,
}

impl SettingsRepository {
    /// Create new repository
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Load settings, falling back to defaults when the key is absent
    pub async fn load(&self) -> Result<DescriberSettings> {
        let row = sqlx::query("SELECT setting_json FROM settings WHERE setting_key = ?")
            .bind(SETTING_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let json: String = row.get("setting_json");
                Ok(serde_json::from_str(&json)?)
            }
            None => {
                tracing::warn!(
                    setting_key = SETTING_KEY,
                    "Settings key not found, using defaults"
                );
                Ok(DescriberSettings::default())
            }
        }
    }

    /// Persist settings
    pub async fn save(&self, settings: &DescriberSettings) -> Result<()> {
        let json = serde_json::to_string(settings)?;

        sqlx::query(
            r#"INSERT INTO settings (setting_key, setting_json)
               VALUES (?, ?)
               ON DUPLICATE KEY UPDATE setting_json = VALUES(setting_json)"#,
        )
        .bind(SETTING_KEY)
        .bind(&json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
