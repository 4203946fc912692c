//! Per-user key-value preference storage
//!
//! Typed settings (audio preferences, anime detection, file extensions)
//! are serialized to JSON values under well-known keys; absent keys
//! resolve to defaults at read time.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::uuid_to_str;

pub struct PreferencesRepository {
    pool: SqlitePool,
}

impl PreferencesRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a raw preference value
    pub async fn get(&self, user_id: Uuid, key: &str) -> Result<Option<String>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT value FROM user_preferences WHERE user_id = ?1 AND key = ?2",
        )
        .bind(uuid_to_str(user_id))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(value)
    }

    /// Set a raw preference value, replacing any previous one
    pub async fn set(&self, user_id: Uuid, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_preferences (id, user_id, key, value)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(uuid_to_str(Uuid::new_v4()))
        .bind(uuid_to_str(user_id))
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get a typed preference, falling back to `T::default()` when the key
    /// is absent or the stored JSON no longer parses.
    pub async fn get_typed<T: DeserializeOwned + Default>(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<T> {
        match self.get(user_id, key).await? {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_default()),
            None => Ok(T::default()),
        }
    }

    /// Serialize and store a typed preference
    pub async fn set_typed<T: Serialize>(&self, user_id: Uuid, key: &str, value: &T) -> Result<()> {
        self.set(user_id, key, &serde_json::to_string(value)?).await
    }
}

/// Well-known preference keys
pub mod keys {
    pub const AUDIO_PREFERENCES: &str = "audio_preferences";
    pub const ANIME_DETECTION: &str = "anime_detection";
    pub const FILE_EXTENSIONS: &str = "file_extensions";
}
