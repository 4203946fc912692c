//! Scan locations database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::MediaKind;
use crate::db::sqlite_helpers::{
    datetime_to_str, str_to_datetime, str_to_datetime_opt, str_to_uuid, uuid_to_str,
};

/// Scan location record from database
#[derive(Debug, Clone)]
pub struct ScanLocationRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub path: String,
    pub label: String,
    pub media_kind: String,
    pub enabled: bool,
    pub last_scanned: Option<DateTime<Utc>>,
    pub file_count: i64,
    pub created_at: DateTime<Utc>,
}

impl ScanLocationRecord {
    /// Declared media kind, defaulting to TV for unknown stored values
    pub fn kind(&self) -> MediaKind {
        MediaKind::parse(&self.media_kind).unwrap_or(MediaKind::Tv)
    }
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ScanLocationRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let user_str: String = row.try_get("user_id")?;
        let scanned_str: Option<String> = row.try_get("last_scanned")?;
        let created_str: String = row.try_get("created_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            user_id: str_to_uuid(&user_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            path: row.try_get("path")?,
            label: row.try_get("label")?,
            media_kind: row.try_get("media_kind")?,
            enabled: row.try_get("enabled")?,
            last_scanned: str_to_datetime_opt(scanned_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            file_count: row.try_get("file_count")?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Input for creating a scan location
#[derive(Debug)]
pub struct CreateScanLocation {
    pub user_id: Uuid,
    pub path: String,
    pub label: String,
    pub media_kind: MediaKind,
    pub enabled: bool,
}

// ============================================================================
// Transaction-scoped operations used by the scan pipeline
// ============================================================================

/// Find a location by (user, path)
pub async fn find_by_path(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    path: &str,
) -> Result<Option<ScanLocationRecord>> {
    let record = sqlx::query_as::<_, ScanLocationRecord>(
        "SELECT * FROM scan_locations WHERE user_id = ?1 AND path = ?2",
    )
    .bind(uuid_to_str(user_id))
    .bind(path)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Stamp a completed sweep: last-scanned time and cached file count
pub async fn update_stats(
    conn: &mut SqliteConnection,
    location_id: Uuid,
    file_count: i64,
) -> Result<()> {
    sqlx::query("UPDATE scan_locations SET last_scanned = ?1, file_count = ?2 WHERE id = ?3")
        .bind(datetime_to_str(Utc::now()))
        .bind(file_count)
        .bind(uuid_to_str(location_id))
        .execute(conn)
        .await?;

    Ok(())
}

// ============================================================================
// Pool-backed repository used by the HTTP layer
// ============================================================================

pub struct ScanLocationRepository {
    pool: SqlitePool,
}

impl ScanLocationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all locations for a user ordered by label
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ScanLocationRecord>> {
        let records = sqlx::query_as::<_, ScanLocationRecord>(
            "SELECT * FROM scan_locations WHERE user_id = ?1 ORDER BY label",
        )
        .bind(uuid_to_str(user_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List enabled locations for a user
    pub async fn list_enabled(&self, user_id: Uuid) -> Result<Vec<ScanLocationRecord>> {
        let records = sqlx::query_as::<_, ScanLocationRecord>(
            "SELECT * FROM scan_locations WHERE user_id = ?1 AND enabled = 1 ORDER BY label",
        )
        .bind(uuid_to_str(user_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Get a location by id, scoped to its owner
    pub async fn get_by_id(
        &self,
        user_id: Uuid,
        location_id: Uuid,
    ) -> Result<Option<ScanLocationRecord>> {
        let record = sqlx::query_as::<_, ScanLocationRecord>(
            "SELECT * FROM scan_locations WHERE id = ?1 AND user_id = ?2",
        )
        .bind(uuid_to_str(location_id))
        .bind(uuid_to_str(user_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Find a location by (user, normalized path)
    pub async fn get_by_path(
        &self,
        user_id: Uuid,
        path: &str,
    ) -> Result<Option<ScanLocationRecord>> {
        let record = sqlx::query_as::<_, ScanLocationRecord>(
            "SELECT * FROM scan_locations WHERE user_id = ?1 AND path = ?2",
        )
        .bind(uuid_to_str(user_id))
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Create a new location
    pub async fn create(&self, input: CreateScanLocation) -> Result<ScanLocationRecord> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO scan_locations (id, user_id, path, label, media_kind, enabled, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(input.user_id))
        .bind(&input.path)
        .bind(&input.label)
        .bind(input.media_kind.as_str())
        .bind(input.enabled)
        .bind(datetime_to_str(Utc::now()))
        .execute(&self.pool)
        .await?;

        let record = sqlx::query_as::<_, ScanLocationRecord>(
            "SELECT * FROM scan_locations WHERE id = ?1",
        )
        .bind(uuid_to_str(id))
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    /// Update label / media kind / enabled flag
    pub async fn update(
        &self,
        user_id: Uuid,
        location_id: Uuid,
        label: Option<String>,
        media_kind: Option<MediaKind>,
        enabled: Option<bool>,
    ) -> Result<Option<ScanLocationRecord>> {
        sqlx::query(
            r#"
            UPDATE scan_locations
            SET label = COALESCE(?1, label),
                media_kind = COALESCE(?2, media_kind),
                enabled = COALESCE(?3, enabled)
            WHERE id = ?4 AND user_id = ?5
            "#,
        )
        .bind(&label)
        .bind(media_kind.map(|k| k.as_str().to_string()))
        .bind(enabled)
        .bind(uuid_to_str(location_id))
        .bind(uuid_to_str(user_id))
        .execute(&self.pool)
        .await?;

        self.get_by_id(user_id, location_id).await
    }

    /// Delete a location
    pub async fn delete(&self, user_id: Uuid, location_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scan_locations WHERE id = ?1 AND user_id = ?2")
            .bind(uuid_to_str(location_id))
            .bind(uuid_to_str(user_id))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Most recent completed sweep across all of a user's locations
    pub async fn last_scan(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        let value: Option<String> = sqlx::query_scalar(
            "SELECT MAX(last_scanned) FROM scan_locations WHERE user_id = ?1",
        )
        .bind(uuid_to_str(user_id))
        .fetch_one(&self.pool)
        .await?;

        str_to_datetime_opt(value.as_deref())
    }
}
