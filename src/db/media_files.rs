//! Media files database repository

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::sqlite_helpers::{
    datetime_to_str, str_to_datetime, str_to_uuid, str_to_uuid_opt, uuid_to_str,
};

/// Media file record from database
#[derive(Debug, Clone)]
pub struct MediaFileRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub show_id: Option<Uuid>,
    pub season_id: Option<Uuid>,
    pub file_path: String,
    pub filename: String,
    pub episode_number: Option<i64>,
    pub file_size: i64,
    pub container_format: Option<String>,
    pub duration_ms: Option<i64>,
    pub last_scanned: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub has_issues: bool,
    pub issue_details: Option<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for MediaFileRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let user_str: String = row.try_get("user_id")?;
        let show_str: Option<String> = row.try_get("show_id")?;
        let season_str: Option<String> = row.try_get("season_id")?;
        let scanned_str: String = row.try_get("last_scanned")?;
        let modified_str: String = row.try_get("last_modified")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            user_id: str_to_uuid(&user_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            show_id: str_to_uuid_opt(show_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            season_id: str_to_uuid_opt(season_str.as_deref())
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            file_path: row.try_get("file_path")?,
            filename: row.try_get("filename")?,
            episode_number: row.try_get("episode_number")?,
            file_size: row.try_get("file_size")?,
            container_format: row.try_get("container_format")?,
            duration_ms: row.try_get("duration_ms")?,
            last_scanned: str_to_datetime(&scanned_str)
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            last_modified: str_to_datetime(&modified_str)
                .map_err(|e| sqlx::Error::Decode(e.into()))?,
            has_issues: row.try_get("has_issues")?,
            issue_details: row.try_get("issue_details")?,
        })
    }
}

/// Analyzed fields written on create or full re-analysis
#[derive(Debug)]
pub struct CreateMediaFile {
    pub user_id: Uuid,
    pub file_path: String,
    pub filename: String,
    pub show_id: Option<Uuid>,
    pub season_id: Option<Uuid>,
    pub episode_number: Option<i64>,
    pub file_size: i64,
    pub container_format: Option<String>,
    pub duration_ms: Option<i64>,
    pub last_modified: DateTime<Utc>,
    pub has_issues: bool,
    pub issue_details: Option<String>,
}

// ============================================================================
// Transaction-scoped operations used by the scan pipeline
// ============================================================================

/// Get a media file by (user, path)
pub async fn find_by_path(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    path: &str,
) -> Result<Option<MediaFileRecord>> {
    let record = sqlx::query_as::<_, MediaFileRecord>(
        "SELECT * FROM media_files WHERE user_id = ?1 AND file_path = ?2",
    )
    .bind(uuid_to_str(user_id))
    .bind(path)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Insert a new media file or fully rewrite an existing row's analyzed
/// fields, returning the stored record. `last_scanned` is stamped here.
pub async fn upsert_analysis(
    conn: &mut SqliteConnection,
    existing_id: Option<Uuid>,
    input: CreateMediaFile,
) -> Result<MediaFileRecord> {
    let now = datetime_to_str(Utc::now());

    let id = match existing_id {
        Some(id) => {
            sqlx::query(
                r#"
                UPDATE media_files
                SET filename = ?1, show_id = ?2, season_id = ?3, episode_number = ?4,
                    file_size = ?5, container_format = ?6, duration_ms = ?7,
                    last_scanned = ?8, last_modified = ?9, has_issues = ?10,
                    issue_details = ?11
                WHERE id = ?12
                "#,
            )
            .bind(&input.filename)
            .bind(input.show_id.map(uuid_to_str))
            .bind(input.season_id.map(uuid_to_str))
            .bind(input.episode_number)
            .bind(input.file_size)
            .bind(&input.container_format)
            .bind(input.duration_ms)
            .bind(&now)
            .bind(datetime_to_str(input.last_modified))
            .bind(input.has_issues)
            .bind(&input.issue_details)
            .bind(uuid_to_str(id))
            .execute(&mut *conn)
            .await?;
            id
        }
        None => {
            let id = Uuid::new_v4();
            sqlx::query(
                r#"
                INSERT INTO media_files (
                    id, user_id, show_id, season_id, file_path, filename,
                    episode_number, file_size, container_format, duration_ms,
                    last_scanned, last_modified, has_issues, issue_details
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
            )
            .bind(uuid_to_str(id))
            .bind(uuid_to_str(input.user_id))
            .bind(input.show_id.map(uuid_to_str))
            .bind(input.season_id.map(uuid_to_str))
            .bind(&input.file_path)
            .bind(&input.filename)
            .bind(input.episode_number)
            .bind(input.file_size)
            .bind(&input.container_format)
            .bind(input.duration_ms)
            .bind(&now)
            .bind(datetime_to_str(input.last_modified))
            .bind(input.has_issues)
            .bind(&input.issue_details)
            .execute(&mut *conn)
            .await?;
            id
        }
    };

    let record = sqlx::query_as::<_, MediaFileRecord>("SELECT * FROM media_files WHERE id = ?1")
        .bind(uuid_to_str(id))
        .fetch_one(conn)
        .await?;

    Ok(record)
}

/// Rewrite only the issue flags of a file (used after a default-audio fix)
pub async fn update_issues(
    conn: &mut SqliteConnection,
    id: Uuid,
    has_issues: bool,
    issue_details: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE media_files SET has_issues = ?1, issue_details = ?2 WHERE id = ?3")
        .bind(has_issues)
        .bind(issue_details)
        .bind(uuid_to_str(id))
        .execute(conn)
        .await?;

    Ok(())
}

/// Count a user's files whose path falls under the given location path
pub async fn count_with_prefix(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    path_prefix: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM media_files WHERE user_id = ?1 AND file_path LIKE ?2",
    )
    .bind(uuid_to_str(user_id))
    .bind(format!("{}%", path_prefix))
    .fetch_one(conn)
    .await?;

    Ok(count)
}

// ============================================================================
// Pool-backed repository used by the HTTP layer
// ============================================================================

pub struct MediaFileRepository {
    pool: SqlitePool,
}

impl MediaFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a media file by id, scoped to its owner
    pub async fn get_by_id(&self, user_id: Uuid, id: Uuid) -> Result<Option<MediaFileRecord>> {
        let record = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE id = ?1 AND user_id = ?2",
        )
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(user_id))
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// List files for a user with pagination and filters
    pub async fn list(
        &self,
        user_id: Uuid,
        has_issues: Option<bool>,
        show_id: Option<Uuid>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<MediaFileRecord>, i64)> {
        const FILTER: &str = r#"
            user_id = ?1
            AND (?2 IS NULL OR has_issues = ?2)
            AND (?3 IS NULL OR show_id = ?3)
            AND (?4 IS NULL OR filename LIKE ?4)
        "#;

        let search_pattern = search.map(|s| format!("%{}%", s));
        let show_id_str = show_id.map(uuid_to_str);

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM media_files WHERE {}", FILTER))
                .bind(uuid_to_str(user_id))
                .bind(has_issues)
                .bind(&show_id_str)
                .bind(&search_pattern)
                .fetch_one(&self.pool)
                .await?;

        let records = sqlx::query_as::<_, MediaFileRecord>(&format!(
            "SELECT * FROM media_files WHERE {} ORDER BY file_path LIMIT ?5 OFFSET ?6",
            FILTER
        ))
        .bind(uuid_to_str(user_id))
        .bind(has_issues)
        .bind(&show_id_str)
        .bind(&search_pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((records, total))
    }

    /// List all files in a season ordered by episode number
    pub async fn list_by_season(&self, season_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>(
            r#"
            SELECT * FROM media_files
            WHERE season_id = ?1
            ORDER BY episode_number IS NULL, episode_number, file_path
            "#,
        )
        .bind(uuid_to_str(season_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// List a show's files that have no season (movie files)
    pub async fn list_direct_by_show(&self, show_id: Uuid) -> Result<Vec<MediaFileRecord>> {
        let records = sqlx::query_as::<_, MediaFileRecord>(
            "SELECT * FROM media_files WHERE show_id = ?1 AND season_id IS NULL ORDER BY file_path",
        )
        .bind(uuid_to_str(show_id))
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Count all files for a user
    pub async fn count_all(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_files WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Count files flagged with issues for a user
    pub async fn count_with_issues(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM media_files WHERE user_id = ?1 AND has_issues = 1",
        )
        .bind(uuid_to_str(user_id))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    /// Count files whose issue summary contains the given fragment
    pub async fn count_issue_like(&self, user_id: Uuid, fragment: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM media_files WHERE user_id = ?1 AND issue_details LIKE ?2",
        )
        .bind(uuid_to_str(user_id))
        .bind(format!("%{}%", fragment))
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
