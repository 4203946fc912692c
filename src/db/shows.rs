//! Shows database repository
//!
//! A "show" row is any title-level catalog entry: a TV show, an anime, or
//! a movie (movies link their files directly, with no season).

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::sqlite_helpers::{datetime_to_str, str_to_datetime, str_to_uuid, uuid_to_str};

/// Declared media kind of a scan location or show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Tv,
    Movie,
    Anime,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Tv => "tv",
            MediaKind::Movie => "movie",
            MediaKind::Anime => "anime",
        }
    }

    /// Parse a stored/user-supplied kind, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "tv" => Some(MediaKind::Tv),
            "movie" => Some(MediaKind::Movie),
            "anime" => Some(MediaKind::Anime),
            _ => None,
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Show record from database
#[derive(Debug, Clone)]
pub struct ShowRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub media_kind: String,
    pub plex_rating_key: Option<String>,
    pub is_anime: bool,
    pub anime_source: Option<String>,
    pub thumb_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for ShowRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let user_str: String = row.try_get("user_id")?;
        let created_str: String = row.try_get("created_at")?;
        let updated_str: String = row.try_get("updated_at")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            user_id: str_to_uuid(&user_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            title: row.try_get("title")?,
            media_kind: row.try_get("media_kind")?,
            plex_rating_key: row.try_get("plex_rating_key")?,
            is_anime: row.try_get("is_anime")?,
            anime_source: row.try_get("anime_source")?,
            thumb_url: row.try_get("thumb_url")?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            updated_at: str_to_datetime(&updated_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Input for creating a show during a scan
#[derive(Debug)]
pub struct CreateShow {
    pub user_id: Uuid,
    pub title: String,
    pub media_kind: MediaKind,
    pub plex_rating_key: Option<String>,
    pub is_anime: bool,
    pub anime_source: Option<String>,
    pub thumb_url: Option<String>,
}

/// Identity fields applied when Plex evidence attaches to an existing row
#[derive(Debug)]
pub struct ShowIdentityUpdate {
    pub title: Option<String>,
    pub plex_rating_key: Option<String>,
    pub is_anime: bool,
    pub anime_source: Option<String>,
    pub thumb_url: Option<String>,
}

// ============================================================================
// Transaction-scoped operations used by the scan pipeline
// ============================================================================

/// Find a show by its Plex rating key
pub async fn find_by_rating_key(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    rating_key: &str,
) -> Result<Option<ShowRecord>> {
    let record = sqlx::query_as::<_, ShowRecord>(
        "SELECT * FROM shows WHERE user_id = ?1 AND plex_rating_key = ?2",
    )
    .bind(uuid_to_str(user_id))
    .bind(rating_key)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Find a show by exact title
pub async fn find_by_title(
    conn: &mut SqliteConnection,
    user_id: Uuid,
    title: &str,
) -> Result<Option<ShowRecord>> {
    let record =
        sqlx::query_as::<_, ShowRecord>("SELECT * FROM shows WHERE user_id = ?1 AND title = ?2")
            .bind(uuid_to_str(user_id))
            .bind(title)
            .fetch_optional(conn)
            .await?;

    Ok(record)
}

/// Insert a new show, returning the stored record
pub async fn insert(conn: &mut SqliteConnection, input: CreateShow) -> Result<ShowRecord> {
    let id = Uuid::new_v4();
    let now = datetime_to_str(Utc::now());

    sqlx::query(
        r#"
        INSERT INTO shows (
            id, user_id, title, media_kind, plex_rating_key, is_anime,
            anime_source, thumb_url, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
    )
    .bind(uuid_to_str(id))
    .bind(uuid_to_str(input.user_id))
    .bind(&input.title)
    .bind(input.media_kind.as_str())
    .bind(&input.plex_rating_key)
    .bind(input.is_anime)
    .bind(&input.anime_source)
    .bind(&input.thumb_url)
    .bind(&now)
    .bind(&now)
    .execute(&mut *conn)
    .await?;

    let record = sqlx::query_as::<_, ShowRecord>("SELECT * FROM shows WHERE id = ?1")
        .bind(uuid_to_str(id))
        .fetch_one(conn)
        .await?;

    Ok(record)
}

/// Apply Plex identity fields to an existing show
pub async fn update_identity(
    conn: &mut SqliteConnection,
    show_id: Uuid,
    update: ShowIdentityUpdate,
) -> Result<ShowRecord> {
    sqlx::query(
        r#"
        UPDATE shows
        SET title = COALESCE(?1, title),
            plex_rating_key = COALESCE(?2, plex_rating_key),
            is_anime = ?3,
            anime_source = ?4,
            thumb_url = COALESCE(?5, thumb_url),
            updated_at = ?6
        WHERE id = ?7
        "#,
    )
    .bind(&update.title)
    .bind(&update.plex_rating_key)
    .bind(update.is_anime)
    .bind(&update.anime_source)
    .bind(&update.thumb_url)
    .bind(datetime_to_str(Utc::now()))
    .bind(uuid_to_str(show_id))
    .execute(&mut *conn)
    .await?;

    let record = sqlx::query_as::<_, ShowRecord>("SELECT * FROM shows WHERE id = ?1")
        .bind(uuid_to_str(show_id))
        .fetch_one(conn)
        .await?;

    Ok(record)
}

// ============================================================================
// Pool-backed repository used by the HTTP layer
// ============================================================================

/// Aggregate counts attached to a show in list/detail responses
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShowCounts {
    pub season_count: i64,
    pub episode_count: i64,
    pub file_count: i64,
    pub issues_count: i64,
}

pub struct ShowRepository {
    pool: SqlitePool,
}

impl ShowRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a show by id, scoped to its owner
    pub async fn get_by_id(&self, user_id: Uuid, show_id: Uuid) -> Result<Option<ShowRecord>> {
        let record =
            sqlx::query_as::<_, ShowRecord>("SELECT * FROM shows WHERE id = ?1 AND user_id = ?2")
                .bind(uuid_to_str(show_id))
                .bind(uuid_to_str(user_id))
                .fetch_optional(&self.pool)
                .await?;

        Ok(record)
    }

    /// List shows for a user with pagination and filters
    pub async fn list(
        &self,
        user_id: Uuid,
        is_anime: Option<bool>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ShowRecord>, i64)> {
        const FILTER: &str = r#"
            user_id = ?1
            AND (?2 IS NULL OR is_anime = ?2)
            AND (?3 IS NULL OR title LIKE ?3)
        "#;

        let search_pattern = search.map(|s| format!("%{}%", s));

        let total: i64 =
            sqlx::query_scalar(&format!("SELECT COUNT(*) FROM shows WHERE {}", FILTER))
                .bind(uuid_to_str(user_id))
                .bind(is_anime)
                .bind(&search_pattern)
                .fetch_one(&self.pool)
                .await?;

        let records = sqlx::query_as::<_, ShowRecord>(&format!(
            "SELECT * FROM shows WHERE {} ORDER BY title LIMIT ?4 OFFSET ?5",
            FILTER
        ))
        .bind(uuid_to_str(user_id))
        .bind(is_anime)
        .bind(&search_pattern)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok((records, total))
    }

    /// Aggregate season/episode/file/issue counts for a show
    pub async fn counts(&self, show_id: Uuid) -> Result<ShowCounts> {
        let id = uuid_to_str(show_id);

        let season_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM seasons WHERE show_id = ?1")
                .bind(&id)
                .fetch_one(&self.pool)
                .await?;

        let episode_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM media_files WHERE show_id = ?1 AND season_id IS NOT NULL",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await?;

        let file_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM media_files WHERE show_id = ?1")
                .bind(&id)
                .fetch_one(&self.pool)
                .await?;

        let issues_count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM media_files WHERE show_id = ?1 AND has_issues = 1",
        )
        .bind(&id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ShowCounts {
            season_count,
            episode_count,
            file_count,
            issues_count,
        })
    }

    /// Count all shows for a user
    pub async fn count_all(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shows WHERE user_id = ?1")
            .bind(uuid_to_str(user_id))
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Count a user's shows of one media kind
    pub async fn count_by_kind(&self, user_id: Uuid, kind: MediaKind) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shows WHERE user_id = ?1 AND media_kind = ?2")
                .bind(uuid_to_str(user_id))
                .bind(kind.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Count a user's anime shows regardless of declared kind
    pub async fn count_anime(&self, user_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM shows WHERE user_id = ?1 AND is_anime = 1")
                .bind(uuid_to_str(user_id))
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    /// Update user-editable show flags. A manual anime override records
    /// `anime_source = "manual"` so later scans will not undo it.
    pub async fn update_flags(
        &self,
        user_id: Uuid,
        show_id: Uuid,
        media_kind: Option<MediaKind>,
        is_anime: Option<bool>,
        anime_source: Option<String>,
    ) -> Result<Option<ShowRecord>> {
        let Some(show) = self.get_by_id(user_id, show_id).await? else {
            return Ok(None);
        };

        let new_kind = media_kind.map(|k| k.as_str().to_string());
        let new_source = match (&anime_source, is_anime) {
            (Some(source), _) => Some(source.clone()),
            (None, Some(true)) if show.anime_source.is_none() => Some("manual".to_string()),
            _ => show.anime_source.clone(),
        };

        sqlx::query(
            r#"
            UPDATE shows
            SET media_kind = COALESCE(?1, media_kind),
                is_anime = COALESCE(?2, is_anime),
                anime_source = ?3,
                updated_at = ?4
            WHERE id = ?5 AND user_id = ?6
            "#,
        )
        .bind(&new_kind)
        .bind(is_anime)
        .bind(&new_source)
        .bind(datetime_to_str(Utc::now()))
        .bind(uuid_to_str(show_id))
        .bind(uuid_to_str(user_id))
        .execute(&self.pool)
        .await?;

        self.get_by_id(user_id, show_id).await
    }
}
