//! Seasons database repository

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::sqlite_helpers::{str_to_uuid, uuid_to_str};

/// Season record from database
#[derive(Debug, Clone)]
pub struct SeasonRecord {
    pub id: Uuid,
    pub show_id: Uuid,
    pub season_number: i64,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for SeasonRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let show_str: String = row.try_get("show_id")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            show_id: str_to_uuid(&show_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            season_number: row.try_get("season_number")?,
        })
    }
}

// ============================================================================
// Transaction-scoped operations used by the scan pipeline
// ============================================================================

/// Find a season by number within a show
pub async fn find_by_number(
    conn: &mut SqliteConnection,
    show_id: Uuid,
    season_number: i64,
) -> Result<Option<SeasonRecord>> {
    let record = sqlx::query_as::<_, SeasonRecord>(
        "SELECT * FROM seasons WHERE show_id = ?1 AND season_number = ?2",
    )
    .bind(uuid_to_str(show_id))
    .bind(season_number)
    .fetch_optional(conn)
    .await?;

    Ok(record)
}

/// Find or lazily create the season row for (show, number)
pub async fn find_or_create(
    conn: &mut SqliteConnection,
    show_id: Uuid,
    season_number: i64,
) -> Result<SeasonRecord> {
    if let Some(existing) = find_by_number(conn, show_id, season_number).await? {
        return Ok(existing);
    }

    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO seasons (id, show_id, season_number) VALUES (?1, ?2, ?3)")
        .bind(uuid_to_str(id))
        .bind(uuid_to_str(show_id))
        .bind(season_number)
        .execute(&mut *conn)
        .await?;

    Ok(SeasonRecord {
        id,
        show_id,
        season_number,
    })
}

// ============================================================================
// Pool-backed queries used by the HTTP layer
// ============================================================================

/// List seasons for a show ordered by season number
pub async fn list_by_show(pool: &SqlitePool, show_id: Uuid) -> Result<Vec<SeasonRecord>> {
    let records = sqlx::query_as::<_, SeasonRecord>(
        "SELECT * FROM seasons WHERE show_id = ?1 ORDER BY season_number",
    )
    .bind(uuid_to_str(show_id))
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Get a season by (show, number)
pub async fn get_by_show_and_number(
    pool: &SqlitePool,
    show_id: Uuid,
    season_number: i64,
) -> Result<Option<SeasonRecord>> {
    let record = sqlx::query_as::<_, SeasonRecord>(
        "SELECT * FROM seasons WHERE show_id = ?1 AND season_number = ?2",
    )
    .bind(uuid_to_str(show_id))
    .bind(season_number)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}
