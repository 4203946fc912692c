//! Audio tracks database repository
//!
//! Tracks are replaced wholesale whenever their parent file is
//! re-analyzed; there is no per-track update path.

use anyhow::Result;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::sqlite_helpers::{str_to_uuid, uuid_to_str};

/// Audio track record from database
#[derive(Debug, Clone)]
pub struct AudioTrackRecord {
    pub id: Uuid,
    pub media_file_id: Uuid,
    pub track_index: i64,
    pub language: Option<String>,
    pub language_raw: Option<String>,
    pub codec: Option<String>,
    pub channels: Option<i64>,
    pub channel_layout: Option<String>,
    pub bitrate: Option<i64>,
    pub is_default: bool,
    pub is_forced: bool,
    pub title: Option<String>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for AudioTrackRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let file_str: String = row.try_get("media_file_id")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            media_file_id: str_to_uuid(&file_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            track_index: row.try_get("track_index")?,
            language: row.try_get("language")?,
            language_raw: row.try_get("language_raw")?,
            codec: row.try_get("codec")?,
            channels: row.try_get("channels")?,
            channel_layout: row.try_get("channel_layout")?,
            bitrate: row.try_get("bitrate")?,
            is_default: row.try_get("is_default")?,
            is_forced: row.try_get("is_forced")?,
            title: row.try_get("title")?,
        })
    }
}

/// Input for inserting an audio track
#[derive(Debug)]
pub struct CreateAudioTrack {
    pub media_file_id: Uuid,
    pub track_index: i64,
    pub language: Option<String>,
    pub language_raw: Option<String>,
    pub codec: Option<String>,
    pub channels: Option<i64>,
    pub channel_layout: Option<String>,
    pub bitrate: Option<i64>,
    pub is_default: bool,
    pub is_forced: bool,
    pub title: Option<String>,
}

// ============================================================================
// Transaction-scoped operations used by the scan pipeline
// ============================================================================

/// Delete every track belonging to a file
pub async fn delete_for_file(conn: &mut SqliteConnection, media_file_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM audio_tracks WHERE media_file_id = ?1")
        .bind(uuid_to_str(media_file_id))
        .execute(conn)
        .await?;

    Ok(())
}

/// Insert a single track row
pub async fn insert(conn: &mut SqliteConnection, input: CreateAudioTrack) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO audio_tracks (
            id, media_file_id, track_index, language, language_raw, codec,
            channels, channel_layout, bitrate, is_default, is_forced, title
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
        "#,
    )
    .bind(uuid_to_str(Uuid::new_v4()))
    .bind(uuid_to_str(input.media_file_id))
    .bind(input.track_index)
    .bind(&input.language)
    .bind(&input.language_raw)
    .bind(&input.codec)
    .bind(input.channels)
    .bind(&input.channel_layout)
    .bind(input.bitrate)
    .bind(input.is_default)
    .bind(input.is_forced)
    .bind(&input.title)
    .execute(conn)
    .await?;

    Ok(())
}

// ============================================================================
// Pool-backed queries used by the HTTP layer
// ============================================================================

/// List a file's tracks in physical order
pub async fn list_by_file(pool: &SqlitePool, media_file_id: Uuid) -> Result<Vec<AudioTrackRecord>> {
    let records = sqlx::query_as::<_, AudioTrackRecord>(
        "SELECT * FROM audio_tracks WHERE media_file_id = ?1 ORDER BY track_index",
    )
    .bind(uuid_to_str(media_file_id))
    .fetch_all(pool)
    .await?;

    Ok(records)
}
