//! Database connection and per-entity repositories

pub mod audio_tracks;
pub mod media_files;
pub mod preferences;
pub mod scan_locations;
pub mod seasons;
pub mod shows;
pub mod sqlite_helpers;
pub mod users;

use std::str::FromStr;

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

pub use audio_tracks::{AudioTrackRecord, CreateAudioTrack};
pub use media_files::{CreateMediaFile, MediaFileRecord, MediaFileRepository};
pub use preferences::PreferencesRepository;
pub use scan_locations::{CreateScanLocation, ScanLocationRecord, ScanLocationRepository};
pub use seasons::SeasonRecord;
pub use shows::{MediaKind, ShowRecord, ShowRepository};
pub use users::{UserRecord, UserRepository};

/// Database wrapper providing connection pool access
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database wrapper from an existing pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the SQLite database at `path`
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Open an in-memory database (single connection so every session
    /// sees the same data) — used by the test suite.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Get the connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create all tables and indexes if they do not exist
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA_STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

/// Idempotent schema bootstrap, applied at startup
const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        plex_user_id TEXT NOT NULL UNIQUE,
        plex_username TEXT NOT NULL,
        plex_email TEXT,
        plex_token TEXT NOT NULL,
        plex_thumb_url TEXT,
        created_at TEXT NOT NULL,
        last_login TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS user_preferences (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        UNIQUE(user_id, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS shows (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        media_kind TEXT NOT NULL DEFAULT 'tv',
        plex_rating_key TEXT,
        is_anime INTEGER NOT NULL DEFAULT 0,
        anime_source TEXT,
        thumb_url TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS seasons (
        id TEXT PRIMARY KEY,
        show_id TEXT NOT NULL REFERENCES shows(id) ON DELETE CASCADE,
        season_number INTEGER NOT NULL,
        UNIQUE(show_id, season_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media_files (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        show_id TEXT REFERENCES shows(id) ON DELETE SET NULL,
        season_id TEXT REFERENCES seasons(id) ON DELETE SET NULL,
        file_path TEXT NOT NULL,
        filename TEXT NOT NULL,
        episode_number INTEGER,
        file_size INTEGER NOT NULL,
        container_format TEXT,
        duration_ms INTEGER,
        last_scanned TEXT NOT NULL,
        last_modified TEXT NOT NULL,
        has_issues INTEGER NOT NULL DEFAULT 0,
        issue_details TEXT,
        UNIQUE(user_id, file_path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audio_tracks (
        id TEXT PRIMARY KEY,
        media_file_id TEXT NOT NULL REFERENCES media_files(id) ON DELETE CASCADE,
        track_index INTEGER NOT NULL,
        language TEXT,
        language_raw TEXT,
        codec TEXT,
        channels INTEGER,
        channel_layout TEXT,
        bitrate INTEGER,
        is_default INTEGER NOT NULL DEFAULT 0,
        is_forced INTEGER NOT NULL DEFAULT 0,
        title TEXT,
        UNIQUE(media_file_id, track_index)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scan_locations (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        label TEXT NOT NULL,
        media_kind TEXT NOT NULL DEFAULT 'tv',
        enabled INTEGER NOT NULL DEFAULT 1,
        last_scanned TEXT,
        file_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL,
        UNIQUE(user_id, path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_shows_user_title ON shows(user_id, title)",
    "CREATE INDEX IF NOT EXISTS idx_media_files_user_path ON media_files(user_id, file_path)",
    "CREATE INDEX IF NOT EXISTS idx_media_files_season ON media_files(season_id)",
    "CREATE INDEX IF NOT EXISTS idx_audio_tracks_file ON audio_tracks(media_file_id)",
];
