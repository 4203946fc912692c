//! Users database repository

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::sqlite_helpers::{datetime_to_str, str_to_datetime, str_to_uuid, uuid_to_str};

/// User record from database
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: Uuid,
    pub plex_user_id: String,
    pub plex_username: String,
    pub plex_email: Option<String>,
    pub plex_token: String,
    pub plex_thumb_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::sqlite::SqliteRow> for UserRecord {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Self> {
        use sqlx::Row;

        let id_str: String = row.try_get("id")?;
        let created_str: String = row.try_get("created_at")?;
        let login_str: String = row.try_get("last_login")?;

        Ok(Self {
            id: str_to_uuid(&id_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            plex_user_id: row.try_get("plex_user_id")?,
            plex_username: row.try_get("plex_username")?,
            plex_email: row.try_get("plex_email")?,
            plex_token: row.try_get("plex_token")?,
            plex_thumb_url: row.try_get("plex_thumb_url")?,
            created_at: str_to_datetime(&created_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
            last_login: str_to_datetime(&login_str).map_err(|e| sqlx::Error::Decode(e.into()))?,
        })
    }
}

/// Input for upserting a user at login
#[derive(Debug)]
pub struct UpsertUser {
    pub plex_user_id: String,
    pub plex_username: String,
    pub plex_email: Option<String>,
    pub plex_token: String,
    pub plex_thumb_url: Option<String>,
}

/// Users repository for database operations
pub struct UserRepository {
    pool: SqlitePool,
}

impl UserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a user by id
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE id = ?1")
            .bind(uuid_to_str(id))
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Get a user by their Plex account id
    pub async fn get_by_plex_user_id(&self, plex_user_id: &str) -> Result<Option<UserRecord>> {
        let record = sqlx::query_as::<_, UserRecord>("SELECT * FROM users WHERE plex_user_id = ?1")
            .bind(plex_user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    /// Insert or refresh a user row at login, returning the stored record
    pub async fn upsert(&self, input: UpsertUser) -> Result<UserRecord> {
        let now = datetime_to_str(Utc::now());

        if let Some(existing) = self.get_by_plex_user_id(&input.plex_user_id).await? {
            sqlx::query(
                r#"
                UPDATE users
                SET plex_username = ?1, plex_email = ?2, plex_token = ?3,
                    plex_thumb_url = ?4, last_login = ?5
                WHERE id = ?6
                "#,
            )
            .bind(&input.plex_username)
            .bind(&input.plex_email)
            .bind(&input.plex_token)
            .bind(&input.plex_thumb_url)
            .bind(&now)
            .bind(uuid_to_str(existing.id))
            .execute(&self.pool)
            .await?;

            return self
                .get_by_id(existing.id)
                .await?
                .context("user row vanished during upsert");
        }

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (
                id, plex_user_id, plex_username, plex_email, plex_token,
                plex_thumb_url, created_at, last_login
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(uuid_to_str(id))
        .bind(&input.plex_user_id)
        .bind(&input.plex_username)
        .bind(&input.plex_email)
        .bind(&input.plex_token)
        .bind(&input.plex_thumb_url)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_by_id(id)
            .await?
            .context("user row vanished after insert")
    }
}
