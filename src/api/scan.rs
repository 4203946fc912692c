//! Scan API: location management, directory browsing, scan control

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::api::ApiError;
use crate::api::auth::CurrentUser;
use crate::db::scan_locations::ScanLocationRecord;
use crate::db::{CreateScanLocation, MediaKind, PreferencesRepository, ScanLocationRepository};
use crate::db::preferences::keys;
use crate::services::plex::{CatalogProvider, PlexClient};
use crate::services::scan_state::ScanStatus;
use crate::services::scanner::{
    DEFAULT_EXTENSIONS, MediaScanner, ScanRequest, ScannerOptions, run_scan,
};
use crate::services::preference_engine::AudioPreferences;

/// Validate a scan path: absolute, existing, confined to the media root
/// (symlink escapes resolve outside and are rejected), and supplied in
/// normalized form.
pub async fn validate_media_root_path(media_root: &str, path: &str) -> Result<String, String> {
    let root = tokio::fs::canonicalize(media_root)
        .await
        .map_err(|_| format!("Media root {} is not available.", media_root))?;

    let resolved = tokio::fs::canonicalize(path).await.map_err(|_| {
        format!(
            "Path is invalid. Provide an absolute, existing path under {}.",
            media_root
        )
    })?;

    if !resolved.starts_with(&root) {
        return Err(format!("Path must be under {}.", media_root));
    }

    let normalized = resolved.to_string_lossy().to_string();
    if path != normalized {
        return Err(format!("Path must be normalized. Use '{}'.", normalized));
    }

    Ok(normalized)
}

// ============================================================================
// Request / response shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct BrowseQuery {
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct DirectoryEntry {
    name: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct DirectoryBrowseResponse {
    current_path: String,
    directories: Vec<DirectoryEntry>,
}

#[derive(Debug, Deserialize)]
struct ScanLocationCreate {
    path: String,
    label: String,
    #[serde(default = "default_media_kind")]
    media_type: MediaKind,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_media_kind() -> MediaKind {
    MediaKind::Tv
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ScanLocationUpdate {
    label: Option<String>,
    media_type: Option<MediaKind>,
    enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
struct ScanLocationResponse {
    id: Uuid,
    path: String,
    label: String,
    media_type: String,
    enabled: bool,
    last_scanned: Option<DateTime<Utc>>,
    file_count: i64,
    created_at: DateTime<Utc>,
}

impl From<ScanLocationRecord> for ScanLocationResponse {
    fn from(record: ScanLocationRecord) -> Self {
        Self {
            id: record.id,
            path: record.path,
            label: record.label,
            media_type: record.media_kind,
            enabled: record.enabled,
            last_scanned: record.last_scanned,
            file_count: record.file_count,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScanStartRequest {
    /// None scans all enabled locations
    location_ids: Option<Vec<Uuid>>,
    #[serde(default = "default_incremental")]
    incremental: bool,
}

fn default_incremental() -> bool {
    true
}

// ============================================================================
// Directory browsing
// ============================================================================

async fn browse_directories(
    State(state): State<AppState>,
    CurrentUser(_user): CurrentUser,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<DirectoryBrowseResponse>, ApiError> {
    let requested = query
        .path
        .unwrap_or_else(|| state.config.media_root.clone());

    let resolved = validate_media_root_path(&state.config.media_root, &requested)
        .await
        .map_err(ApiError::BadRequest)?;

    let mut read_dir = tokio::fs::read_dir(&resolved)
        .await
        .map_err(|_| ApiError::NotFound("Directory not found".to_string()))?;

    let mut directories = Vec::new();
    while let Some(entry) = read_dir
        .next_entry()
        .await
        .map_err(|e| ApiError::Internal(anyhow::Error::from(e)))?
    {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
            directories.push(DirectoryEntry {
                path: entry.path().to_string_lossy().to_string(),
                name,
            });
        }
    }
    directories.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Json(DirectoryBrowseResponse {
        current_path: resolved,
        directories,
    }))
}

// ============================================================================
// Scan locations
// ============================================================================

async fn list_locations(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<ScanLocationResponse>>, ApiError> {
    let locations = ScanLocationRepository::new(state.db.pool().clone())
        .list(user.id)
        .await?;

    Ok(Json(locations.into_iter().map(Into::into).collect()))
}

async fn create_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ScanLocationCreate>,
) -> Result<(axum::http::StatusCode, Json<ScanLocationResponse>), ApiError> {
    let normalized = validate_media_root_path(&state.config.media_root, &request.path)
        .await
        .map_err(ApiError::BadRequest)?;

    let repo = ScanLocationRepository::new(state.db.pool().clone());
    if repo.get_by_path(user.id, &normalized).await?.is_some() {
        return Err(ApiError::BadRequest(
            "Scan location with this path already exists".to_string(),
        ));
    }

    let record = repo
        .create(CreateScanLocation {
            user_id: user.id,
            path: normalized,
            label: request.label,
            media_kind: request.media_type,
            enabled: request.enabled,
        })
        .await?;

    Ok((axum::http::StatusCode::CREATED, Json(record.into())))
}

async fn get_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(location_id): UrlPath<Uuid>,
) -> Result<Json<ScanLocationResponse>, ApiError> {
    let record = ScanLocationRepository::new(state.db.pool().clone())
        .get_by_id(user.id, location_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Scan location not found".to_string()))?;

    Ok(Json(record.into()))
}

async fn update_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(location_id): UrlPath<Uuid>,
    Json(request): Json<ScanLocationUpdate>,
) -> Result<Json<ScanLocationResponse>, ApiError> {
    let record = ScanLocationRepository::new(state.db.pool().clone())
        .update(
            user.id,
            location_id,
            request.label,
            request.media_type,
            request.enabled,
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("Scan location not found".to_string()))?;

    Ok(Json(record.into()))
}

async fn delete_location(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(location_id): UrlPath<Uuid>,
) -> Result<axum::http::StatusCode, ApiError> {
    let deleted = ScanLocationRepository::new(state.db.pool().clone())
        .delete(user.id, location_id)
        .await?;

    if !deleted {
        return Err(ApiError::NotFound("Scan location not found".to_string()));
    }

    Ok(axum::http::StatusCode::NO_CONTENT)
}

// ============================================================================
// Scan operations
// ============================================================================

async fn scan_status(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Json<ScanStatus> {
    Json(state.scan_state.get_status(user.id).await)
}

async fn start_scan_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<ScanStartRequest>,
) -> Result<Json<ScanStatus>, ApiError> {
    let repo = ScanLocationRepository::new(state.db.pool().clone());

    let locations = match &request.location_ids {
        Some(ids) => {
            let mut found = Vec::new();
            for id in ids {
                match repo.get_by_id(user.id, *id).await? {
                    Some(location) => found.push(location),
                    None => {
                        return Err(ApiError::NotFound(
                            "One or more scan locations not found".to_string(),
                        ));
                    }
                }
            }
            found.into_iter().filter(|l| l.enabled).collect::<Vec<_>>()
        }
        None => repo.list_enabled(user.id).await?,
    };

    if locations.is_empty() {
        return Err(ApiError::BadRequest(
            "No enabled scan locations found".to_string(),
        ));
    }

    // Resolve the user's preferences before the scan starts; the core
    // only ever sees the finished configuration object.
    let prefs_repo = PreferencesRepository::new(state.db.pool().clone());
    let preferences: AudioPreferences = prefs_repo
        .get_typed(user.id, keys::AUDIO_PREFERENCES)
        .await?;
    let mut extensions: Vec<String> = prefs_repo
        .get_typed(user.id, keys::FILE_EXTENSIONS)
        .await?;
    if extensions.is_empty() {
        extensions = DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect();
    }

    let provider: Option<Arc<dyn CatalogProvider>> = state
        .config
        .plex_server_url
        .as_ref()
        .map(|url| Arc::new(PlexClient::new(url.clone(), user.plex_token.clone())) as _);

    // Reserve the running slot synchronously so a second client gets an
    // immediate conflict instead of a race.
    let started = state
        .scan_state
        .start_scan(user.id)
        .await
        .ok_or_else(|| ApiError::Conflict("A scan is already in progress".to_string()))?;

    let scan_request = ScanRequest {
        locations: locations.iter().map(|l| l.path.clone()).collect(),
        location_kinds: locations
            .iter()
            .map(|l| (l.path.clone(), l.kind()))
            .collect::<HashMap<_, _>>(),
        user_id: user.id,
        incremental: request.incremental,
    };

    let scanner = MediaScanner::new(
        ScannerOptions {
            preferences,
            extensions,
            ffprobe_path: state.config.ffprobe_path.clone(),
            mkvpropedit_path: state.config.mkvpropedit_path.clone(),
        },
        provider,
    );

    let db = state.db.clone();
    let scan_state = state.scan_state.clone();
    tokio::spawn(async move {
        run_scan(&db, &scan_state, &scanner, scan_request).await;
    });

    Ok(Json(started))
}

async fn cancel_scan_handler(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<ScanStatus>, ApiError> {
    let status = state
        .scan_state
        .cancel_scan(user.id)
        .await
        .ok_or_else(|| ApiError::BadRequest("No scan is currently running".to_string()))?;

    Ok(Json(status))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/browse", get(browse_directories))
        .route("/locations", get(list_locations).post(create_location))
        .route(
            "/locations/{location_id}",
            get(get_location)
                .patch(update_location)
                .delete(delete_location),
        )
        .route("/status", get(scan_status))
        .route("/start", post(start_scan_handler))
        .route("/cancel", post(cancel_scan_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_path_under_root() {
        let root = tempfile::tempdir().unwrap();
        let sub = root.path().join("tv");
        std::fs::create_dir(&sub).unwrap();

        let root_str = root.path().canonicalize().unwrap();
        let sub_canonical = sub.canonicalize().unwrap().to_string_lossy().to_string();

        let result =
            validate_media_root_path(&root_str.to_string_lossy(), &sub_canonical).await;
        assert_eq!(result.unwrap(), sub_canonical);
    }

    #[tokio::test]
    async fn test_path_outside_root_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let other_str = other.path().canonicalize().unwrap();

        let result = validate_media_root_path(
            &root.path().to_string_lossy(),
            &other_str.to_string_lossy(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_missing_path_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");

        let result = validate_media_root_path(
            &root.path().to_string_lossy(),
            &missing.to_string_lossy(),
        )
        .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let link = root.path().join("sneaky");
        std::os::unix::fs::symlink(outside.path(), &link).unwrap();

        let result = validate_media_root_path(
            &root.path().to_string_lossy(),
            &link.to_string_lossy(),
        )
        .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_normalized_path_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let sub = root.path().join("tv");
        std::fs::create_dir(&sub).unwrap();
        let root_canonical = root.path().canonicalize().unwrap();

        // Same directory, reached through a dot segment.
        let dotted = format!("{}/./tv", root_canonical.to_string_lossy());
        let result =
            validate_media_root_path(&root_canonical.to_string_lossy(), &dotted).await;
        let err = result.unwrap_err();
        assert!(err.contains("normalized"), "unexpected error: {}", err);
    }
}
