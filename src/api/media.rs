//! Media API: dashboard stats, shows, seasons, files, exports, and the
//! manual default-audio fix

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::AppState;
use crate::api::ApiError;
use crate::api::auth::CurrentUser;
use crate::db::preferences::keys;
use crate::db::shows::ShowCounts;
use crate::db::{
    AudioTrackRecord, MediaFileRecord, MediaFileRepository, MediaKind, PreferencesRepository,
    ScanLocationRepository, ShowRecord, ShowRepository, audio_tracks, media_files, seasons,
};
use crate::services::analyzer::AudioAnalyzer;
use crate::services::audio_fixer::{AudioFixer, find_track_index_for_language};
use crate::services::exporter;
use crate::services::preference_engine::{AudioPreferences, PreferenceEngine};

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Serialize)]
struct AudioTrackResponse {
    id: Uuid,
    track_index: i64,
    language: Option<String>,
    language_raw: Option<String>,
    codec: Option<String>,
    channels: Option<i64>,
    channel_layout: Option<String>,
    bitrate: Option<i64>,
    is_default: bool,
    is_forced: bool,
    title: Option<String>,
}

impl From<AudioTrackRecord> for AudioTrackResponse {
    fn from(record: AudioTrackRecord) -> Self {
        Self {
            id: record.id,
            track_index: record.track_index,
            language: record.language,
            language_raw: record.language_raw,
            codec: record.codec,
            channels: record.channels,
            channel_layout: record.channel_layout,
            bitrate: record.bitrate,
            is_default: record.is_default,
            is_forced: record.is_forced,
            title: record.title,
        }
    }
}

#[derive(Debug, Serialize)]
struct MediaFileResponse {
    id: Uuid,
    file_path: String,
    filename: String,
    episode_number: Option<i64>,
    file_size: i64,
    container_format: Option<String>,
    duration_ms: Option<i64>,
    last_scanned: DateTime<Utc>,
    has_issues: bool,
    issue_details: Option<String>,
    audio_tracks: Vec<AudioTrackResponse>,
}

impl MediaFileResponse {
    fn build(record: MediaFileRecord, tracks: Vec<AudioTrackRecord>) -> Self {
        Self {
            id: record.id,
            file_path: record.file_path,
            filename: record.filename,
            episode_number: record.episode_number,
            file_size: record.file_size,
            container_format: record.container_format,
            duration_ms: record.duration_ms,
            last_scanned: record.last_scanned,
            has_issues: record.has_issues,
            issue_details: record.issue_details,
            audio_tracks: tracks.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ShowResponse {
    id: Uuid,
    title: String,
    media_type: String,
    is_anime: bool,
    anime_source: Option<String>,
    thumb_url: Option<String>,
    season_count: i64,
    episode_count: i64,
    file_count: i64,
    issues_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ShowResponse {
    fn build(record: ShowRecord, counts: &ShowCounts) -> Self {
        Self {
            id: record.id,
            title: record.title,
            media_type: record.media_kind,
            is_anime: record.is_anime,
            anime_source: record.anime_source,
            thumb_url: record.thumb_url,
            season_count: counts.season_count,
            episode_count: counts.episode_count,
            file_count: counts.file_count,
            issues_count: counts.issues_count,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct SeasonResponse {
    id: Uuid,
    season_number: i64,
    episode_count: i64,
    issues_count: i64,
}

#[derive(Debug, Serialize)]
struct ShowDetailResponse {
    #[serde(flatten)]
    show: ShowResponse,
    seasons: Vec<SeasonResponse>,
    media_files: Vec<MediaFileResponse>,
}

#[derive(Debug, Serialize)]
struct SeasonDetailResponse {
    id: Uuid,
    season_number: i64,
    episode_count: i64,
    issues_count: i64,
    media_files: Vec<MediaFileResponse>,
}

#[derive(Debug, Serialize)]
struct Paginated<T> {
    items: Vec<T>,
    total: i64,
    page: i64,
    page_size: i64,
    pages: i64,
}

impl<T> Paginated<T> {
    fn build(items: Vec<T>, total: i64, page: i64, page_size: i64) -> Self {
        let pages = if total > 0 {
            (total + page_size - 1) / page_size
        } else {
            1
        };
        Self {
            items,
            total,
            page,
            page_size,
            pages,
        }
    }
}

#[derive(Debug, Serialize)]
struct DashboardStats {
    total_titles: i64,
    total_files: i64,
    total_files_with_issues: i64,
    movie_count: i64,
    tv_count: i64,
    anime_count: i64,
    missing_english_count: i64,
    missing_japanese_count: i64,
    missing_dual_audio_count: i64,
    last_scan: Option<DateTime<Utc>>,
}

fn clamp_pagination(page: Option<i64>, page_size: Option<i64>) -> (i64, i64) {
    let page = page.unwrap_or(1).max(1);
    let page_size = page_size.unwrap_or(50).clamp(1, 100);
    (page, page_size)
}

// ============================================================================
// Dashboard stats
// ============================================================================

async fn dashboard_stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<DashboardStats>, ApiError> {
    let shows = ShowRepository::new(state.db.pool().clone());
    let files = MediaFileRepository::new(state.db.pool().clone());
    let locations = ScanLocationRepository::new(state.db.pool().clone());

    Ok(Json(DashboardStats {
        total_titles: shows.count_all(user.id).await?,
        total_files: files.count_all(user.id).await?,
        total_files_with_issues: files.count_with_issues(user.id).await?,
        movie_count: shows.count_by_kind(user.id, MediaKind::Movie).await?,
        tv_count: shows.count_by_kind(user.id, MediaKind::Tv).await?,
        anime_count: shows.count_anime(user.id).await?,
        missing_english_count: files.count_issue_like(user.id, "Missing English").await?,
        missing_japanese_count: files.count_issue_like(user.id, "Missing Japanese").await?,
        missing_dual_audio_count: files.count_issue_like(user.id, "Missing dual audio").await?,
        last_scan: locations.last_scan(user.id).await?,
    }))
}

// ============================================================================
// Shows
// ============================================================================

#[derive(Debug, Deserialize)]
struct ShowListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    is_anime: Option<bool>,
    has_issues: Option<bool>,
    search: Option<String>,
}

async fn list_shows(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ShowListQuery>,
) -> Result<Json<Paginated<ShowResponse>>, ApiError> {
    let (page, page_size) = clamp_pagination(query.page, query.page_size);
    let repo = ShowRepository::new(state.db.pool().clone());

    let (records, mut total) = repo
        .list(
            user.id,
            query.is_anime,
            query.search.as_deref(),
            page_size,
            (page - 1) * page_size,
        )
        .await?;

    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let counts = repo.counts(record.id).await?;
        items.push(ShowResponse::build(record, &counts));
    }

    if let Some(has_issues) = query.has_issues {
        items.retain(|s| (s.issues_count > 0) == has_issues);
        total = items.len() as i64;
    }

    Ok(Json(Paginated::build(items, total, page, page_size)))
}

async fn get_show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(show_id): UrlPath<Uuid>,
) -> Result<Json<ShowDetailResponse>, ApiError> {
    let repo = ShowRepository::new(state.db.pool().clone());
    let record = repo
        .get_by_id(user.id, show_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Show not found".to_string()))?;

    let counts = repo.counts(record.id).await?;
    let files_repo = MediaFileRepository::new(state.db.pool().clone());

    let mut season_responses = Vec::new();
    for season in seasons::list_by_show(state.db.pool(), record.id).await? {
        let files = files_repo.list_by_season(season.id).await?;
        season_responses.push(SeasonResponse {
            id: season.id,
            season_number: season.season_number,
            episode_count: files.len() as i64,
            issues_count: files.iter().filter(|f| f.has_issues).count() as i64,
        });
    }

    // Movies link files directly with no season
    let mut direct_files = Vec::new();
    for file in files_repo.list_direct_by_show(record.id).await? {
        let tracks = audio_tracks::list_by_file(state.db.pool(), file.id).await?;
        direct_files.push(MediaFileResponse::build(file, tracks));
    }

    Ok(Json(ShowDetailResponse {
        show: ShowResponse::build(record, &counts),
        seasons: season_responses,
        media_files: direct_files,
    }))
}

#[derive(Debug, Deserialize)]
struct ShowUpdate {
    media_type: Option<MediaKind>,
    is_anime: Option<bool>,
    anime_source: Option<String>,
}

async fn update_show(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(show_id): UrlPath<Uuid>,
    Json(request): Json<ShowUpdate>,
) -> Result<Json<ShowResponse>, ApiError> {
    if let Some(source) = &request.anime_source {
        if !["plex_genre", "folder", "manual"].contains(&source.as_str()) {
            return Err(ApiError::BadRequest(
                "anime_source must be one of: plex_genre, folder, manual".to_string(),
            ));
        }
    }

    let repo = ShowRepository::new(state.db.pool().clone());
    let record = repo
        .update_flags(
            user.id,
            show_id,
            request.media_type,
            request.is_anime,
            request.anime_source,
        )
        .await?
        .ok_or_else(|| ApiError::NotFound("Show not found".to_string()))?;

    let counts = repo.counts(record.id).await?;
    Ok(Json(ShowResponse::build(record, &counts)))
}

async fn get_season(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath((show_id, season_number)): UrlPath<(Uuid, i64)>,
) -> Result<Json<SeasonDetailResponse>, ApiError> {
    let shows_repo = ShowRepository::new(state.db.pool().clone());
    if shows_repo.get_by_id(user.id, show_id).await?.is_none() {
        return Err(ApiError::NotFound("Show not found".to_string()));
    }

    let season = seasons::get_by_show_and_number(state.db.pool(), show_id, season_number)
        .await?
        .ok_or_else(|| ApiError::NotFound("Season not found".to_string()))?;

    let files_repo = MediaFileRepository::new(state.db.pool().clone());
    let files = files_repo.list_by_season(season.id).await?;

    let mut media_files = Vec::with_capacity(files.len());
    for file in files {
        let tracks = audio_tracks::list_by_file(state.db.pool(), file.id).await?;
        media_files.push(MediaFileResponse::build(file, tracks));
    }

    Ok(Json(SeasonDetailResponse {
        id: season.id,
        season_number: season.season_number,
        episode_count: media_files.len() as i64,
        issues_count: media_files.iter().filter(|f| f.has_issues).count() as i64,
        media_files,
    }))
}

// ============================================================================
// Media files
// ============================================================================

#[derive(Debug, Deserialize)]
struct FileListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    has_issues: Option<bool>,
    show_id: Option<Uuid>,
    search: Option<String>,
}

async fn list_files(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<FileListQuery>,
) -> Result<Json<Paginated<MediaFileResponse>>, ApiError> {
    let (page, page_size) = clamp_pagination(query.page, query.page_size);
    let repo = MediaFileRepository::new(state.db.pool().clone());

    let (records, total) = repo
        .list(
            user.id,
            query.has_issues,
            query.show_id,
            query.search.as_deref(),
            page_size,
            (page - 1) * page_size,
        )
        .await?;

    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let tracks = audio_tracks::list_by_file(state.db.pool(), record.id).await?;
        items.push(MediaFileResponse::build(record, tracks));
    }

    Ok(Json(Paginated::build(items, total, page, page_size)))
}

async fn get_file(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(file_id): UrlPath<Uuid>,
) -> Result<Json<MediaFileResponse>, ApiError> {
    let record = MediaFileRepository::new(state.db.pool().clone())
        .get_by_id(user.id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Media file not found".to_string()))?;

    let tracks = audio_tracks::list_by_file(state.db.pool(), record.id).await?;
    Ok(Json(MediaFileResponse::build(record, tracks)))
}

// ============================================================================
// Manual default-audio fix
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpdateDefaultAudioRequest {
    language: String,
}

#[derive(Debug, Serialize)]
struct UpdateDefaultAudioResponse {
    message: String,
    media_file: MediaFileResponse,
}

async fn set_default_audio(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    UrlPath(file_id): UrlPath<Uuid>,
    Json(request): Json<UpdateDefaultAudioRequest>,
) -> Result<Json<UpdateDefaultAudioResponse>, ApiError> {
    let language = request.language.trim().to_lowercase();
    if language.len() < 2 {
        return Err(ApiError::BadRequest("language is required".to_string()));
    }

    let files_repo = MediaFileRepository::new(state.db.pool().clone());
    let record = files_repo
        .get_by_id(user.id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Media file not found".to_string()))?;

    let file_path = Path::new(&record.file_path);
    let is_mkv = file_path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mkv"))
        .unwrap_or(false);
    if !is_mkv {
        return Err(ApiError::BadRequest(
            "Default audio can only be rewritten for MKV files".to_string(),
        ));
    }

    let analyzer = AudioAnalyzer::with_ffprobe_path(state.config.ffprobe_path.clone());
    let fixer = AudioFixer::with_mkvpropedit_path(state.config.mkvpropedit_path.clone());

    let audio_info = analyzer.analyze(file_path).await;
    let target_index = find_track_index_for_language(&audio_info.audio_tracks, &language)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("No audio track with language '{}'", language))
        })?;

    if !fixer
        .set_default_track_by_index(file_path, &audio_info.audio_tracks, target_index)
        .await
    {
        return Err(ApiError::BadRequest(
            "Failed to update the default audio track".to_string(),
        ));
    }

    // Re-probe so the stored tracks and issue flags reflect the rewrite
    let refreshed = analyzer.analyze(file_path).await;

    let is_anime = match record.show_id {
        Some(show_id) => ShowRepository::new(state.db.pool().clone())
            .get_by_id(user.id, show_id)
            .await?
            .map(|s| s.is_anime)
            .unwrap_or(false),
        None => false,
    };

    let preferences: AudioPreferences = PreferencesRepository::new(state.db.pool().clone())
        .get_typed(user.id, keys::AUDIO_PREFERENCES)
        .await?;
    let issues = PreferenceEngine::new(preferences).evaluate(&refreshed.audio_tracks, is_anime);
    let issue_details = if issues.is_empty() {
        None
    } else {
        Some(
            issues
                .iter()
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
                .join("; "),
        )
    };

    let mut tx = state.db.pool().begin().await.map_err(anyhow::Error::from)?;
    audio_tracks::delete_for_file(&mut tx, record.id).await?;
    for track in &refreshed.audio_tracks {
        audio_tracks::insert(
            &mut tx,
            crate::db::CreateAudioTrack {
                media_file_id: record.id,
                track_index: track.index,
                language: track.language.clone(),
                language_raw: track.language_raw.clone(),
                codec: track.codec.clone(),
                channels: track.channels,
                channel_layout: track.channel_layout.clone(),
                bitrate: track.bitrate,
                is_default: track.is_default,
                is_forced: track.is_forced,
                title: track.title.clone(),
            },
        )
        .await?;
    }
    media_files::update_issues(&mut tx, record.id, !issues.is_empty(), issue_details.as_deref())
        .await?;
    tx.commit().await.map_err(anyhow::Error::from)?;

    let record = files_repo
        .get_by_id(user.id, file_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Media file not found".to_string()))?;
    let tracks = audio_tracks::list_by_file(state.db.pool(), record.id).await?;

    Ok(Json(UpdateDefaultAudioResponse {
        message: format!("Default audio set to '{}'", language),
        media_file: MediaFileResponse::build(record, tracks),
    }))
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default = "default_export_format")]
    format: String,
    #[serde(default = "default_export_kind")]
    kind: String,
}

fn default_export_format() -> String {
    "csv".to_string()
}

fn default_export_kind() -> String {
    "files".to_string()
}

async fn export(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let (body, content_type, filename) = match (query.kind.as_str(), query.format.as_str()) {
        ("files", format @ ("csv" | "json")) => {
            let repo = MediaFileRepository::new(state.db.pool().clone());
            let (records, _) = repo.list(user.id, None, None, None, i64::MAX, 0).await?;

            let mut rows = Vec::with_capacity(records.len());
            for record in &records {
                let tracks = audio_tracks::list_by_file(state.db.pool(), record.id).await?;
                rows.push(exporter::MediaFileExportRow::from_record(record, &tracks));
            }

            if format == "csv" {
                (
                    exporter::media_files_to_csv(&rows),
                    "text/csv",
                    "media_files.csv",
                )
            } else {
                (
                    exporter::to_json(&rows),
                    "application/json",
                    "media_files.json",
                )
            }
        }
        ("shows", format @ ("csv" | "json")) => {
            let repo = ShowRepository::new(state.db.pool().clone());
            let (records, _) = repo.list(user.id, None, None, i64::MAX, 0).await?;

            let mut rows = Vec::with_capacity(records.len());
            for record in &records {
                let counts = repo.counts(record.id).await?;
                rows.push(exporter::ShowExportRow::from_record(record, &counts));
            }

            if format == "csv" {
                (exporter::shows_to_csv(&rows), "text/csv", "shows.csv")
            } else {
                (exporter::to_json(&rows), "application/json", "shows.json")
            }
        }
        _ => {
            return Err(ApiError::BadRequest(
                "format must be csv or json; kind must be files or shows".to_string(),
            ));
        }
    };

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        body,
    ))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stats", get(dashboard_stats))
        .route("/shows", get(list_shows))
        .route("/shows/{show_id}", get(get_show).patch(update_show))
        .route("/shows/{show_id}/seasons/{season_number}", get(get_season))
        .route("/files", get(list_files))
        .route("/files/{file_id}", get(get_file))
        .route("/files/{file_id}/default-audio", post(set_default_audio))
        .route("/export", get(export))
}
