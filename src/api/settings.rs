//! Settings API: resolved user preferences over the key-value store

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api::ApiError;
use crate::api::auth::CurrentUser;
use crate::db::PreferencesRepository;
use crate::db::preferences::keys;
use crate::services::preference_engine::AudioPreferences;
use crate::services::scanner::DEFAULT_EXTENSIONS;

/// Anime detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnimeDetectionSettings {
    pub use_plex_genres: bool,
    pub anime_folder_keywords: Vec<String>,
}

impl Default for AnimeDetectionSettings {
    fn default() -> Self {
        Self {
            use_plex_genres: true,
            anime_folder_keywords: vec!["anime".to_string(), "animation".to_string()],
        }
    }
}

#[derive(Debug, Serialize)]
struct UserSettingsResponse {
    audio_preferences: AudioPreferences,
    anime_detection: AnimeDetectionSettings,
    file_extensions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct UserSettingsUpdate {
    audio_preferences: Option<AudioPreferences>,
    anime_detection: Option<AnimeDetectionSettings>,
    file_extensions: Option<Vec<String>>,
}

fn default_extensions() -> Vec<String> {
    DEFAULT_EXTENSIONS.iter().map(|e| format!(".{}", e)).collect()
}

async fn resolve_settings(
    repo: &PreferencesRepository,
    user_id: uuid::Uuid,
) -> anyhow::Result<UserSettingsResponse> {
    let audio_preferences: AudioPreferences =
        repo.get_typed(user_id, keys::AUDIO_PREFERENCES).await?;
    let anime_detection: AnimeDetectionSettings =
        repo.get_typed(user_id, keys::ANIME_DETECTION).await?;
    let mut file_extensions: Vec<String> = repo.get_typed(user_id, keys::FILE_EXTENSIONS).await?;
    if file_extensions.is_empty() {
        file_extensions = default_extensions();
    }

    Ok(UserSettingsResponse {
        audio_preferences,
        anime_detection,
        file_extensions,
    })
}

async fn get_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<UserSettingsResponse>, ApiError> {
    let repo = PreferencesRepository::new(state.db.pool().clone());
    Ok(Json(resolve_settings(&repo, user.id).await?))
}

async fn update_settings(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(request): Json<UserSettingsUpdate>,
) -> Result<Json<UserSettingsResponse>, ApiError> {
    let repo = PreferencesRepository::new(state.db.pool().clone());

    if let Some(audio_preferences) = &request.audio_preferences {
        repo.set_typed(user.id, keys::AUDIO_PREFERENCES, audio_preferences)
            .await?;
    }
    if let Some(anime_detection) = &request.anime_detection {
        repo.set_typed(user.id, keys::ANIME_DETECTION, anime_detection)
            .await?;
    }
    if let Some(file_extensions) = &request.file_extensions {
        let cleaned: Vec<String> = file_extensions
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if cleaned.is_empty() {
            return Err(ApiError::BadRequest(
                "file_extensions cannot be empty".to_string(),
            ));
        }
        repo.set_typed(user.id, keys::FILE_EXTENSIONS, &cleaned)
            .await?;
    }

    Ok(Json(resolve_settings(&repo, user.id).await?))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(get_settings).put(update_settings))
}
