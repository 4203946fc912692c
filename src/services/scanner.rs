//! Media library scanner
//!
//! `MediaScanner` walks scan locations to discover media files, infers
//! catalog placement from paths, resolves show identity against the
//! external catalog, probes audio tracks, and reconciles everything into
//! the database. `run_scan` is the background task driving it across all
//! requested locations with cancellation polling and batched commits.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::db::shows::{CreateShow, ShowIdentityUpdate};
use crate::db::{
    Database, MediaKind, MediaFileRecord, ShowRecord, audio_tracks, media_files, scan_locations,
    seasons, shows,
};
use crate::db::{CreateAudioTrack, CreateMediaFile};
use crate::services::analyzer::{AudioAnalyzer, AudioInfo};
use crate::services::audio_fixer::AudioFixer;
use crate::services::identity_matcher::{IdentityMatcher, MatchedShow};
use crate::services::path_inference::{ShowPathInfo, parse_movie_title, parse_show_info};
use crate::services::plex::CatalogProvider;
use crate::services::preference_engine::{AudioPreferences, PreferenceEngine};
use crate::services::scan_state::{ScanProgressUpdate, ScanStateManager};

/// Default media file extensions, used when the user has not configured
/// their own list
pub const DEFAULT_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "m4v", "mov", "wmv"];

/// Commit the scan transaction after this many processed files
const COMMIT_INTERVAL: usize = 50;

/// Whether a show's anime classification was set manually. A `manual`
/// override is never overwritten by scan evidence.
fn manual_override(show: &ShowRecord) -> bool {
    show.anime_source.as_deref() == Some("manual")
}

/// Scanner construction options
#[derive(Debug, Clone)]
pub struct ScannerOptions {
    pub preferences: AudioPreferences,
    /// Extensions with or without a leading dot, case-insensitive
    pub extensions: Vec<String>,
    pub ffprobe_path: String,
    pub mkvpropedit_path: String,
}

impl Default for ScannerOptions {
    fn default() -> Self {
        Self {
            preferences: AudioPreferences::default(),
            extensions: DEFAULT_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            ffprobe_path: "ffprobe".to_string(),
            mkvpropedit_path: "mkvpropedit".to_string(),
        }
    }
}

/// Scanner for discovering and reconciling media files
pub struct MediaScanner {
    extensions: HashSet<String>,
    analyzer: AudioAnalyzer,
    fixer: AudioFixer,
    matcher: Option<IdentityMatcher>,
    engine: PreferenceEngine,
}

impl MediaScanner {
    /// Create a scanner. Without a catalog provider, identity resolution
    /// is skipped and files carry path-only metadata.
    pub fn new(options: ScannerOptions, provider: Option<Arc<dyn CatalogProvider>>) -> Self {
        let extensions = options
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();

        Self {
            extensions,
            analyzer: AudioAnalyzer::with_ffprobe_path(options.ffprobe_path),
            fixer: AudioFixer::with_mkvpropedit_path(options.mkvpropedit_path),
            matcher: provider.map(IdentityMatcher::new),
            engine: PreferenceEngine::new(options.preferences),
        }
    }

    /// Discover all media files in a location, in stable sorted order.
    /// Hidden entries (dot-prefixed names) are skipped at every depth.
    pub fn discover_files(&self, location: &Path) -> Result<Vec<PathBuf>> {
        if !location.exists() {
            anyhow::bail!("Location does not exist: {}", location.display());
        }

        let mut files: Vec<PathBuf> = WalkDir::new(location)
            .follow_links(true)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !entry
                        .file_name()
                        .to_str()
                        .map(|name| name.starts_with('.'))
                        .unwrap_or(false)
            })
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| self.extensions.contains(&e.to_lowercase()))
                    .unwrap_or(false)
            })
            .map(|entry| entry.into_path())
            .collect();

        files.sort();
        Ok(files)
    }

    /// Process a single media file.
    ///
    /// Any failure is contained here: it is logged, recorded on the scan
    /// error log, and the file is skipped so the scan continues.
    #[allow(clippy::too_many_arguments)]
    pub async fn process_file(
        &self,
        conn: &mut SqliteConnection,
        state: &ScanStateManager,
        file_path: &Path,
        base_path: &Path,
        media_kind: MediaKind,
        user_id: Uuid,
        incremental: bool,
    ) -> Option<MediaFileRecord> {
        match self
            .process_file_inner(conn, file_path, base_path, media_kind, user_id, incremental)
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "Error processing file");
                state
                    .append_error(user_id, format!("{}: {}", file_path.display(), e))
                    .await;
                None
            }
        }
    }

    async fn process_file_inner(
        &self,
        conn: &mut SqliteConnection,
        file_path: &Path,
        base_path: &Path,
        media_kind: MediaKind,
        user_id: Uuid,
        incremental: bool,
    ) -> Result<MediaFileRecord> {
        let path_str = file_path.to_string_lossy().to_string();
        let is_movie = media_kind == MediaKind::Movie;
        let mut is_anime = media_kind == MediaKind::Anime;

        let existing = media_files::find_by_path(conn, user_id, &path_str).await?;

        let metadata = tokio::fs::metadata(file_path)
            .await
            .with_context(|| format!("Cannot stat {}", file_path.display()))?;
        let file_size = metadata.len() as i64;
        let file_mtime: DateTime<Utc> = metadata
            .modified()
            .context("Filesystem does not report modification times")?
            .into();

        // Incremental fast path: nothing changed on disk, nothing to do.
        if incremental {
            if let Some(existing) = &existing {
                if existing.last_modified >= file_mtime {
                    debug!(path = %path_str, "File unchanged, skipping");
                    return Ok(existing.clone());
                }
            }
        }

        let mut audio_info = self.analyzer.analyze(file_path).await;
        if audio_info.degraded {
            warn!(path = %path_str, "Audio analysis degraded to container guessing");
        }

        // Catalog placement from the path
        let show_info = if is_movie {
            ShowPathInfo {
                show: Some(parse_movie_title(file_path, base_path)),
                season: None,
                episode: None,
            }
        } else {
            parse_show_info(file_path, base_path)
        };

        // Identity resolution; Plex evidence beats the path-derived guess
        let plex_match = match &self.matcher {
            Some(matcher) => {
                matcher
                    .find_show_by_path_or_title(&path_str, show_info.show.as_deref())
                    .await
            }
            None => None,
        };

        let (show_title, anime_source, rating_key, thumb_url) = match &plex_match {
            Some(matched) => {
                // External genre evidence may upgrade a TV folder to anime,
                // never the reverse.
                if matched.is_anime && media_kind == MediaKind::Tv {
                    is_anime = true;
                }
                (
                    Some(matched.title.clone()),
                    matched.is_anime.then(|| "plex_genre".to_string()),
                    Some(matched.rating_key.clone()),
                    matched.thumb_url.clone(),
                )
            }
            None => (
                show_info.show.clone(),
                is_anime.then(|| "folder".to_string()),
                None,
                None,
            ),
        };

        let show = match &show_title {
            Some(title) => {
                Some(
                    self.resolve_show(
                        conn,
                        user_id,
                        media_kind,
                        title,
                        &show_info,
                        &plex_match,
                        is_anime,
                        anime_source.clone(),
                        rating_key.clone(),
                        thumb_url.clone(),
                    )
                    .await?,
                )
            }
            None => None,
        };

        let season = match (&show, show_info.season) {
            (Some(show), Some(season_number)) if !is_movie && season_number > 0 => {
                Some(seasons::find_or_create(conn, show.id, season_number).await?)
            }
            _ => None,
        };

        let final_is_anime = show.as_ref().map(|s| s.is_anime).unwrap_or(is_anime);

        // Optional on-disk fix of the default audio flag, then re-probe so
        // the stored tracks and issues reflect the rewritten container.
        audio_info = self
            .auto_fix_default_track(file_path, audio_info, final_is_anime)
            .await;

        let issues = self.engine.evaluate(&audio_info.audio_tracks, final_is_anime);
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

        let record = media_files::upsert_analysis(
            conn,
            existing.as_ref().map(|e| e.id),
            CreateMediaFile {
                user_id,
                file_path: path_str.clone(),
                filename: file_path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default(),
                show_id: show.as_ref().map(|s| s.id),
                season_id: season.as_ref().map(|s| s.id),
                episode_number: if is_movie { None } else { show_info.episode },
                file_size,
                container_format: audio_info.container.clone(),
                duration_ms: audio_info.duration_ms,
                last_modified: file_mtime,
                has_issues: !issues.is_empty(),
                issue_details,
            },
        )
        .await?;

        // Full track replacement, never a diff
        if existing.is_some() {
            audio_tracks::delete_for_file(conn, record.id).await?;
        }
        for track in &audio_info.audio_tracks {
            audio_tracks::insert(
                conn,
                CreateAudioTrack {
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

        Ok(record)
    }

    /// Resolve or create the show row for a processed file.
    ///
    /// Match order: Plex rating key, then the resolved title, then the
    /// raw path-inferred title (covers folder-name drift after a title
    /// correction). All strategies reuse an existing row rather than
    /// creating duplicates. A `manual` anime override is never changed by
    /// scan evidence.
    #[allow(clippy::too_many_arguments)]
    async fn resolve_show(
        &self,
        conn: &mut SqliteConnection,
        user_id: Uuid,
        media_kind: MediaKind,
        title: &str,
        show_info: &ShowPathInfo,
        plex_match: &Option<MatchedShow>,
        is_anime: bool,
        anime_source: Option<String>,
        rating_key: Option<String>,
        thumb_url: Option<String>,
    ) -> Result<ShowRecord> {
        let mut show: Option<ShowRecord> = None;

        if let Some(key) = &rating_key {
            show = shows::find_by_rating_key(conn, user_id, key).await?;
        }

        if show.is_none() {
            show = shows::find_by_title(conn, user_id, title).await?;
        }

        // Path-derived title differs after an identity correction: adopt
        // the old row and rewrite its identity.
        if show.is_none() {
            if let Some(path_title) = &show_info.show {
                if path_title != title {
                    if let Some(stale) = shows::find_by_title(conn, user_id, path_title).await? {
                        if plex_match.is_some() {
                            let (keep_anime, keep_source) = if manual_override(&stale) {
                                (stale.is_anime, stale.anime_source.clone())
                            } else {
                                (is_anime, anime_source.clone())
                            };
                            show = Some(
                                shows::update_identity(
                                    conn,
                                    stale.id,
                                    ShowIdentityUpdate {
                                        title: Some(title.to_string()),
                                        plex_rating_key: rating_key.clone(),
                                        is_anime: keep_anime,
                                        anime_source: keep_source,
                                        thumb_url: thumb_url.clone(),
                                    },
                                )
                                .await?,
                            );
                        } else {
                            show = Some(stale);
                        }
                    }
                }
            }
        }

        match show {
            None => {
                let created = shows::insert(
                    conn,
                    CreateShow {
                        user_id,
                        title: title.to_string(),
                        media_kind,
                        plex_rating_key: rating_key,
                        is_anime,
                        anime_source,
                        thumb_url,
                    },
                )
                .await?;
                info!(title = %created.title, kind = %media_kind, "Created show");
                Ok(created)
            }
            Some(existing) => {
                // Attach newly discovered Plex identity to rows that lack one.
                if plex_match.is_some() && existing.plex_rating_key.is_none() {
                    let (keep_anime, keep_source) = if manual_override(&existing) {
                        (existing.is_anime, existing.anime_source.clone())
                    } else {
                        (is_anime, anime_source)
                    };
                    return shows::update_identity(
                        conn,
                        existing.id,
                        ShowIdentityUpdate {
                            title: None,
                            plex_rating_key: rating_key,
                            is_anime: keep_anime,
                            anime_source: keep_source,
                            thumb_url,
                        },
                    )
                    .await;
                }
                Ok(existing)
            }
        }
    }

    /// First English track index when a fix is needed, None when an
    /// English track is already the default or none exists
    fn get_english_default_fix_index(
        &self,
        tracks: &[crate::services::analyzer::AudioTrackInfo],
    ) -> Option<i64> {
        let english_is_default = tracks
            .iter()
            .any(|t| t.is_default && t.language.as_deref() == Some("en"));
        if english_is_default {
            return None;
        }

        tracks
            .iter()
            .find(|t| t.language.as_deref() == Some("en"))
            .map(|t| t.index)
    }

    /// Rewrite the on-disk default flag to English for non-anime MKV
    /// files when enabled, re-probing on success. Anime and non-MKV
    /// containers are never modified.
    async fn auto_fix_default_track(
        &self,
        file_path: &Path,
        audio_info: AudioInfo,
        is_anime: bool,
    ) -> AudioInfo {
        if !self.engine.preferences().auto_fix_english_default_non_anime || is_anime {
            return audio_info;
        }

        let Some(target_index) = self.get_english_default_fix_index(&audio_info.audio_tracks)
        else {
            return audio_info;
        };

        if self
            .fixer
            .set_default_track_by_index(file_path, &audio_info.audio_tracks, target_index)
            .await
        {
            info!(path = %file_path.display(), target_index, "Fixed default audio track");
            self.analyzer.analyze(file_path).await
        } else {
            audio_info
        }
    }
}

/// One scan request as handed to the background task
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub locations: Vec<String>,
    pub location_kinds: HashMap<String, MediaKind>,
    pub user_id: Uuid,
    pub incremental: bool,
}

/// Run a scan over the requested locations.
///
/// The caller normally reserves the running slot via
/// `ScanStateManager::start_scan` before spawning this task; when invoked
/// directly (tests, CLI) the slot is reserved here. Whatever happens —
/// success, cancellation, or failure — the state is transitioned back to
/// Idle before returning.
pub async fn run_scan(
    db: &Database,
    state: &ScanStateManager,
    scanner: &MediaScanner,
    request: ScanRequest,
) {
    let user_id = request.user_id;

    if !state.get_status(user_id).await.is_running && state.start_scan(user_id).await.is_none() {
        error!(user_id = %user_id, "Scan slot could not be reserved");
        return;
    }

    let result = run_scan_inner(db, state, scanner, &request).await;

    if let Err(e) = &result {
        error!(user_id = %user_id, error = %e, "Scan failed");
        state.append_error(user_id, format!("Scan failed: {}", e)).await;
    }

    let final_status = state.finish_scan(user_id).await;
    info!(
        user_id = %user_id,
        files_scanned = final_status.files_scanned,
        errors = final_status.errors.len(),
        "Scan finished"
    );
}

async fn run_scan_inner(
    db: &Database,
    state: &ScanStateManager,
    scanner: &MediaScanner,
    request: &ScanRequest,
) -> Result<()> {
    let user_id = request.user_id;

    // Discover everything first so progress totals are meaningful.
    let mut all_files: Vec<(PathBuf, String, MediaKind)> = Vec::new();
    for location in &request.locations {
        state
            .update_status(
                user_id,
                ScanProgressUpdate {
                    current_location: Some(Some(location.clone())),
                    ..ScanProgressUpdate::default()
                },
            )
            .await;

        match scanner.discover_files(Path::new(location)) {
            Ok(files) => {
                let kind = request
                    .location_kinds
                    .get(location)
                    .copied()
                    .unwrap_or(MediaKind::Tv);
                all_files.extend(files.into_iter().map(|f| (f, location.clone(), kind)));
            }
            Err(e) => {
                error!(location = %location, error = %e, "Error discovering files");
                state
                    .append_error(user_id, format!("Error scanning {}: {}", location, e))
                    .await;
            }
        }
    }

    state
        .update_status(
            user_id,
            ScanProgressUpdate {
                files_total: Some(all_files.len() as i64),
                ..ScanProgressUpdate::default()
            },
        )
        .await;

    let mut tx = db.pool().begin().await?;

    for (i, (file_path, base_path, kind)) in all_files.iter().enumerate() {
        // Cancellation is polled once per file; an in-flight file is
        // never interrupted and committed work stays committed.
        if state.is_cancel_requested(user_id).await {
            info!(user_id = %user_id, "Scan cancelled");
            break;
        }

        state
            .update_status(
                user_id,
                ScanProgressUpdate {
                    files_scanned: Some((i + 1) as i64),
                    current_file: Some(
                        file_path
                            .file_name()
                            .map(|n| n.to_string_lossy().to_string()),
                    ),
                    ..ScanProgressUpdate::default()
                },
            )
            .await;

        scanner
            .process_file(
                &mut tx,
                state,
                file_path,
                Path::new(base_path),
                *kind,
                user_id,
                request.incremental,
            )
            .await;

        if (i + 1) % COMMIT_INTERVAL == 0 {
            tx.commit().await?;
            tx = db.pool().begin().await?;
        }
    }

    tx.commit().await?;

    // Location statistics reflect what is now persisted.
    let mut tx = db.pool().begin().await?;
    for location in &request.locations {
        if let Some(record) = scan_locations::find_by_path(&mut tx, user_id, location).await? {
            let file_count = media_files::count_with_prefix(&mut tx, user_id, location).await?;
            scan_locations::update_stats(&mut tx, record.id, file_count).await?;
        }
    }
    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::analyzer::AudioTrackInfo;

    fn track(index: i64, language: Option<&str>, is_default: bool) -> AudioTrackInfo {
        AudioTrackInfo {
            index,
            language: language.map(String::from),
            is_default,
            ..AudioTrackInfo::default()
        }
    }

    fn scanner_with_auto_fix(enabled: bool) -> MediaScanner {
        MediaScanner::new(
            ScannerOptions {
                preferences: AudioPreferences {
                    auto_fix_english_default_non_anime: enabled,
                    ..AudioPreferences::default()
                },
                ..ScannerOptions::default()
            },
            None,
        )
    }

    #[test]
    fn test_fix_index_none_when_english_already_default() {
        let scanner = scanner_with_auto_fix(true);
        let tracks = vec![track(0, Some("en"), true), track(1, Some("ja"), false)];
        assert_eq!(scanner.get_english_default_fix_index(&tracks), None);
    }

    #[test]
    fn test_fix_index_finds_english_when_other_default() {
        let scanner = scanner_with_auto_fix(true);
        let tracks = vec![track(0, Some("ja"), true), track(1, Some("en"), false)];
        assert_eq!(scanner.get_english_default_fix_index(&tracks), Some(1));
    }

    #[test]
    fn test_fix_index_none_without_english_track() {
        let scanner = scanner_with_auto_fix(true);
        let tracks = vec![track(0, Some("ja"), true), track(1, Some("de"), false)];
        assert_eq!(scanner.get_english_default_fix_index(&tracks), None);
    }

    #[tokio::test]
    async fn test_auto_fix_skips_when_disabled() {
        let scanner = scanner_with_auto_fix(false);
        let info = AudioInfo {
            audio_tracks: vec![track(0, Some("ja"), true), track(1, Some("en"), false)],
            ..AudioInfo::default()
        };

        let result = scanner
            .auto_fix_default_track(Path::new("/media/movies/file.mkv"), info.clone(), false)
            .await;
        assert_eq!(result.audio_tracks.len(), info.audio_tracks.len());
        assert!(result.audio_tracks[0].is_default);
    }

    #[tokio::test]
    async fn test_auto_fix_skips_anime() {
        let scanner = scanner_with_auto_fix(true);
        let info = AudioInfo {
            audio_tracks: vec![track(0, Some("ja"), true), track(1, Some("en"), false)],
            ..AudioInfo::default()
        };

        let result = scanner
            .auto_fix_default_track(Path::new("/media/anime/episode.mkv"), info, true)
            .await;
        // Untouched: the Japanese default track is still the default.
        assert!(result.audio_tracks[0].is_default);
        assert!(!result.audio_tracks[1].is_default);
    }

    #[tokio::test]
    async fn test_auto_fix_never_touches_non_mkv() {
        let scanner = scanner_with_auto_fix(true);
        let info = AudioInfo {
            audio_tracks: vec![track(0, Some("ja"), true), track(1, Some("en"), false)],
            ..AudioInfo::default()
        };

        let result = scanner
            .auto_fix_default_track(Path::new("/media/movies/file.mp4"), info, false)
            .await;
        assert!(result.audio_tracks[0].is_default);
    }

    #[test]
    fn test_discover_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        std::fs::create_dir_all(base.join("Show B/Season 01")).unwrap();
        std::fs::create_dir_all(base.join("Show A")).unwrap();
        std::fs::create_dir_all(base.join(".hidden")).unwrap();
        std::fs::write(base.join("Show B/Season 01/S01E01.mkv"), b"x").unwrap();
        std::fs::write(base.join("Show A/movie.mp4"), b"x").unwrap();
        std::fs::write(base.join("Show A/notes.txt"), b"x").unwrap();
        std::fs::write(base.join("Show A/.sample.mkv"), b"x").unwrap();
        std::fs::write(base.join(".hidden/secret.mkv"), b"x").unwrap();

        let scanner = MediaScanner::new(ScannerOptions::default(), None);
        let files = scanner.discover_files(base).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|f| f.strip_prefix(base).unwrap().to_string_lossy().to_string())
            .collect();

        assert_eq!(
            names,
            vec![
                "Show A/movie.mp4".to_string(),
                "Show B/Season 01/S01E01.mkv".to_string(),
            ]
        );
    }

    #[test]
    fn test_discover_files_missing_location_errors() {
        let scanner = MediaScanner::new(ScannerOptions::default(), None);
        assert!(scanner.discover_files(Path::new("/nonexistent/path")).is_err());
    }

    #[test]
    fn test_extension_normalization() {
        let scanner = MediaScanner::new(
            ScannerOptions {
                extensions: vec![".MKV".to_string(), "mp4".to_string()],
                ..ScannerOptions::default()
            },
            None,
        );
        assert!(scanner.extensions.contains("mkv"));
        assert!(scanner.extensions.contains("mp4"));
        assert_eq!(scanner.extensions.len(), 2);
    }
}
