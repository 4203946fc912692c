//! Integration tests for the scan pipeline
//!
//! These tests drive the real scanner against temp directories and an
//! in-memory SQLite database. ffprobe is replaced by a shell stub that
//! prints canned JSON, so track contents are deterministic and the tests
//! run without any media tooling installed.

#![cfg(unix)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use assert_matches::assert_matches;
use tempfile::TempDir;
use uuid::Uuid;

use cineaudit::db::users::UpsertUser;
use cineaudit::db::{
    Database, MediaKind, MediaFileRepository, ScanLocationRepository, ShowRepository,
    audio_tracks, media_files, scan_locations,
};
use cineaudit::db::{CreateScanLocation, UserRepository};
use cineaudit::services::plex::{CatalogProvider, CatalogShow};
use cineaudit::services::preference_engine::AudioPreferences;
use cineaudit::services::scan_state::ScanStateManager;
use cineaudit::services::scanner::{MediaScanner, ScanRequest, ScannerOptions, run_scan};

// ============================================================================
// Fixtures
// ============================================================================

/// Two-track probe result: Japanese default + English secondary
const DUAL_TRACK_JSON: &str = r#"{
  "format": { "format_name": "matroska,webm", "duration": "1420.5" },
  "streams": [
    { "codec_type": "video", "codec_name": "hevc" },
    {
      "codec_type": "audio", "codec_name": "aac", "channels": 2,
      "disposition": { "default": 1, "forced": 0 },
      "tags": { "language": "jpn" }
    },
    {
      "codec_type": "audio", "codec_name": "ac3", "channels": 6,
      "disposition": { "default": 0, "forced": 0 },
      "tags": { "language": "eng" }
    }
  ]
}"#;

/// Single-track probe result used to exercise full track replacement
const SINGLE_TRACK_JSON: &str = r#"{
  "format": { "format_name": "matroska,webm", "duration": "1420.5" },
  "streams": [
    {
      "codec_type": "audio", "codec_name": "flac", "channels": 2,
      "disposition": { "default": 1, "forced": 0 },
      "tags": { "language": "eng" }
    }
  ]
}"#;

struct Fixture {
    _dir: TempDir,
    media_root: PathBuf,
    probe_json: PathBuf,
    ffprobe: PathBuf,
    db: Database,
    state: ScanStateManager,
    user_id: Uuid,
}

impl Fixture {
    async fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let media_root = dir.path().join("media");
        std::fs::create_dir_all(&media_root).unwrap();

        // ffprobe stub: prints whatever JSON the test last wrote
        let probe_json = dir.path().join("probe_output.json");
        std::fs::write(&probe_json, DUAL_TRACK_JSON).unwrap();
        let ffprobe = dir.path().join("ffprobe");
        std::fs::write(&ffprobe, format!("#!/bin/sh\ncat '{}'\n", probe_json.display())).unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&ffprobe, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let db = Database::connect_in_memory().await.expect("db");
        db.init_schema().await.expect("schema");

        let user = UserRepository::new(db.pool().clone())
            .upsert(UpsertUser {
                plex_user_id: "1000".to_string(),
                plex_username: "tester".to_string(),
                plex_email: None,
                plex_token: "plex-token".to_string(),
                plex_thumb_url: None,
            })
            .await
            .expect("user");

        Self {
            _dir: dir,
            media_root,
            probe_json,
            ffprobe,
            db,
            state: ScanStateManager::new(),
            user_id: user.id,
        }
    }

    fn scanner(&self) -> MediaScanner {
        self.scanner_with(AudioPreferences::default(), None)
    }

    fn scanner_with(
        &self,
        preferences: AudioPreferences,
        provider: Option<Arc<dyn CatalogProvider>>,
    ) -> MediaScanner {
        MediaScanner::new(
            ScannerOptions {
                preferences,
                ffprobe_path: self.ffprobe.to_string_lossy().to_string(),
                mkvpropedit_path: "/nonexistent/mkvpropedit".to_string(),
                ..ScannerOptions::default()
            },
            provider,
        )
    }

    fn write_media_file(&self, relative: &str) -> PathBuf {
        let path = self.media_root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"fake media payload").unwrap();
        path
    }

    fn set_probe_output(&self, json: &str) {
        std::fs::write(&self.probe_json, json).unwrap();
    }

    /// Push a file's mtime past its stored value so a re-scan re-analyzes
    fn touch_into_future(&self, path: &Path) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(5))
            .unwrap();
    }

    async fn process(
        &self,
        scanner: &MediaScanner,
        path: &Path,
        kind: MediaKind,
        incremental: bool,
    ) -> Option<cineaudit::db::MediaFileRecord> {
        let mut conn = self.db.pool().acquire().await.unwrap();
        scanner
            .process_file(
                &mut conn,
                &self.state,
                path,
                &self.media_root,
                kind,
                self.user_id,
                incremental,
            )
            .await
    }

    fn request(&self, incremental: bool) -> ScanRequest {
        let location = self.media_root.to_string_lossy().to_string();
        ScanRequest {
            locations: vec![location.clone()],
            location_kinds: HashMap::from([(location, MediaKind::Tv)]),
            user_id: self.user_id,
            incremental,
        }
    }
}

struct StubCatalog {
    shows: Vec<CatalogShow>,
}

#[async_trait::async_trait]
impl CatalogProvider for StubCatalog {
    async fn fetch_catalog(&self) -> anyhow::Result<Vec<CatalogShow>> {
        Ok(self.shows.clone())
    }
}

// ============================================================================
// process_file
// ============================================================================

#[tokio::test]
async fn test_process_file_builds_catalog_rows() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Attack on Titan/Season 01/S01E05 - Title.mkv");
    let scanner = fx.scanner();

    let record = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("file should process");

    assert_eq!(record.filename, "S01E05 - Title.mkv");
    assert_matches!(record.episode_number, Some(5));
    assert_eq!(record.container_format.as_deref(), Some("Matroska"));
    assert_eq!(record.duration_ms, Some(1_420_500));
    assert!(record.show_id.is_some());
    assert!(record.season_id.is_some());

    // Japanese default with English present: wrong-default warning only.
    assert!(record.has_issues);
    let details = record.issue_details.expect("issue details");
    assert!(details.contains("Default audio is 'ja'"), "{}", details);
    assert!(!details.contains("Missing English"), "{}", details);

    let tracks = audio_tracks::list_by_file(fx.db.pool(), record.id).await.unwrap();
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[0].track_index, 0);
    assert_eq!(tracks[0].language.as_deref(), Some("ja"));
    assert!(tracks[0].is_default);
    assert_eq!(tracks[1].language.as_deref(), Some("en"));
    assert_eq!(tracks[1].channel_layout.as_deref(), Some("5.1"));

    let show = ShowRepository::new(fx.db.pool().clone())
        .get_by_id(fx.user_id, record.show_id.unwrap())
        .await
        .unwrap()
        .expect("show row");
    assert_eq!(show.title, "Attack on Titan");
    assert_eq!(show.media_kind, "tv");
    assert!(!show.is_anime);
}

#[tokio::test]
async fn test_unchanged_file_is_skipped_without_writes() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Show/Season 01/S01E01.mkv");
    let scanner = fx.scanner();

    let first = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("first pass");
    let first_tracks = audio_tracks::list_by_file(fx.db.pool(), first.id).await.unwrap();

    let second = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("second pass");
    let second_tracks = audio_tracks::list_by_file(fx.db.pool(), second.id).await.unwrap();

    // Identical record, identical rows — the fast path performed no writes.
    assert_eq!(first.id, second.id);
    assert_eq!(first.last_scanned, second.last_scanned);
    assert_eq!(first.last_modified, second.last_modified);
    assert_eq!(first_tracks.len(), second_tracks.len());
    for (a, b) in first_tracks.iter().zip(&second_tracks) {
        assert_eq!(a.id, b.id);
    }
}

#[tokio::test]
async fn test_non_incremental_scan_reanalyzes_unchanged_files() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Show/Season 01/S01E01.mkv");
    let scanner = fx.scanner();

    let first = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("first pass");
    let first_tracks = audio_tracks::list_by_file(fx.db.pool(), first.id).await.unwrap();

    let second = fx
        .process(&scanner, &file, MediaKind::Tv, false)
        .await
        .expect("full rescan");
    let second_tracks = audio_tracks::list_by_file(fx.db.pool(), second.id).await.unwrap();

    // Same logical row, freshly rebuilt tracks.
    assert_eq!(first.id, second.id);
    assert_eq!(second_tracks.len(), first_tracks.len());
    for (a, b) in first_tracks.iter().zip(&second_tracks) {
        assert_ne!(a.id, b.id);
    }
}

#[tokio::test]
async fn test_modified_file_fully_replaces_tracks() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Show/Season 01/S01E01.mkv");
    let scanner = fx.scanner();

    let record = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("first pass");
    assert_eq!(
        audio_tracks::list_by_file(fx.db.pool(), record.id).await.unwrap().len(),
        2
    );

    // The file changes on disk and now probes with a single track.
    fx.set_probe_output(SINGLE_TRACK_JSON);
    fx.touch_into_future(&file);

    let updated = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("re-scan");

    assert_eq!(updated.id, record.id);
    let tracks = audio_tracks::list_by_file(fx.db.pool(), updated.id).await.unwrap();
    assert_eq!(tracks.len(), 1, "no residual rows from the prior version");
    assert_eq!(tracks[0].language.as_deref(), Some("en"));
    assert_eq!(tracks[0].codec.as_deref(), Some("flac"));
    // English-only default track satisfies the default preferences.
    assert!(!updated.has_issues);
}

#[tokio::test]
async fn test_probe_failure_degrades_to_no_audio() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Show/Season 01/S01E01.mkv");

    let scanner = MediaScanner::new(
        ScannerOptions {
            ffprobe_path: "/nonexistent/ffprobe".to_string(),
            ..ScannerOptions::default()
        },
        None,
    );

    let record = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("degraded analysis still records the file");

    assert_eq!(record.container_format.as_deref(), Some("Matroska"));
    assert!(record.has_issues);
    assert!(record.issue_details.unwrap().contains("No audio tracks found"));
    assert!(
        audio_tracks::list_by_file(fx.db.pool(), record.id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_anime_location_flags_dual_audio() {
    let fx = Fixture::new().await;
    fx.set_probe_output(SINGLE_TRACK_JSON); // English only
    let file = fx.write_media_file("Frieren/Season 01/S01E01.mkv");
    let scanner = fx.scanner();

    let record = fx
        .process(&scanner, &file, MediaKind::Anime, true)
        .await
        .expect("process");

    let details = record.issue_details.expect("issues");
    assert!(details.contains("Missing Japanese"), "{}", details);
    assert!(details.contains("dual audio"), "{}", details);

    let show = ShowRepository::new(fx.db.pool().clone())
        .get_by_id(fx.user_id, record.show_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(show.is_anime);
    assert_eq!(show.anime_source.as_deref(), Some("folder"));
}

#[tokio::test]
async fn test_identity_match_corrects_title_and_upgrades_tv_to_anime() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Shingeki no Kyojin/Season 01/S01E01.mkv");

    let provider = Arc::new(StubCatalog {
        shows: vec![CatalogShow {
            rating_key: "77".to_string(),
            title: "Attack on Titan".to_string(),
            original_title: Some("Shingeki no Kyojin".to_string()),
            year: Some(2013),
            genres: vec!["Anime".to_string()],
            thumb_url: Some("/thumb/77".to_string()),
            is_anime: true,
            episode_paths: Vec::new(),
        }],
    });
    let scanner = fx.scanner_with(AudioPreferences::default(), Some(provider));

    let record = fx
        .process(&scanner, &file, MediaKind::Tv, true)
        .await
        .expect("process");

    let show = ShowRepository::new(fx.db.pool().clone())
        .get_by_id(fx.user_id, record.show_id.unwrap())
        .await
        .unwrap()
        .unwrap();

    // The external identity wins over the folder-derived title, and genre
    // evidence upgrades the TV-declared location to anime.
    assert_eq!(show.title, "Attack on Titan");
    assert_eq!(show.plex_rating_key.as_deref(), Some("77"));
    assert!(show.is_anime);
    assert_eq!(show.anime_source.as_deref(), Some("plex_genre"));

    // A second file under the same folder reuses the corrected row.
    let sibling = fx.write_media_file("Shingeki no Kyojin/Season 01/S01E02.mkv");
    let second = fx
        .process(&scanner, &sibling, MediaKind::Tv, true)
        .await
        .expect("process");
    assert_eq!(second.show_id, record.show_id);
}

#[tokio::test]
async fn test_movie_links_without_season() {
    let fx = Fixture::new().await;
    fx.set_probe_output(SINGLE_TRACK_JSON);
    let file = fx.write_media_file("Inception (2010)/Inception.mkv");
    let scanner = fx.scanner();

    let record = fx
        .process(&scanner, &file, MediaKind::Movie, true)
        .await
        .expect("process");

    assert!(record.season_id.is_none());
    assert_eq!(record.episode_number, None);

    let show = ShowRepository::new(fx.db.pool().clone())
        .get_by_id(fx.user_id, record.show_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(show.title, "Inception (2010)");
    assert_eq!(show.media_kind, "movie");
}

// ============================================================================
// run_scan
// ============================================================================

#[tokio::test]
async fn test_run_scan_processes_everything_and_updates_stats() {
    let fx = Fixture::new().await;
    fx.write_media_file("Show A/Season 01/S01E01.mkv");
    fx.write_media_file("Show A/Season 01/S01E02.mkv");
    fx.write_media_file("Show B/Season 02/S02E01.mkv");
    fx.write_media_file("Show B/notes.txt");

    let location_path = fx.media_root.to_string_lossy().to_string();
    ScanLocationRepository::new(fx.db.pool().clone())
        .create(CreateScanLocation {
            user_id: fx.user_id,
            path: location_path.clone(),
            label: "TV".to_string(),
            media_kind: MediaKind::Tv,
            enabled: true,
        })
        .await
        .unwrap();

    let scanner = fx.scanner();
    run_scan(&fx.db, &fx.state, &scanner, fx.request(true)).await;

    let status = fx.state.get_status(fx.user_id).await;
    assert!(!status.is_running);
    assert_eq!(status.files_total, 3);
    assert_eq!(status.files_scanned, 3);
    assert!(status.errors.is_empty(), "errors: {:?}", status.errors);
    assert_eq!(status.current_file, None);
    assert_eq!(status.current_location, None);

    let files = MediaFileRepository::new(fx.db.pool().clone());
    assert_eq!(files.count_all(fx.user_id).await.unwrap(), 3);

    let mut conn = fx.db.pool().acquire().await.unwrap();
    let location = scan_locations::find_by_path(&mut conn, fx.user_id, &location_path)
        .await
        .unwrap()
        .expect("location row");
    assert_eq!(location.file_count, 3);
    assert!(location.last_scanned.is_some());
}

#[tokio::test]
async fn test_run_scan_missing_location_records_error_and_finishes() {
    let fx = Fixture::new().await;
    let missing = fx.media_root.join("does-not-exist");

    let scanner = fx.scanner();
    let location = missing.to_string_lossy().to_string();
    let request = ScanRequest {
        locations: vec![location.clone()],
        location_kinds: HashMap::from([(location, MediaKind::Tv)]),
        user_id: fx.user_id,
        incremental: true,
    };
    run_scan(&fx.db, &fx.state, &scanner, request).await;

    let status = fx.state.get_status(fx.user_id).await;
    assert!(!status.is_running);
    assert_eq!(status.errors.len(), 1);
    assert!(status.errors[0].contains("does-not-exist"));
}

#[tokio::test]
async fn test_cancelled_scan_stops_early_and_goes_idle() {
    let fx = Fixture::new().await;
    for i in 0..5 {
        fx.write_media_file(&format!("Show/Season 01/S01E{:02}.mkv", i + 1));
    }

    fx.state.start_scan(fx.user_id).await.expect("reserve slot");
    fx.state.cancel_scan(fx.user_id).await.expect("request cancel");

    let scanner = fx.scanner();
    run_scan(&fx.db, &fx.state, &scanner, fx.request(true)).await;

    let status = fx.state.get_status(fx.user_id).await;
    assert!(!status.is_running, "finish_scan must still run");

    // Cancellation was requested before the first file; nothing was
    // processed, and already-committed state would have been retained.
    let files = MediaFileRepository::new(fx.db.pool().clone());
    assert_eq!(files.count_all(fx.user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_per_file_failure_is_recorded_and_skipped() {
    let fx = Fixture::new().await;
    let present = fx.write_media_file("Show/Season 01/S01E01.mkv");
    // Discovered-then-vanished files surface as per-file errors, not
    // scan aborts: drive process_file directly with a missing path.
    let missing = fx.media_root.join("Show/Season 01/S01E02.mkv");

    let scanner = fx.scanner();
    assert!(
        fx.process(&scanner, &missing, MediaKind::Tv, true)
            .await
            .is_none()
    );
    assert!(
        fx.process(&scanner, &present, MediaKind::Tv, true)
            .await
            .is_some(),
        "a failed file must not poison later ones"
    );

    let status = fx.state.get_status(fx.user_id).await;
    assert_eq!(status.errors.len(), 1, "errors: {:?}", status.errors);
    assert!(status.errors[0].contains("S01E02"));

    let files = MediaFileRepository::new(fx.db.pool().clone());
    assert_eq!(files.count_all(fx.user_id).await.unwrap(), 1);
}

// ============================================================================
// User isolation
// ============================================================================

#[tokio::test]
async fn test_scan_results_are_scoped_per_user() {
    let fx = Fixture::new().await;
    fx.write_media_file("Show/Season 01/S01E01.mkv");

    let other = UserRepository::new(fx.db.pool().clone())
        .upsert(UpsertUser {
            plex_user_id: "2000".to_string(),
            plex_username: "other".to_string(),
            plex_email: None,
            plex_token: "other-token".to_string(),
            plex_thumb_url: None,
        })
        .await
        .unwrap();

    let scanner = fx.scanner();
    run_scan(&fx.db, &fx.state, &scanner, fx.request(true)).await;

    let files = MediaFileRepository::new(fx.db.pool().clone());
    assert_eq!(files.count_all(fx.user_id).await.unwrap(), 1);
    assert_eq!(files.count_all(other.id).await.unwrap(), 0);

    let shows = ShowRepository::new(fx.db.pool().clone());
    let (other_shows, total) = shows.list(other.id, None, None, 50, 0).await.unwrap();
    assert!(other_shows.is_empty());
    assert_eq!(total, 0);
}

// ============================================================================
// Incremental scans via mtime comparisons at the db layer
// ============================================================================

#[tokio::test]
async fn test_rescan_keeps_single_row_per_path() {
    let fx = Fixture::new().await;
    let file = fx.write_media_file("Show/Season 01/S01E01.mkv");
    let scanner = fx.scanner();

    fx.process(&scanner, &file, MediaKind::Tv, true).await.unwrap();
    fx.touch_into_future(&file);
    fx.process(&scanner, &file, MediaKind::Tv, true).await.unwrap();

    let mut conn = fx.db.pool().acquire().await.unwrap();
    let record = media_files::find_by_path(&mut conn, fx.user_id, &file.to_string_lossy())
        .await
        .unwrap();
    assert!(record.is_some());
    // Release the single pooled connection before acquiring another below;
    // the in-memory test pool is capped at one connection.
    drop(conn);

    let files = MediaFileRepository::new(fx.db.pool().clone());
    assert_eq!(files.count_all(fx.user_id).await.unwrap(), 1);
}
