//! Default audio track flag rewriting via mkvpropedit
//!
//! Only MKV containers are touched; every function reports success as a
//! boolean and never raises an error into the caller. mkvpropedit
//! addresses audio tracks as `track:aN` with N 1-based among audio
//! tracks, which lines up with the analyzer's zero-based ordinals.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::services::analyzer::AudioTrackInfo;

/// Utility wrapping the mkvpropedit executable
#[derive(Debug, Clone)]
pub struct AudioFixer {
    mkvpropedit_path: String,
}

impl AudioFixer {
    pub fn new() -> Self {
        Self {
            mkvpropedit_path: "mkvpropedit".to_string(),
        }
    }

    pub fn with_mkvpropedit_path(mkvpropedit_path: String) -> Self {
        Self { mkvpropedit_path }
    }

    /// Check if mkvpropedit is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.mkvpropedit_path)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Set the given audio track index as the container default for an
    /// MKV file, clearing the flag on all other audio tracks first.
    pub async fn set_default_track_by_index(
        &self,
        file_path: &Path,
        tracks: &[AudioTrackInfo],
        track_index: i64,
    ) -> bool {
        let is_mkv = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("mkv"))
            .unwrap_or(false);
        if !is_mkv {
            return false;
        }

        if !self.is_available().await {
            warn!("mkvpropedit not available, cannot rewrite default track");
            return false;
        }

        let mut valid_indexes: Vec<i64> = tracks.iter().map(|t| t.index).collect();
        valid_indexes.sort_unstable();
        valid_indexes.dedup();
        if !valid_indexes.contains(&track_index) {
            return false;
        }

        let mut command = Command::new(&self.mkvpropedit_path);
        command.arg(file_path);
        for idx in &valid_indexes {
            command
                .args(["--edit", &format!("track:a{}", idx + 1)])
                .args(["--set", "flag-default=0"]);
        }
        command
            .args(["--edit", &format!("track:a{}", track_index + 1)])
            .args(["--set", "flag-default=1"]);

        match command.output().await {
            Ok(output) if output.status.success() => {
                debug!(path = %file_path.display(), track_index, "Rewrote default audio track");
                true
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(
                    path = %file_path.display(),
                    error = %stderr.trim(),
                    "mkvpropedit failed"
                );
                false
            }
            Err(e) => {
                warn!(path = %file_path.display(), error = %e, "Failed to execute mkvpropedit");
                false
            }
        }
    }

    /// Set the first track matching the language as the default
    pub async fn set_default_track_by_language(
        &self,
        file_path: &Path,
        tracks: &[AudioTrackInfo],
        language: &str,
    ) -> bool {
        match find_track_index_for_language(tracks, language) {
            Some(index) => {
                self.set_default_track_by_index(file_path, tracks, index)
                    .await
            }
            None => false,
        }
    }
}

impl Default for AudioFixer {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the first audio track index matching the requested language
pub fn find_track_index_for_language(tracks: &[AudioTrackInfo], language: &str) -> Option<i64> {
    let normalized = language.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    tracks
        .iter()
        .find(|track| {
            track
                .language
                .as_ref()
                .map(|l| l.to_lowercase() == normalized)
                .unwrap_or(false)
        })
        .map(|track| track.index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(index: i64, language: Option<&str>) -> AudioTrackInfo {
        AudioTrackInfo {
            index,
            language: language.map(String::from),
            ..AudioTrackInfo::default()
        }
    }

    #[test]
    fn test_find_track_index_for_language() {
        let tracks = vec![track(0, Some("ja")), track(1, Some("en")), track(2, Some("en"))];
        assert_eq!(find_track_index_for_language(&tracks, "en"), Some(1));
        assert_eq!(find_track_index_for_language(&tracks, "EN"), Some(1));
        assert_eq!(find_track_index_for_language(&tracks, "de"), None);
        assert_eq!(find_track_index_for_language(&tracks, ""), None);
    }

    #[test]
    fn test_untagged_tracks_never_match() {
        let tracks = vec![track(0, None)];
        assert_eq!(find_track_index_for_language(&tracks, "en"), None);
    }

    #[tokio::test]
    async fn test_non_mkv_is_never_touched() {
        let fixer = AudioFixer::new();
        let tracks = vec![track(0, Some("en"))];
        assert!(
            !fixer
                .set_default_track_by_index(Path::new("/media/movie.mp4"), &tracks, 0)
                .await
        );
    }

    #[tokio::test]
    async fn test_unknown_index_is_rejected() {
        // Rejected before any subprocess is spawned, so this is safe even
        // without mkvtoolnix installed.
        let fixer = AudioFixer::with_mkvpropedit_path("/nonexistent/mkvpropedit".to_string());
        let tracks = vec![track(0, Some("en"))];
        assert!(
            !fixer
                .set_default_track_by_index(Path::new("/media/movie.mkv"), &tracks, 5)
                .await
        );
    }
}
