//! Path-based show/season/episode inference
//!
//! Derives catalog placement from the file's path relative to its scan
//! location, e.g.:
//! - "Attack on Titan/Season 01/S01E05 - Title.mkv"
//! - "Chicago Fire/S14E08 1080p WEB h264.mkv"
//! - "Chicago Fire - S14E08 - Counting Your Losses.mkv"
//!
//! Pure and deterministic; the scanner decides what to do with a miss.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

/// Show, season, and episode inferred from a relative path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShowPathInfo {
    pub show: Option<String>,
    pub season: Option<i64>,
    pub episode: Option<i64>,
}

/// Ordered patterns matched against the path below the scan location.
/// The first match wins.
static SHOW_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // Show Name/Season 01/E01 - Title.mkv
        Regex::new(r"(?i)^(?P<show>.+?)[/\\]Season\s*(?P<season>\d+)[/\\].*?[Ee](?P<episode>\d+)")
            .unwrap(),
        // Show Name/S01E01 - Title.mkv
        Regex::new(r"(?i)^(?P<show>.+?)[/\\][Ss](?P<season>\d+)[Ee](?P<episode>\d+)").unwrap(),
        // Show Name - S01E01 - Title.mkv
        Regex::new(r"(?i)^(?P<show>.+?)\s*-\s*[Ss](?P<season>\d+)[Ee](?P<episode>\d+)").unwrap(),
    ]
});

/// Normalize an inferred title: dots become spaces, surrounding
/// whitespace is dropped.
fn clean_title(raw: &str) -> String {
    raw.replace('.', " ").trim().to_string()
}

/// Path below the scan location, as matched by the patterns
fn relative_path<'a>(file_path: &'a Path, base_path: &Path) -> &'a Path {
    file_path.strip_prefix(base_path).unwrap_or(file_path)
}

/// Parse show, season, and episode information from a file path.
///
/// Falls back to "top-level folder is the show, season 1" when no
/// pattern matches; a file sitting directly under the base yields no
/// show at all.
pub fn parse_show_info(file_path: &Path, base_path: &Path) -> ShowPathInfo {
    let relative = relative_path(file_path, base_path);
    let relative_str = relative.to_string_lossy();

    for pattern in SHOW_PATTERNS.iter() {
        if let Some(caps) = pattern.captures(&relative_str) {
            let season = caps
                .name("season")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            let episode = caps
                .name("episode")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            return ShowPathInfo {
                show: caps.name("show").map(|m| clean_title(m.as_str())),
                season: Some(season),
                episode: Some(episode),
            };
        }
    }

    // Fallback: top-level folder under the base is the show name
    let parts: Vec<_> = relative.components().collect();
    if parts.len() >= 2 {
        return ShowPathInfo {
            show: Some(clean_title(&parts[0].as_os_str().to_string_lossy())),
            season: Some(1),
            episode: None,
        };
    }

    ShowPathInfo::default()
}

/// Parse a movie title from a file path.
///
/// The parent folder under the base is the title; a file directly under
/// the base uses its filename stem.
pub fn parse_movie_title(file_path: &Path, base_path: &Path) -> String {
    let relative = relative_path(file_path, base_path);
    let parts: Vec<_> = relative.components().collect();

    if parts.len() >= 2 {
        return clean_title(&parts[0].as_os_str().to_string_lossy());
    }

    clean_title(
        &file_path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default(),
    )
}
