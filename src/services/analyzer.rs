//! Audio track analysis via ffprobe
//!
//! Runs ffprobe with JSON output to extract container and per-track audio
//! metadata, then normalizes language tags and channel layouts into the
//! canonical records the rest of the pipeline consumes. ffprobe's JSON
//! format is stable and better documented than the native bindings.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

/// ISO 639-2 codes and full language names mapped to ISO 639-1
const LANGUAGE_MAP: &[(&str, Option<&str>)] = &[
    ("eng", Some("en")),
    ("jpn", Some("ja")),
    ("ger", Some("de")),
    ("deu", Some("de")),
    ("fre", Some("fr")),
    ("fra", Some("fr")),
    ("spa", Some("es")),
    ("ita", Some("it")),
    ("por", Some("pt")),
    ("rus", Some("ru")),
    ("chi", Some("zh")),
    ("zho", Some("zh")),
    ("kor", Some("ko")),
    ("ara", Some("ar")),
    ("hin", Some("hi")),
    ("pol", Some("pl")),
    ("dut", Some("nl")),
    ("nld", Some("nl")),
    ("swe", Some("sv")),
    ("nor", Some("no")),
    ("dan", Some("da")),
    ("fin", Some("fi")),
    ("tur", Some("tr")),
    ("heb", Some("he")),
    ("tha", Some("th")),
    ("vie", Some("vi")),
    ("ind", Some("id")),
    ("msa", Some("ms")),
    ("fil", Some("tl")),
    ("und", None),
    ("english", Some("en")),
    ("japanese", Some("ja")),
    ("german", Some("de")),
    ("french", Some("fr")),
    ("spanish", Some("es")),
    ("italian", Some("it")),
    ("portuguese", Some("pt")),
    ("russian", Some("ru")),
    ("chinese", Some("zh")),
    ("korean", Some("ko")),
    ("arabic", Some("ar")),
    ("hindi", Some("hi")),
];

/// Normalize a language tag to ISO 639-1 (2-letter) form.
///
/// Accepts ISO 639-1 (passed through), ISO 639-2 (mapped), full names
/// (mapped), and `und`/empty (None). Unknown tags of 3+ letters keep
/// their first two letters, which covers most untabled 639-2 codes.
pub fn normalize_language(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim().to_lowercase();
    if raw.is_empty() {
        return None;
    }

    if raw.len() == 2 && raw != "un" {
        return Some(raw);
    }

    if let Some((_, mapped)) = LANGUAGE_MAP.iter().find(|(key, _)| *key == raw) {
        return mapped.map(String::from);
    }

    if raw.chars().count() >= 2 {
        return Some(raw.chars().take(2).collect());
    }

    None
}

/// Infer a language from a track title ("English Commentary", "Japanese 5.1")
fn language_from_title(title: &str) -> Option<String> {
    let title_lower = title.to_lowercase();
    LANGUAGE_MAP
        .iter()
        .find(|(name, code)| code.is_some() && title_lower.contains(name))
        .and_then(|(_, code)| code.map(String::from))
}

/// Map a channel count to a conventional layout label, preferring an
/// explicit layout string from the probe when present.
pub fn parse_channel_layout(channels: i64, layout: Option<&str>) -> String {
    if let Some(layout) = layout {
        if !layout.is_empty() {
            return layout.to_string();
        }
    }

    match channels {
        1 => "1.0".to_string(),
        2 => "2.0".to_string(),
        3 => "2.1".to_string(),
        6 => "5.1".to_string(),
        7 => "6.1".to_string(),
        8 => "7.1".to_string(),
        n => format!("{}ch", n),
    }
}

/// Canonical per-track record produced by analysis
#[derive(Debug, Clone, Default)]
pub struct AudioTrackInfo {
    /// Zero-based ordinal among the file's audio tracks
    pub index: i64,
    /// Normalized ISO 639-1 language, if known
    pub language: Option<String>,
    /// Language tag exactly as read from the container
    pub language_raw: Option<String>,
    pub codec: Option<String>,
    pub channels: Option<i64>,
    pub channel_layout: Option<String>,
    pub bitrate: Option<i64>,
    pub is_default: bool,
    pub is_forced: bool,
    pub title: Option<String>,
}

/// Analysis result for one media file
#[derive(Debug, Clone, Default)]
pub struct AudioInfo {
    pub container: Option<String>,
    pub duration_ms: Option<i64>,
    pub audio_tracks: Vec<AudioTrackInfo>,
    /// Set when ffprobe was unavailable or failed and only
    /// extension-based container guessing was possible
    pub degraded: bool,
}

/// ffprobe JSON output structures
mod ffprobe {
    use super::*;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub format: Option<Format>,
        pub streams: Option<Vec<Stream>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub format_name: Option<String>,
        pub duration: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_name: Option<String>,
        pub codec_type: Option<String>,
        pub channels: Option<i64>,
        pub channel_layout: Option<String>,
        pub bit_rate: Option<String>,
        pub disposition: Option<Disposition>,
        pub tags: Option<HashMap<String, String>>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Disposition {
        pub default: Option<i32>,
        pub forced: Option<i32>,
    }
}

/// Friendly container names for common ffprobe demuxer strings and, in
/// the degraded path, file extensions
fn container_from_format_name(format_name: &str) -> String {
    let lower = format_name.to_lowercase();
    if lower.contains("matroska") {
        "Matroska".to_string()
    } else if lower.contains("mp4") {
        "MPEG-4".to_string()
    } else if lower.contains("avi") {
        "AVI".to_string()
    } else if lower.contains("asf") {
        "Windows Media".to_string()
    } else {
        format_name.to_string()
    }
}

fn container_from_extension(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    let name = match ext.as_str() {
        "mkv" => "Matroska",
        "mp4" | "m4v" => "MPEG-4",
        "avi" => "AVI",
        "mov" => "QuickTime",
        "wmv" => "Windows Media",
        _ => return None,
    };
    Some(name.to_string())
}

/// ffprobe-backed analyzer for extracting audio track information
#[derive(Debug, Clone)]
pub struct AudioAnalyzer {
    ffprobe_path: String,
}

impl AudioAnalyzer {
    pub fn new() -> Self {
        Self {
            ffprobe_path: "ffprobe".to_string(),
        }
    }

    pub fn with_ffprobe_path(ffprobe_path: String) -> Self {
        Self { ffprobe_path }
    }

    /// Check if ffprobe is available
    pub async fn is_available(&self) -> bool {
        Command::new(&self.ffprobe_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    /// Analyze a media file. Never fails: when ffprobe is unavailable or
    /// errors, returns a degraded result with an extension-guessed
    /// container and no tracks so the scan can continue.
    pub async fn analyze(&self, path: &Path) -> AudioInfo {
        match self.probe(path).await {
            Ok(info) => info,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ffprobe failed, using extension fallback");
                AudioInfo {
                    container: container_from_extension(path),
                    duration_ms: None,
                    audio_tracks: Vec::new(),
                    degraded: true,
                }
            }
        }
    }

    async fn probe(&self, path: &Path) -> Result<AudioInfo> {
        debug!(path = %path.display(), "Probing media file");

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error"])
            .args(["-print_format", "json"])
            .args(["-show_format", "-show_streams"])
            .arg(path)
            .output()
            .await
            .with_context(|| format!("Failed to execute ffprobe for '{}'", path.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "ffprobe failed for '{}': {}",
                path.display(),
                if stderr.is_empty() {
                    "no error output"
                } else {
                    stderr.trim()
                }
            );
        }

        let probe: ffprobe::FfprobeOutput =
            serde_json::from_slice(&output.stdout).context("Failed to parse ffprobe JSON output")?;

        Ok(convert_probe_output(probe))
    }
}

impl Default for AudioAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

fn convert_probe_output(probe: ffprobe::FfprobeOutput) -> AudioInfo {
    let container = probe
        .format
        .as_ref()
        .and_then(|f| f.format_name.as_deref())
        .map(container_from_format_name);

    let duration_ms = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as i64);

    let mut audio_tracks = Vec::new();
    let mut audio_index: i64 = 0;

    for stream in probe.streams.unwrap_or_default() {
        if stream.codec_type.as_deref() != Some("audio") {
            continue;
        }

        let tags = stream.tags.unwrap_or_default();
        let language_raw = tags.get("language").cloned();
        let title = tags.get("title").cloned();

        let mut language = normalize_language(language_raw.as_deref());
        if language.is_none() {
            if let Some(title) = &title {
                language = language_from_title(title);
            }
        }

        let disposition = stream.disposition.as_ref();
        let is_default = disposition
            .and_then(|d| d.default)
            .map(|v| v == 1)
            // Containers without disposition flags treat the first audio
            // track as the player default.
            .unwrap_or(audio_index == 0);
        let is_forced = disposition.and_then(|d| d.forced).unwrap_or(0) == 1;

        let channel_layout = stream
            .channels
            .map(|n| parse_channel_layout(n, stream.channel_layout.as_deref()));

        audio_tracks.push(AudioTrackInfo {
            index: audio_index,
            language,
            language_raw,
            codec: stream.codec_name,
            channels: stream.channels,
            channel_layout,
            bitrate: stream.bit_rate.as_ref().and_then(|b| b.parse().ok()),
            is_default,
            is_forced,
            title,
        });
        audio_index += 1;
    }

    AudioInfo {
        container,
        duration_ms,
        audio_tracks,
        degraded: false,
    }
}
