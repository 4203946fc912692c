//! Catalog export to CSV and JSON
//!
//! Each entity has one typed projection row built from fully-resolved
//! records; the export format is a flat table either way.

use serde::Serialize;

use crate::db::{AudioTrackRecord, MediaFileRecord, ShowRecord};
use crate::db::shows::ShowCounts;

/// Flat export row for a media file and its audio tracks
#[derive(Debug, Serialize)]
pub struct MediaFileExportRow {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub episode_number: Option<i64>,
    pub file_size_mb: f64,
    pub container: Option<String>,
    pub audio_track_count: usize,
    pub audio_languages: String,
    pub audio_codecs: String,
    pub has_issues: bool,
    pub issue_details: Option<String>,
}

impl MediaFileExportRow {
    pub fn from_record(file: &MediaFileRecord, tracks: &[AudioTrackRecord]) -> Self {
        let languages: Vec<String> = tracks
            .iter()
            .filter_map(|t| {
                t.language
                    .clone()
                    .or_else(|| t.language_raw.clone())
            })
            .collect();
        let codecs: Vec<String> = tracks.iter().filter_map(|t| t.codec.clone()).collect();

        Self {
            id: file.id.to_string(),
            filename: file.filename.clone(),
            file_path: file.file_path.clone(),
            episode_number: file.episode_number,
            file_size_mb: (file.file_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
            container: file.container_format.clone(),
            audio_track_count: tracks.len(),
            audio_languages: languages.join(", "),
            audio_codecs: codecs.join(", "),
            has_issues: file.has_issues,
            issue_details: file.issue_details.clone(),
        }
    }

    const COLUMNS: &'static [&'static str] = &[
        "id",
        "filename",
        "file_path",
        "episode_number",
        "file_size_mb",
        "container",
        "audio_track_count",
        "audio_languages",
        "audio_codecs",
        "has_issues",
        "issue_details",
    ];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.filename.clone(),
            self.file_path.clone(),
            self.episode_number.map(|n| n.to_string()).unwrap_or_default(),
            format!("{}", self.file_size_mb),
            self.container.clone().unwrap_or_default(),
            self.audio_track_count.to_string(),
            self.audio_languages.clone(),
            self.audio_codecs.clone(),
            self.has_issues.to_string(),
            self.issue_details.clone().unwrap_or_default(),
        ]
    }
}

/// Flat export row for a show
#[derive(Debug, Serialize)]
pub struct ShowExportRow {
    pub id: String,
    pub title: String,
    pub media_kind: String,
    pub is_anime: bool,
    pub anime_source: Option<String>,
    pub season_count: i64,
    pub episode_count: i64,
    pub issues_count: i64,
}

impl ShowExportRow {
    pub fn from_record(show: &ShowRecord, counts: &ShowCounts) -> Self {
        Self {
            id: show.id.to_string(),
            title: show.title.clone(),
            media_kind: show.media_kind.clone(),
            is_anime: show.is_anime,
            anime_source: show.anime_source.clone(),
            season_count: counts.season_count,
            episode_count: counts.episode_count,
            issues_count: counts.issues_count,
        }
    }

    const COLUMNS: &'static [&'static str] = &[
        "id",
        "title",
        "media_kind",
        "is_anime",
        "anime_source",
        "season_count",
        "episode_count",
        "issues_count",
    ];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.title.clone(),
            self.media_kind.clone(),
            self.is_anime.to_string(),
            self.anime_source.clone().unwrap_or_default(),
            self.season_count.to_string(),
            self.episode_count.to_string(),
            self.issues_count.to_string(),
        ]
    }
}

/// Quote a CSV field when it contains a delimiter, quote, or newline
fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn to_csv(columns: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut out = String::new();
    out.push_str(&columns.join(","));
    out.push('\n');
    for row in rows {
        let escaped: Vec<String> = row.iter().map(|f| csv_escape(f)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out
}

/// Export media file rows to CSV
pub fn media_files_to_csv(rows: &[MediaFileExportRow]) -> String {
    to_csv(
        MediaFileExportRow::COLUMNS,
        rows.iter().map(|r| r.csv_fields()).collect(),
    )
}

/// Export show rows to CSV
pub fn shows_to_csv(rows: &[ShowExportRow]) -> String {
    to_csv(
        ShowExportRow::COLUMNS,
        rows.iter().map(|r| r.csv_fields()).collect(),
    )
}

/// Export any projection rows to pretty-printed JSON
pub fn to_json<T: Serialize>(rows: &[T]) -> String {
    serde_json::to_string_pretty(rows).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    use super::*;

    fn file_record(filename: &str, has_issues: bool) -> MediaFileRecord {
        MediaFileRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            show_id: None,
            season_id: None,
            file_path: format!("/media/tv/{}", filename),
            filename: filename.to_string(),
            episode_number: Some(1),
            file_size: 3 * 1024 * 1024,
            container_format: Some("Matroska".to_string()),
            duration_ms: Some(1_440_000),
            last_scanned: Utc::now(),
            last_modified: Utc::now(),
            has_issues,
            issue_details: has_issues.then(|| "Missing English audio track".to_string()),
        }
    }

    fn track_record(file_id: Uuid, language: Option<&str>, codec: &str) -> AudioTrackRecord {
        AudioTrackRecord {
            id: Uuid::new_v4(),
            media_file_id: file_id,
            track_index: 0,
            language: language.map(String::from),
            language_raw: language.map(String::from),
            codec: Some(codec.to_string()),
            channels: Some(2),
            channel_layout: Some("2.0".to_string()),
            bitrate: None,
            is_default: true,
            is_forced: false,
            title: None,
        }
    }

    #[test]
    fn test_media_file_projection() {
        let file = file_record("episode.mkv", true);
        let tracks = vec![
            track_record(file.id, Some("ja"), "aac"),
            track_record(file.id, None, "ac3"),
        ];

        let row = MediaFileExportRow::from_record(&file, &tracks);
        assert_eq!(row.audio_track_count, 2);
        assert_eq!(row.audio_languages, "ja");
        assert_eq!(row.audio_codecs, "aac, ac3");
        assert_eq!(row.file_size_mb, 3.0);
        assert!(row.has_issues);
    }

    #[test]
    fn test_csv_escaping() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("with, comma"), "\"with, comma\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_output_shape() {
        let file = file_record("a.mkv", false);
        let rows = vec![MediaFileExportRow::from_record(&file, &[])];
        let csv = media_files_to_csv(&rows);

        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,filename,file_path,episode_number,file_size_mb,container,audio_track_count,audio_languages,audio_codecs,has_issues,issue_details"
        );
        assert!(lines.next().unwrap().contains("a.mkv"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn test_json_output_is_array() {
        let file = file_record("a.mkv", false);
        let rows = vec![MediaFileExportRow::from_record(&file, &[])];
        let json = to_json(&rows);
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(parsed.is_array());
        assert_eq!(parsed[0]["filename"], "a.mkv");
    }
}
