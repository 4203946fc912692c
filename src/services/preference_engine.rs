//! Preference engine for evaluating audio track rules

use serde::{Deserialize, Serialize};

use crate::services::analyzer::AudioTrackInfo;

/// Audio preference configuration, resolved from user settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioPreferences {
    pub require_english_non_anime: bool,
    pub require_japanese_anime: bool,
    pub require_dual_audio_anime: bool,
    pub check_default_track: bool,
    /// Empty = no codec preference
    pub preferred_codecs: Vec<String>,
    pub auto_fix_english_default_non_anime: bool,
}

impl Default for AudioPreferences {
    fn default() -> Self {
        Self {
            require_english_non_anime: true,
            require_japanese_anime: true,
            require_dual_audio_anime: true,
            check_default_track: true,
            preferred_codecs: Vec::new(),
            auto_fix_english_default_non_anime: false,
        }
    }
}

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Stable issue codes — the contract surface tests assert against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    NoAudio,
    MissingEnglish,
    MissingJapanese,
    MissingDualAudio,
    WrongDefaultAnime,
    WrongDefault,
    NoPreferredCodec,
}

impl IssueCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueCode::NoAudio => "NO_AUDIO",
            IssueCode::MissingEnglish => "MISSING_ENGLISH",
            IssueCode::MissingJapanese => "MISSING_JAPANESE",
            IssueCode::MissingDualAudio => "MISSING_DUAL_AUDIO",
            IssueCode::WrongDefaultAnime => "WRONG_DEFAULT_ANIME",
            IssueCode::WrongDefault => "WRONG_DEFAULT",
            IssueCode::NoPreferredCodec => "NO_PREFERRED_CODEC",
        }
    }
}

/// A preference violation found on a file's audio tracks
#[derive(Debug, Clone, Serialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: IssueCode,
    pub message: String,
}

impl Issue {
    fn new(severity: Severity, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity,
            code,
            message: message.into(),
        }
    }
}

/// Engine for evaluating audio preferences against a file's track set
#[derive(Debug, Clone)]
pub struct PreferenceEngine {
    preferences: AudioPreferences,
}

impl PreferenceEngine {
    pub fn new(preferences: AudioPreferences) -> Self {
        Self { preferences }
    }

    pub fn preferences(&self) -> &AudioPreferences {
        &self.preferences
    }

    /// Evaluate a track set, producing zero or more issues.
    ///
    /// A file with no audio at all short-circuits to a single `NO_AUDIO`
    /// error; the remaining checks are independent of one another.
    pub fn evaluate(&self, tracks: &[AudioTrackInfo], is_anime: bool) -> Vec<Issue> {
        let mut issues = Vec::new();

        if tracks.is_empty() {
            issues.push(Issue::new(
                Severity::Error,
                IssueCode::NoAudio,
                "No audio tracks found",
            ));
            return issues;
        }

        let mut languages = std::collections::HashSet::new();
        let mut default_language: Option<Option<String>> = None;

        for track in tracks {
            if let Some(lang) = &track.language {
                languages.insert(lang.to_lowercase());
            }
            if track.is_default {
                default_language = Some(track.language.as_ref().map(|l| l.to_lowercase()));
            }
        }

        let has_english = languages.contains("en");
        let has_japanese = languages.contains("ja");

        if !is_anime && self.preferences.require_english_non_anime && !has_english {
            issues.push(Issue::new(
                Severity::Error,
                IssueCode::MissingEnglish,
                "Missing English audio track",
            ));
        }

        if is_anime && self.preferences.require_japanese_anime && !has_japanese {
            issues.push(Issue::new(
                Severity::Error,
                IssueCode::MissingJapanese,
                "Missing Japanese audio track (anime)",
            ));
        }

        if is_anime && self.preferences.require_dual_audio_anime && !(has_english && has_japanese) {
            issues.push(Issue::new(
                Severity::Warning,
                IssueCode::MissingDualAudio,
                "Missing dual audio (English + Japanese) for anime",
            ));
        }

        if self.preferences.check_default_track {
            if let Some(default_language) = &default_language {
                let default_str = default_language.as_deref().unwrap_or("none");
                if is_anime {
                    if !matches!(default_language.as_deref(), Some("en") | Some("ja")) {
                        issues.push(Issue::new(
                            Severity::Warning,
                            IssueCode::WrongDefaultAnime,
                            format!(
                                "Default audio is '{}', expected English or Japanese",
                                default_str
                            ),
                        ));
                    }
                } else if default_language.as_deref() != Some("en") && has_english {
                    issues.push(Issue::new(
                        Severity::Warning,
                        IssueCode::WrongDefault,
                        format!("Default audio is '{}', expected English", default_str),
                    ));
                }
            }
        }

        if !self.preferences.preferred_codecs.is_empty() {
            let codecs: std::collections::HashSet<String> = tracks
                .iter()
                .filter_map(|t| t.codec.as_ref())
                .map(|c| c.to_lowercase())
                .collect();
            let preferred: std::collections::HashSet<String> = self
                .preferences
                .preferred_codecs
                .iter()
                .map(|c| c.to_lowercase())
                .collect();

            if !codecs.is_empty() && codecs.is_disjoint(&preferred) {
                let mut present: Vec<_> = codecs.into_iter().collect();
                present.sort();
                issues.push(Issue::new(
                    Severity::Info,
                    IssueCode::NoPreferredCodec,
                    format!("No preferred audio codec found (has: {})", present.join(", ")),
                ));
            }
        }

        issues
    }
}

impl Default for PreferenceEngine {
    fn default() -> Self {
        Self::new(AudioPreferences::default())
    }
}
