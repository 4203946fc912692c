//! Plex API clients
//!
//! Two surfaces are used: the user's Plex Media Server (catalog of shows
//! with genres and per-episode file paths, consumed by the identity
//! matcher) and plex.tv (account lookup during the token exchange).
//! Network failures surface as errors to the caller, which degrades to
//! path-only metadata — a dead Plex server must never fail a scan.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

/// Genre tags that classify a show as anime
const ANIME_GENRES: &[&str] = &["anime", "animation", "アニメ"];

/// One show from the external catalog, as consumed by the identity matcher
#[derive(Debug, Clone)]
pub struct CatalogShow {
    pub rating_key: String,
    pub title: String,
    pub original_title: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub thumb_url: Option<String>,
    pub is_anime: bool,
    /// Absolute file paths of the show's episodes as the server knows them
    pub episode_paths: Vec<String>,
}

/// Source of the full external show catalog.
///
/// The identity matcher is written against this seam; tests provide
/// in-memory implementations.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<CatalogShow>>;
}

// ============================================================================
// Wire models (JSON via the Accept header; Plex defaults to XML)
// ============================================================================

#[derive(Debug, Deserialize)]
struct SectionsResponse {
    #[serde(rename = "MediaContainer")]
    media_container: SectionsContainer,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Section>,
}

#[derive(Debug, Deserialize)]
struct Section {
    key: String,
    #[serde(rename = "type")]
    section_type: String,
    title: String,
}

#[derive(Debug, Deserialize)]
struct MetadataResponse {
    #[serde(rename = "MediaContainer")]
    media_container: MetadataContainer,
}

#[derive(Debug, Deserialize)]
struct MetadataContainer {
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Metadata>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(rename = "ratingKey")]
    rating_key: Option<String>,
    title: Option<String>,
    #[serde(rename = "originalTitle")]
    original_title: Option<String>,
    year: Option<i32>,
    thumb: Option<String>,
    #[serde(rename = "Genre", default)]
    genres: Vec<Tag>,
    #[serde(rename = "Media", default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Tag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct Media {
    #[serde(rename = "Part", default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    file: Option<String>,
}

/// plex.tv account details returned by the token exchange lookup
#[derive(Debug, Clone, Deserialize)]
pub struct PlexAccount {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub thumb: Option<String>,
}

// ============================================================================
// Clients
// ============================================================================

fn is_anime_genres(genres: &[String]) -> bool {
    genres
        .iter()
        .any(|g| ANIME_GENRES.contains(&g.to_lowercase().as_str()))
}

/// Client for a user's Plex Media Server
pub struct PlexClient {
    client: Client,
    server_url: String,
    token: String,
}

impl PlexClient {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            server_url: server_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.server_url, path);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Plex-Token", &self.token)
            .send()
            .await
            .with_context(|| format!("Plex request failed: {}", path))?
            .error_for_status()
            .with_context(|| format!("Plex returned an error status for {}", path))?;

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse Plex response for {}", path))
    }

    /// List library sections
    async fn sections(&self) -> Result<Vec<Section>> {
        let response: SectionsResponse = self.get_json("/library/sections").await?;
        Ok(response.media_container.directories)
    }

    /// All shows in a section, without episode paths
    async fn shows_in_section(&self, section_key: &str) -> Result<Vec<Metadata>> {
        let response: MetadataResponse = self
            .get_json(&format!("/library/sections/{}/all", section_key))
            .await?;
        Ok(response.media_container.metadata)
    }

    /// Every episode file path the server knows for a show
    async fn episode_paths(&self, rating_key: &str) -> Result<Vec<String>> {
        let response: MetadataResponse = self
            .get_json(&format!("/library/metadata/{}/allLeaves", rating_key))
            .await?;

        Ok(response
            .media_container
            .metadata
            .into_iter()
            .flat_map(|episode| episode.media)
            .flat_map(|media| media.parts)
            .filter_map(|part| part.file)
            .collect())
    }
}

#[async_trait]
impl CatalogProvider for PlexClient {
    /// One full-catalog fetch: every show in every "show" section, with
    /// genres and episode file paths.
    async fn fetch_catalog(&self) -> Result<Vec<CatalogShow>> {
        let sections = self.sections().await?;
        let mut catalog = Vec::new();

        for section in sections.iter().filter(|s| s.section_type == "show") {
            debug!(section = %section.title, "Fetching Plex section");
            let shows = self.shows_in_section(&section.key).await?;

            for show in shows {
                let Some(rating_key) = show.rating_key else {
                    continue;
                };
                let Some(title) = show.title else {
                    continue;
                };

                let genres: Vec<String> = show.genres.into_iter().map(|g| g.tag).collect();
                let is_anime = is_anime_genres(&genres);

                // Episode paths are what the path index is built from; a
                // failure for one show should not sink the whole catalog.
                let episode_paths = self.episode_paths(&rating_key).await.unwrap_or_default();

                catalog.push(CatalogShow {
                    rating_key,
                    title,
                    original_title: show.original_title,
                    year: show.year,
                    genres,
                    thumb_url: show.thumb,
                    is_anime,
                    episode_paths,
                });
            }
        }

        info!(shows = catalog.len(), "Loaded Plex catalog");
        Ok(catalog)
    }
}

/// Verify a Plex account token against plex.tv and return the account
pub async fn fetch_account(client_identifier: &str, token: &str) -> Result<PlexAccount> {
    let client = Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .unwrap_or_default();

    let response = client
        .get("https://plex.tv/api/v2/user")
        .header("Accept", "application/json")
        .header("X-Plex-Token", token)
        .header("X-Plex-Client-Identifier", client_identifier)
        .send()
        .await
        .context("plex.tv request failed")?
        .error_for_status()
        .context("plex.tv rejected the token")?;

    response
        .json::<PlexAccount>()
        .await
        .context("Failed to parse plex.tv account response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anime_genre_detection() {
        assert!(is_anime_genres(&["Anime".to_string()]));
        assert!(is_anime_genres(&["Comedy".to_string(), "Animation".to_string()]));
        assert!(is_anime_genres(&["アニメ".to_string()]));
        assert!(!is_anime_genres(&["Drama".to_string()]));
        assert!(!is_anime_genres(&[]));
    }

    #[test]
    fn test_metadata_parsing() {
        let raw = serde_json::json!({
            "MediaContainer": {
                "Metadata": [
                    {
                        "ratingKey": "42",
                        "title": "Attack on Titan",
                        "originalTitle": "Shingeki no Kyojin",
                        "year": 2013,
                        "thumb": "/library/metadata/42/thumb",
                        "Genre": [{ "tag": "Anime" }, { "tag": "Action" }]
                    }
                ]
            }
        });
        let parsed: MetadataResponse = serde_json::from_value(raw).unwrap();
        let show = &parsed.media_container.metadata[0];
        assert_eq!(show.rating_key.as_deref(), Some("42"));
        assert_eq!(show.original_title.as_deref(), Some("Shingeki no Kyojin"));
        assert_eq!(show.genres.len(), 2);
    }

    #[test]
    fn test_episode_paths_parsing() {
        let raw = serde_json::json!({
            "MediaContainer": {
                "Metadata": [
                    {
                        "title": "Episode 1",
                        "Media": [
                            { "Part": [{ "file": "/media/anime/AoT/S01E01.mkv" }] }
                        ]
                    }
                ]
            }
        });
        let parsed: MetadataResponse = serde_json::from_value(raw).unwrap();
        let paths: Vec<String> = parsed
            .media_container
            .metadata
            .into_iter()
            .flat_map(|e| e.media)
            .flat_map(|m| m.parts)
            .filter_map(|p| p.file)
            .collect();
        assert_eq!(paths, vec!["/media/anime/AoT/S01E01.mkv".to_string()]);
    }
}
