//! Show identity resolution against the external catalog
//!
//! Folder names drift from canonical titles (romanized vs. English,
//! punctuation, release-group renames). The matcher corrects that drift
//! by resolving a file path and/or path-inferred title to a catalog show
//! through three indices built from one full-catalog fetch:
//!
//! - normalized episode file path -> show
//! - title variant -> show
//! - rating key -> show
//!
//! The indices are populated lazily on first lookup. A cache miss costs
//! one full catalog fetch, not a per-title network round trip; a failed
//! fetch leaves the indices empty for this matcher's lifetime, and every
//! lookup degrades to "no match".

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::services::plex::{CatalogProvider, CatalogShow};

/// Minimum combined similarity for a fuzzy title match (strict)
const FUZZY_THRESHOLD: f64 = 0.75;

/// A catalog show resolved for a local file or title
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedShow {
    pub rating_key: String,
    pub title: String,
    pub is_anime: bool,
    pub thumb_url: Option<String>,
}

impl MatchedShow {
    fn from_catalog(show: &CatalogShow) -> Self {
        Self {
            rating_key: show.rating_key.clone(),
            title: show.title.clone(),
            is_anime: show.is_anime,
            thumb_url: show.thumb_url.clone(),
        }
    }
}

static TRAILING_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*[\(\[](19|20)\d{2}[\)\]]\s*$").unwrap());
static PUNCTUATION: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").to_string()
}

fn push_variant(variants: &mut Vec<String>, candidate: String) {
    let candidate = collapse_whitespace(&candidate);
    if !candidate.is_empty() && !variants.contains(&candidate) {
        variants.push(candidate);
    }
}

/// Generate the lookup variants of a display or original title.
///
/// Every variant maps back to the same show in the title index.
fn title_variants(title: &str) -> Vec<String> {
    let mut variants: Vec<String> = Vec::new();

    push_variant(&mut variants, title.to_lowercase());
    for v in variants.clone() {
        push_variant(&mut variants, TRAILING_YEAR.replace(&v, "").to_string());
    }

    for v in variants.clone() {
        if let Some(stripped) = v.strip_prefix("the ") {
            push_variant(&mut variants, stripped.to_string());
        }
    }

    for v in variants.clone() {
        push_variant(&mut variants, PUNCTUATION.replace_all(&v, "").to_string());
    }

    // Subtitle removal: "steins;gate - the movie" and "fate: zero" index
    // under their head title too.
    for v in variants.clone() {
        if let Some(pos) = v.find(':') {
            push_variant(&mut variants, v[..pos].to_string());
        }
        if let Some(pos) = v.find(" - ") {
            push_variant(&mut variants, v[..pos].to_string());
        }
    }

    variants
}

/// Strip punctuation from an already-lowercased query title
fn strip_punctuation(title: &str) -> String {
    collapse_whitespace(&PUNCTUATION.replace_all(title, ""))
}

fn normalize_path(path: &str) -> String {
    path.to_lowercase().replace('\\', "/")
}

/// Last two path components ("parent/filename"), used to match cached
/// paths when the server mounts the library under a different root
fn path_tail(normalized: &str) -> Option<String> {
    let mut parts = normalized.rsplit('/').filter(|p| !p.is_empty());
    let filename = parts.next()?;
    let parent = parts.next()?;
    Some(format!("{}/{}", parent, filename))
}

fn jaccard<T: std::hash::Hash + Eq>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Combined word-set and character-set similarity between two titles
fn title_similarity(a: &str, b: &str) -> f64 {
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    let chars_a: HashSet<char> = a.chars().filter(|c| !c.is_whitespace()).collect();
    let chars_b: HashSet<char> = b.chars().filter(|c| !c.is_whitespace()).collect();

    0.7 * jaccard(&words_a, &words_b) + 0.3 * jaccard(&chars_a, &chars_b)
}

#[derive(Debug, Default)]
struct CatalogIndices {
    shows: Vec<CatalogShow>,
    by_path: HashMap<String, usize>,
    by_path_tail: HashMap<String, usize>,
    by_title: HashMap<String, usize>,
    by_rating_key: HashMap<String, usize>,
}

impl CatalogIndices {
    fn build(shows: Vec<CatalogShow>) -> Self {
        let mut indices = CatalogIndices {
            shows,
            ..CatalogIndices::default()
        };

        for (i, show) in indices.shows.iter().enumerate() {
            for path in &show.episode_paths {
                let normalized = normalize_path(path);
                if let Some(tail) = path_tail(&normalized) {
                    indices.by_path_tail.entry(tail).or_insert(i);
                }
                indices.by_path.entry(normalized).or_insert(i);
            }

            for variant in title_variants(&show.title) {
                indices.by_title.entry(variant).or_insert(i);
            }
            if let Some(original) = &show.original_title {
                for variant in title_variants(original) {
                    indices.by_title.entry(variant).or_insert(i);
                }
            }

            indices.by_rating_key.insert(show.rating_key.clone(), i);
        }

        indices
    }
}

/// Resolves file paths and inferred titles to catalog show identities
pub struct IdentityMatcher {
    provider: Arc<dyn CatalogProvider>,
    indices: OnceCell<Arc<CatalogIndices>>,
}

impl IdentityMatcher {
    pub fn new(provider: Arc<dyn CatalogProvider>) -> Self {
        Self {
            provider,
            indices: OnceCell::new(),
        }
    }

    /// Lazily build all three indices from one full-catalog fetch
    async fn indices(&self) -> Arc<CatalogIndices> {
        self.indices
            .get_or_init(|| async {
                match self.provider.fetch_catalog().await {
                    Ok(shows) => {
                        debug!(shows = shows.len(), "Building identity indices");
                        Arc::new(CatalogIndices::build(shows))
                    }
                    Err(e) => {
                        warn!(error = %e, "Catalog fetch failed, identity matching disabled for this scan");
                        Arc::new(CatalogIndices::default())
                    }
                }
            })
            .await
            .clone()
    }

    /// Exact match of a file path against the catalog's episode paths,
    /// falling back to parent-folder + filename equality to bridge
    /// differing mount roots.
    pub async fn find_show_by_file(&self, path: &str) -> Option<MatchedShow> {
        let indices = self.indices().await;
        let normalized = normalize_path(path);

        if let Some(&i) = indices.by_path.get(&normalized) {
            return Some(MatchedShow::from_catalog(&indices.shows[i]));
        }

        let tail = path_tail(&normalized)?;
        indices
            .by_path_tail
            .get(&tail)
            .map(|&i| MatchedShow::from_catalog(&indices.shows[i]))
    }

    /// Match a title: exact variant, then punctuation-stripped, then
    /// fuzzy against all cached variants above the strict threshold.
    pub async fn find_show(&self, title: &str) -> Option<MatchedShow> {
        let indices = self.indices().await;
        let query = collapse_whitespace(&title.to_lowercase());
        if query.is_empty() {
            return None;
        }

        if let Some(&i) = indices.by_title.get(&query) {
            return Some(MatchedShow::from_catalog(&indices.shows[i]));
        }

        let stripped = strip_punctuation(&query);
        if let Some(&i) = indices.by_title.get(&stripped) {
            return Some(MatchedShow::from_catalog(&indices.shows[i]));
        }

        let mut best: Option<(usize, f64)> = None;
        for (variant, &i) in &indices.by_title {
            let score = title_similarity(&query, variant);
            if score > FUZZY_THRESHOLD && best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((i, score));
            }
        }

        best.map(|(i, score)| {
            debug!(title = %title, matched = %indices.shows[i].title, score, "Fuzzy title match");
            MatchedShow::from_catalog(&indices.shows[i])
        })
    }

    /// Direct lookup by the provider's rating key
    pub async fn find_show_by_rating_key(&self, rating_key: &str) -> Option<MatchedShow> {
        let indices = self.indices().await;
        indices
            .by_rating_key
            .get(rating_key)
            .map(|&i| MatchedShow::from_catalog(&indices.shows[i]))
    }

    /// Resolution used by the scanner: exact path, then the file's parent
    /// folder name as a title, then the caller's inferred title. First
    /// success wins.
    pub async fn find_show_by_path_or_title(
        &self,
        path: &str,
        title_hint: Option<&str>,
    ) -> Option<MatchedShow> {
        if let Some(found) = self.find_show_by_file(path).await {
            return Some(found);
        }

        if let Some(folder_title) = folder_title_from_path(path) {
            if let Some(found) = self.find_show(&folder_title).await {
                return Some(found);
            }
        }

        if let Some(hint) = title_hint {
            if let Some(found) = self.find_show(hint).await {
                return Some(found);
            }
        }

        None
    }
}

/// Parent folder name of a file, cleaned the way inferred titles are
fn folder_title_from_path(path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let mut parts = normalized.rsplit('/').filter(|p| !p.is_empty());
    let _filename = parts.next()?;
    let parent = parts.next()?;
    let cleaned = parent.replace('.', " ").trim().to_string();
    (!cleaned.is_empty()).then_some(cleaned)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;

    struct StubProvider {
        shows: Vec<CatalogShow>,
        fetches: AtomicUsize,
        fail: bool,
    }

    impl StubProvider {
        fn new(shows: Vec<CatalogShow>) -> Self {
            Self {
                shows,
                fetches: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                shows: Vec::new(),
                fetches: AtomicUsize::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl CatalogProvider for StubProvider {
        async fn fetch_catalog(&self) -> anyhow::Result<Vec<CatalogShow>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("server unreachable"));
            }
            Ok(self.shows.clone())
        }
    }

    fn show(rating_key: &str, title: &str, original: Option<&str>, paths: &[&str]) -> CatalogShow {
        CatalogShow {
            rating_key: rating_key.to_string(),
            title: title.to_string(),
            original_title: original.map(String::from),
            year: None,
            genres: vec!["Anime".to_string()],
            thumb_url: None,
            is_anime: true,
            episode_paths: paths.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn matcher_with(shows: Vec<CatalogShow>) -> (Arc<StubProvider>, IdentityMatcher) {
        let provider = Arc::new(StubProvider::new(shows));
        let matcher = IdentityMatcher::new(provider.clone());
        (provider, matcher)
    }

    #[tokio::test]
    async fn test_exact_path_match() {
        let (_, matcher) = matcher_with(vec![show(
            "1",
            "Attack on Titan",
            Some("Shingeki no Kyojin"),
            &["/media/Anime/Attack on Titan/S01E01.mkv"],
        )]);

        let found = matcher
            .find_show_by_file("/media/anime/attack on titan/s01e01.mkv")
            .await
            .expect("path should match case-insensitively");
        assert_eq!(found.rating_key, "1");
    }

    #[tokio::test]
    async fn test_path_tail_bridges_mount_roots() {
        let (_, matcher) = matcher_with(vec![show(
            "1",
            "Attack on Titan",
            None,
            &["/data/library/Attack on Titan/S01E01.mkv"],
        )]);

        let found = matcher
            .find_show_by_file("/mnt/nas/Attack on Titan/S01E01.mkv")
            .await
            .expect("parent folder + filename should match");
        assert_eq!(found.rating_key, "1");
    }

    #[tokio::test]
    async fn test_title_variants_resolve_exactly() {
        let (_, matcher) = matcher_with(vec![show(
            "7",
            "The Melancholy of Haruhi Suzumiya (2006)",
            None,
            &[],
        )]);

        for query in [
            "The Melancholy of Haruhi Suzumiya (2006)",
            "the melancholy of haruhi suzumiya",
            "Melancholy of Haruhi Suzumiya",
        ] {
            let found = matcher.find_show(query).await;
            assert!(found.is_some(), "query {:?} should match", query);
        }
    }

    #[tokio::test]
    async fn test_punctuation_stripped_lookup() {
        let (_, matcher) = matcher_with(vec![show("9", "Steins;Gate", None, &[])]);

        let found = matcher.find_show("steinsgate").await.expect("should match");
        assert_eq!(found.rating_key, "9");
    }

    #[tokio::test]
    async fn test_original_title_is_indexed() {
        let (_, matcher) = matcher_with(vec![show(
            "1",
            "Attack on Titan",
            Some("Shingeki no Kyojin"),
            &[],
        )]);

        let found = matcher
            .find_show("Shingeki no Kyojin")
            .await
            .expect("original title should match");
        assert_eq!(found.title, "Attack on Titan");
    }

    #[tokio::test]
    async fn test_fuzzy_match_above_threshold() {
        let (_, matcher) = matcher_with(vec![show(
            "3",
            "Fullmetal Alchemist: Brotherhood",
            None,
            &[],
        )]);

        let found = matcher
            .find_show("Fullmetal Alchemist Brotherhood 01")
            .await
            .expect("near-identical title should fuzzy match");
        assert_eq!(found.rating_key, "3");
    }

    #[tokio::test]
    async fn test_fuzzy_rejects_unrelated_titles() {
        let (_, matcher) = matcher_with(vec![show("3", "Fullmetal Alchemist", None, &[])]);
        assert!(matcher.find_show("Cowboy Bebop").await.is_none());
    }

    #[tokio::test]
    async fn test_path_or_title_prefers_path() {
        let (_, matcher) = matcher_with(vec![
            show("1", "Attack on Titan", None, &["/media/aot/S01E01.mkv"]),
            show("2", "Some Other Show", None, &[]),
        ]);

        let found = matcher
            .find_show_by_path_or_title("/media/aot/S01E01.mkv", Some("Some Other Show"))
            .await
            .expect("should match");
        assert_eq!(found.rating_key, "1");
    }

    #[tokio::test]
    async fn test_path_or_title_falls_back_to_folder_then_hint() {
        let (_, matcher) = matcher_with(vec![show("4", "Cowboy Bebop", None, &[])]);

        // Folder name resolves even though the path is unknown.
        let found = matcher
            .find_show_by_path_or_title("/elsewhere/Cowboy.Bebop/E05.mkv", None)
            .await
            .expect("folder title should match");
        assert_eq!(found.rating_key, "4");

        // Unmatchable folder, hint still resolves.
        let found = matcher
            .find_show_by_path_or_title("/elsewhere/Discs/E05.mkv", Some("Cowboy Bebop"))
            .await
            .expect("hint should match");
        assert_eq!(found.rating_key, "4");
    }

    #[tokio::test]
    async fn test_rating_key_lookup() {
        let (_, matcher) = matcher_with(vec![show("42", "Attack on Titan", None, &[])]);
        assert!(matcher.find_show_by_rating_key("42").await.is_some());
        assert!(matcher.find_show_by_rating_key("43").await.is_none());
    }

    #[tokio::test]
    async fn test_catalog_fetched_once() {
        let (provider, matcher) = matcher_with(vec![show("1", "Attack on Titan", None, &[])]);

        let _ = matcher.find_show("Attack on Titan").await;
        let _ = matcher.find_show("Cowboy Bebop").await;
        let _ = matcher.find_show_by_file("/media/x.mkv").await;

        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_degrades_to_no_match() {
        let provider = Arc::new(StubProvider::failing());
        let matcher = IdentityMatcher::new(provider.clone());

        assert!(matcher.find_show("Attack on Titan").await.is_none());
        assert!(matcher.find_show_by_file("/media/x.mkv").await.is_none());
        // The failed fetch is cached for the matcher's lifetime.
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_similarity_weights() {
        // Identical titles score 1.0; disjoint titles score near 0.
        assert!((title_similarity("attack on titan", "attack on titan") - 1.0).abs() < 1e-9);
        assert!(title_similarity("attack on titan", "zzz") < 0.2);
    }
}
