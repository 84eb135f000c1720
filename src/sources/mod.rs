//! # Sources Module
//!
//! Turns a URL or a search query into [`Track`]s.
//!
//! The [`MediaExtractor`] trait is the backend seam: one call that returns the
//! extractor's JSON description of a locator. [`TrackResolver`] sits on top of
//! it and decides what to do with that description:
//!
//! - a single item becomes one resolved track;
//! - a collection becomes one *unresolved* track per entry, capped at
//!   `MAX_PLAYLIST_SIZE`; stream URLs are fetched when each track is popped;
//! - a watch link carrying a playlist becomes the item followed by the
//!   playlist entries, without the duplicate;
//! - a search returns up to `SEARCH_RESULTS` unresolved candidates.
//!
//! Stream URLs expire. [`TrackResolver::refresh_stream_locator`] re-extracts
//! only the stream URL from a track's request URL.

pub mod ytdlp;

use async_trait::async_trait;
use serde::Deserialize;
use serenity::model::id::UserId;
use std::{sync::Arc, sync::LazyLock, time::Duration};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{audio::track::Track, cache::TtlCache, config::Config};

pub use ytdlp::YtDlpExtractor;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("extractor failed: {0}")]
    Extractor(String),
    #[error("could not run extractor: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no tracks found for {0}")]
    NothingFound(String),
}

/// Qué tipo de extracción pedir al backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractMode {
    /// One item with its stream URL.
    Single,
    /// Flat listing of a playlist, at most `max_items` entries.
    Collection { max_items: usize },
    /// Flat listing of search results.
    Search { limit: usize },
}

/// Información extraída por el backend (subconjunto del JSON de yt-dlp)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedInfo {
    #[serde(rename = "_type")]
    pub kind: Option<String>,
    pub title: Option<String>,
    pub duration: Option<f64>,
    pub thumbnail: Option<String>,
    pub extractor: Option<String>,
    pub ie_key: Option<String>,
    pub url: Option<String>,
    pub original_url: Option<String>,
    pub webpage_url: Option<String>,
    pub entries: Option<Vec<ExtractedInfo>>,
}

impl ExtractedInfo {
    fn length(&self) -> Option<Duration> {
        self.duration
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    fn extractor_name(&self) -> Option<String> {
        self.extractor.clone().or_else(|| self.ie_key.clone())
    }
}

/// Backend de extracción de metadata
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    async fn extract(&self, locator: &str, mode: ExtractMode) -> Result<ExtractedInfo, ResolveError>;
}

/// Resultado de resolver una URL
#[derive(Debug, Default)]
pub struct Resolution {
    pub tracks: Vec<Track>,
    /// Entries were discarded past the playlist cap.
    pub truncated: bool,
    /// Entries that could not be turned into tracks.
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub max_playlist_size: usize,
    pub search_results: usize,
    pub search_cache_ttl: Duration,
}

impl From<&Config> for ResolverSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_playlist_size: config.max_playlist_size,
            search_results: config.search_results,
            search_cache_ttl: config.search_cache_ttl,
        }
    }
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            max_playlist_size: 100,
            search_results: 5,
            search_cache_ttl: Duration::from_secs(600),
        }
    }
}

/// Forma de la respuesta del extractor
#[derive(Debug, PartialEq)]
enum Shape {
    Single,
    Collection,
    PlaylistLink {
        list_url: String,
        first_item: Option<String>,
    },
    Redirect(String),
}

fn classify(info: &ExtractedInfo) -> Shape {
    match info.kind.as_deref() {
        Some("playlist") | Some("multi_video") => Shape::Collection,
        Some("url") | Some("url_transparent") => match info.url.as_deref() {
            Some(target) if target.contains("playlist?") => Shape::PlaylistLink {
                list_url: target.to_string(),
                first_item: info
                    .webpage_url
                    .as_deref()
                    .filter(|page| page.contains("watch?v="))
                    .and_then(|page| page.split("&list").next())
                    .map(str::to_string),
            },
            Some(target) if !target.is_empty() => Shape::Redirect(target.to_string()),
            _ => Shape::Single,
        },
        _ if info.entries.is_some() => Shape::Collection,
        _ => Shape::Single,
    }
}

/// Track desde un item individual; resuelto si trae URL de stream
fn track_from_single(info: &ExtractedInfo, requested: &str) -> Track {
    let request_url = info
        .original_url
        .clone()
        .or_else(|| info.webpage_url.clone())
        .unwrap_or_else(|| requested.to_string());

    let mut track = Track::new(
        request_url,
        info.title.clone().unwrap_or_else(|| "Unknown".to_string()),
    );
    if let Some(stream_url) = &info.url {
        track.set_stream_url(stream_url.clone());
    }
    decorate(track, info)
}

/// Track sin resolver desde una entrada plana de playlist o búsqueda
fn track_from_entry(entry: &ExtractedInfo) -> Option<Track> {
    let request_url = entry.url.clone().or_else(|| entry.webpage_url.clone())?;
    let track = Track::new(
        request_url,
        entry.title.clone().unwrap_or_else(|| "Unknown".to_string()),
    );
    Some(decorate(track, entry))
}

fn decorate(mut track: Track, info: &ExtractedInfo) -> Track {
    if let Some(duration) = info.length() {
        track = track.with_duration(duration);
    }
    if let Some(thumbnail) = &info.thumbnail {
        track = track.with_thumbnail(thumbnail.clone());
    }
    if let Some(extractor) = info.extractor_name() {
        track = track.with_extractor(extractor);
    }
    track
}

static STALE_LOCATOR: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)(\bhttps?\b|\b(403|404|410|429)\b|forbidden|expired|connection (reset|refused|closed)|timed? ?out|network|stream|i/o error|broken pipe)",
    )
    .expect("stale locator pattern is valid")
});

/// Whether a playback start failure looks like a dead stream URL rather than
/// a problem with the media itself.
pub fn is_stale_locator_error(message: &str) -> bool {
    STALE_LOCATOR.is_match(message)
}

/// Solo http(s) cuenta como URL; todo lo demás es una búsqueda
pub fn is_http_url(input: &str) -> bool {
    url::Url::parse(input.trim())
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

pub struct TrackResolver {
    extractor: Arc<dyn MediaExtractor>,
    settings: ResolverSettings,
    search_cache: TtlCache<String, Vec<Track>>,
}

impl TrackResolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>, settings: ResolverSettings) -> Self {
        let search_cache = TtlCache::new(settings.search_cache_ttl);
        Self {
            extractor,
            settings,
            search_cache,
        }
    }

    /// Busca candidatos sin resolver sus streams
    pub async fn search(
        &self,
        query: &str,
        requester: Option<UserId>,
    ) -> Result<Vec<Track>, ResolveError> {
        let key = query.trim().to_lowercase();
        let limit = self.settings.search_results;

        let candidates = match self.search_cache.get(&key) {
            Some(cached) => {
                debug!("🎯 Search cache hit: {}", key);
                cached
            }
            None => {
                info!("🔍 Searching: {}", query);
                let info = self
                    .extractor
                    .extract(query.trim(), ExtractMode::Search { limit })
                    .await?;
                let found: Vec<Track> = info
                    .entries
                    .unwrap_or_default()
                    .iter()
                    .filter_map(track_from_entry)
                    .take(limit)
                    .collect();
                if found.is_empty() {
                    return Err(ResolveError::NothingFound(query.to_string()));
                }
                self.search_cache.insert(key, found.clone());
                found
            }
        };

        Ok(with_requester(candidates, requester))
    }

    /// Resuelve una URL a uno o más tracks
    ///
    /// Per-entry failures are counted in [`Resolution::skipped`]; only a
    /// request that yields nothing at all is an error.
    pub async fn resolve(
        &self,
        url: &str,
        requester: Option<UserId>,
    ) -> Result<Resolution, ResolveError> {
        let cap = self.settings.max_playlist_size;
        // Uno extra para detectar truncamiento
        let listing = ExtractMode::Collection { max_items: cap + 1 };
        let info = self.extractor.extract(url, listing).await?;

        let mut resolution = Resolution::default();
        match classify(&info) {
            Shape::Single => resolution.tracks.push(track_from_single(&info, url)),
            Shape::Collection => self.collect_entries(&info, url, &mut resolution),
            Shape::Redirect(target) => {
                let title = info.title.clone().unwrap_or_else(|| target.clone());
                resolution.tracks.push(decorate(Track::new(target, title), &info));
            }
            Shape::PlaylistLink {
                list_url,
                first_item,
            } => {
                info!("📋 Link points into a playlist: {}", list_url);
                if let Some(first) = first_item {
                    match self.extractor.extract(&first, ExtractMode::Single).await {
                        Ok(item) => resolution.tracks.push(track_from_single(&item, &first)),
                        Err(e) => {
                            warn!("⚠️ Could not resolve {}: {}", first, e);
                            resolution.skipped += 1;
                        }
                    }
                }
                match self.extractor.extract(&list_url, listing).await {
                    Ok(list) => self.collect_entries(&list, &list_url, &mut resolution),
                    Err(e) => {
                        warn!("⚠️ Could not list playlist {}: {}", list_url, e);
                        resolution.skipped += 1;
                    }
                }
            }
        }

        if resolution.tracks.is_empty() {
            return Err(ResolveError::NothingFound(url.to_string()));
        }

        info!(
            "📋 Resolved {} tracks from {} (skipped {}, truncated: {})",
            resolution.tracks.len(),
            url,
            resolution.skipped,
            resolution.truncated
        );
        resolution.tracks = with_requester(resolution.tracks, requester);
        Ok(resolution)
    }

    fn collect_entries(&self, list: &ExtractedInfo, list_url: &str, resolution: &mut Resolution) {
        let playlist_url = list
            .webpage_url
            .clone()
            .or_else(|| list.original_url.clone())
            .unwrap_or_else(|| list_url.to_string());

        for entry in list.entries.iter().flatten() {
            if resolution.tracks.len() >= self.settings.max_playlist_size {
                resolution.truncated = true;
                break;
            }
            match track_from_entry(entry) {
                Some(track) if resolution.tracks.contains(&track) => {
                    debug!("Skipping duplicate entry {}", track.request_url());
                }
                Some(track) => resolution
                    .tracks
                    .push(track.with_playlist_url(playlist_url.clone())),
                None => {
                    warn!("⚠️ Playlist entry without URL: {:?}", entry.title);
                    resolution.skipped += 1;
                }
            }
        }
    }

    /// Resuelve el stream de un track pendiente y actualiza su metadata
    pub async fn resolve_track(&self, track: &mut Track) -> Result<(), ResolveError> {
        debug!("🎵 Resolving stream for {}", track.request_url());
        let info = self
            .extractor
            .extract(track.request_url(), ExtractMode::Single)
            .await?;
        let stream_url = info
            .url
            .clone()
            .ok_or_else(|| ResolveError::NothingFound(track.request_url().to_string()))?;

        track.set_stream_url(stream_url);
        track.merge_metadata(
            info.title.clone(),
            info.length(),
            info.thumbnail.clone(),
            info.extractor_name(),
        );
        Ok(())
    }

    /// Vuelve a pedir solo la URL de stream; `None` si falla
    pub async fn refresh_stream_locator(&self, track: &Track) -> Option<String> {
        info!("🔄 Refreshing stream URL for {}", track.title());
        match self
            .extractor
            .extract(track.request_url(), ExtractMode::Single)
            .await
        {
            Ok(info) => info.url.filter(|url| !url.is_empty()),
            Err(e) => {
                warn!("❌ Stream refresh failed for {}: {}", track.request_url(), e);
                None
            }
        }
    }

    /// Limpia el cache de búsquedas expiradas
    pub fn prune_cache(&self) -> usize {
        self.search_cache.cleanup_expired()
    }
}

fn with_requester(tracks: Vec<Track>, requester: Option<UserId>) -> Vec<Track> {
    match requester {
        Some(user) => tracks.into_iter().map(|t| t.with_requester(user)).collect(),
        None => tracks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(url: &str, title: &str) -> ExtractedInfo {
        ExtractedInfo {
            url: Some(url.to_string()),
            title: Some(title.to_string()),
            duration: Some(180.0),
            ie_key: Some("Youtube".to_string()),
            ..Default::default()
        }
    }

    fn playlist(urls: impl IntoIterator<Item = usize>) -> ExtractedInfo {
        ExtractedInfo {
            kind: Some("playlist".to_string()),
            webpage_url: Some("https://www.youtube.com/playlist?list=PL1".to_string()),
            entries: Some(
                urls.into_iter()
                    .map(|i| entry(&format!("https://www.youtube.com/watch?v={i}"), &format!("Song {i}")))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    fn resolver(mock: MockMediaExtractor, settings: ResolverSettings) -> TrackResolver {
        TrackResolver::new(Arc::new(mock), settings)
    }

    #[tokio::test]
    async fn playlist_entries_stay_unresolved_and_ordered() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract()
            .times(1)
            .returning(|_, _| Ok(playlist(1..=3)));

        let resolution = resolver(mock, ResolverSettings::default())
            .resolve("https://www.youtube.com/playlist?list=PL1", Some(UserId::new(9)))
            .await
            .unwrap();

        let titles: Vec<_> = resolution.tracks.iter().map(|t| t.title().to_string()).collect();
        assert_eq!(titles, vec!["Song 1", "Song 2", "Song 3"]);
        assert!(resolution.tracks.iter().all(|t| !t.is_resolved()));
        assert!(resolution.tracks.iter().all(|t| t.requester() == Some(UserId::new(9))));
        assert_eq!(
            resolution.tracks[0].playlist_url(),
            Some("https://www.youtube.com/playlist?list=PL1")
        );
        assert!(!resolution.truncated);
    }

    #[tokio::test]
    async fn playlist_is_capped_and_reports_truncation() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract()
            .withf(|_, mode| *mode == ExtractMode::Collection { max_items: 4 })
            .returning(|_, _| Ok(playlist(1..=4)));

        let settings = ResolverSettings {
            max_playlist_size: 3,
            ..Default::default()
        };
        let resolution = resolver(mock, settings)
            .resolve("https://www.youtube.com/playlist?list=PL1", None)
            .await
            .unwrap();

        assert_eq!(resolution.tracks.len(), 3);
        assert!(resolution.truncated);
    }

    #[tokio::test]
    async fn broken_entries_are_skipped_not_fatal() {
        let mut list = playlist(1..=2);
        if let Some(entries) = list.entries.as_mut() {
            entries.insert(1, ExtractedInfo {
                title: Some("[Deleted video]".to_string()),
                ..Default::default()
            });
        }
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract().returning(move |_, _| Ok(list.clone()));

        let resolution = resolver(mock, ResolverSettings::default())
            .resolve("https://www.youtube.com/playlist?list=PL1", None)
            .await
            .unwrap();

        assert_eq!(resolution.tracks.len(), 2);
        assert_eq!(resolution.skipped, 1);
    }

    #[tokio::test]
    async fn single_item_arrives_resolved() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract().returning(|_, _| {
            Ok(ExtractedInfo {
                title: Some("One".to_string()),
                url: Some("https://cdn.example/one.m4a".to_string()),
                original_url: Some("https://youtu.be/one".to_string()),
                extractor: Some("youtube".to_string()),
                duration: Some(61.5),
                ..Default::default()
            })
        });

        let resolution = resolver(mock, ResolverSettings::default())
            .resolve("https://youtu.be/one", None)
            .await
            .unwrap();

        let track = &resolution.tracks[0];
        assert_eq!(track.request_url(), "https://youtu.be/one");
        assert!(track.is_resolved());
        assert_eq!(track.extractor(), Some("youtube"));
        assert_eq!(track.duration(), Some(Duration::from_secs_f64(61.5)));
    }

    #[tokio::test]
    async fn playlist_link_plays_item_first_without_duplicate() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract()
            .withf(|locator, _| locator.contains("&list="))
            .times(1)
            .returning(|_, _| {
                Ok(ExtractedInfo {
                    kind: Some("url".to_string()),
                    url: Some("https://www.youtube.com/playlist?list=PL1".to_string()),
                    webpage_url: Some("https://www.youtube.com/watch?v=2&list=PL1".to_string()),
                    ..Default::default()
                })
            });
        mock.expect_extract()
            .withf(|locator, mode| {
                locator == "https://www.youtube.com/watch?v=2" && *mode == ExtractMode::Single
            })
            .times(1)
            .returning(|_, _| {
                Ok(ExtractedInfo {
                    title: Some("Song 2".to_string()),
                    url: Some("https://cdn.example/2.m4a".to_string()),
                    webpage_url: Some("https://www.youtube.com/watch?v=2".to_string()),
                    ..Default::default()
                })
            });
        mock.expect_extract()
            .withf(|locator, _| locator == "https://www.youtube.com/playlist?list=PL1")
            .times(1)
            .returning(|_, _| Ok(playlist(1..=3)));

        let resolution = resolver(mock, ResolverSettings::default())
            .resolve("https://www.youtube.com/watch?v=2&list=PL1", None)
            .await
            .unwrap();

        let titles: Vec<_> = resolution.tracks.iter().map(|t| t.title().to_string()).collect();
        assert_eq!(titles, vec!["Song 2", "Song 1", "Song 3"]);
        assert!(resolution.tracks[0].is_resolved());
    }

    #[tokio::test]
    async fn empty_or_failed_request_is_nothing_found() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract().returning(|_, _| {
            Ok(ExtractedInfo {
                kind: Some("playlist".to_string()),
                entries: Some(Vec::new()),
                ..Default::default()
            })
        });
        let err = resolver(mock, ResolverSettings::default())
            .resolve("https://example.com/empty", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NothingFound(_)));

        let mut mock = MockMediaExtractor::new();
        mock.expect_extract()
            .returning(|_, _| Err(ResolveError::Extractor("Unsupported URL".to_string())));
        let err = resolver(mock, ResolverSettings::default())
            .resolve("https://example.com/nope", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Extractor(_)));
    }

    #[tokio::test]
    async fn search_is_capped_and_cached() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract()
            .withf(|query, mode| query == "lofi beats" && *mode == ExtractMode::Search { limit: 5 })
            .times(1)
            .returning(|_, _| Ok(playlist(1..=8)));

        let resolver = resolver(mock, ResolverSettings::default());
        let first = resolver.search("lofi beats", Some(UserId::new(1))).await.unwrap();
        let second = resolver.search("  LOFI beats ", Some(UserId::new(2))).await.unwrap();

        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|t| !t.is_resolved()));
        assert_eq!(second.len(), 5);
        assert_eq!(second[0].requester(), Some(UserId::new(2)));
    }

    #[tokio::test]
    async fn refresh_returns_new_locator_or_none() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract()
            .withf(|locator, mode| locator == "https://youtu.be/ok" && *mode == ExtractMode::Single)
            .returning(|_, _| {
                Ok(ExtractedInfo {
                    url: Some("https://cdn.example/fresh".to_string()),
                    ..Default::default()
                })
            });
        mock.expect_extract()
            .withf(|locator, _| locator == "https://youtu.be/gone")
            .returning(|_, _| Err(ResolveError::Extractor("Video unavailable".to_string())));

        let resolver = resolver(mock, ResolverSettings::default());
        let ok = Track::new("https://youtu.be/ok", "ok").with_stream_url("https://cdn.example/old");
        let gone = Track::new("https://youtu.be/gone", "gone");

        assert_eq!(
            resolver.refresh_stream_locator(&ok).await.as_deref(),
            Some("https://cdn.example/fresh")
        );
        assert_eq!(resolver.refresh_stream_locator(&gone).await, None);
    }

    #[tokio::test]
    async fn resolve_track_fills_stream_and_metadata() {
        let mut mock = MockMediaExtractor::new();
        mock.expect_extract().returning(|_, _| {
            Ok(ExtractedInfo {
                title: Some("Full title".to_string()),
                url: Some("https://cdn.example/a".to_string()),
                duration: Some(240.0),
                ..Default::default()
            })
        });
        let resolver = resolver(mock, ResolverSettings::default());
        let mut track = Track::new("https://youtu.be/a", "Unknown");

        resolver.resolve_track(&mut track).await.unwrap();

        assert!(track.is_resolved());
        assert_eq!(track.title(), "Full title");
        assert_eq!(track.duration(), Some(Duration::from_secs(240)));
    }

    #[test]
    fn classifies_extractor_shapes() {
        assert_eq!(classify(&ExtractedInfo::default()), Shape::Single);
        assert_eq!(classify(&playlist(1..=1)), Shape::Collection);
        assert_eq!(
            classify(&ExtractedInfo {
                kind: Some("url".to_string()),
                url: Some("https://youtu.be/x".to_string()),
                ..Default::default()
            }),
            Shape::Redirect("https://youtu.be/x".to_string())
        );
    }

    #[test]
    fn detects_stale_locator_failures() {
        assert!(is_stale_locator_error("HTTP request failed: 403 Forbidden"));
        assert!(is_stale_locator_error("connection reset by peer"));
        assert!(is_stale_locator_error("the stream ended unexpectedly"));
        assert!(!is_stale_locator_error("unsupported codec"));
    }

    #[test]
    fn only_http_schemes_are_urls() {
        assert!(is_http_url("https://youtu.be/abc"));
        assert!(is_http_url(" http://example.com/a.mp3 "));
        assert!(!is_http_url("never gonna give you up"));
        assert!(!is_http_url("ytsearch:lofi"));
    }
}
