use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    parse_url, MusicSource, Provider, Requester, StreamLocator, Track, MEMBER_CONCURRENCY,
    PLAYLIST_LIMIT, SEARCH_LIMIT,
};
use crate::error::SourceError;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// What a query means to YouTube.
#[derive(Debug, PartialEq, Eq)]
enum YouTubeQuery {
    Video(String),
    Playlist(String),
    Search(String),
    /// A URL that is neither a video nor a playlist
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Video {
    id: Option<String>,
    snippet: Option<VideoSnippet>,
    content_details: Option<ContentDetails>,
    statistics: Option<Statistics>,
}

#[derive(Debug, Deserialize)]
struct VideoSnippet {
    title: Option<String>,
    #[serde(default)]
    description: String,
    thumbnails: Option<Thumbnails>,
}

#[derive(Debug, Deserialize)]
struct Thumbnails {
    default: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    high: Option<Thumbnail>,
    standard: Option<Thumbnail>,
    maxres: Option<Thumbnail>,
}

impl Thumbnails {
    fn best(self) -> Option<String> {
        self.maxres
            .or(self.standard)
            .or(self.high)
            .or(self.medium)
            .or(self.default)
            .map(|t| t.url)
    }
}

#[derive(Debug, Deserialize)]
struct Thumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Statistics {
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: Option<PlaylistSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: Option<SearchId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    video_id: Option<String>,
}

/// YouTube resolver backed by the Data API v3.
///
/// Playlists and searches only yield video ids; every id is then resolved
/// on its own through the `videos` endpoint so one broken video never sinks
/// the batch.
pub struct YouTubeClient {
    api_key: String,
    api_base: String,
    http: reqwest::Client,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| SourceError::Http {
                provider: Provider::YouTube,
                source,
            })?;

        Ok(Self {
            api_key: api_key.into(),
            api_base: API_BASE.to_string(),
            http,
        })
    }

    /// Points the client at a mock API root.
    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn watch_url(video_id: &str) -> String {
        format!("https://www.youtube.com/watch?v={}", video_id)
    }

    fn classify(query: &str) -> YouTubeQuery {
        let Some(url) = parse_url(query) else {
            return YouTubeQuery::Search(query.trim().to_string());
        };

        if !url.host_str().is_some_and(|h| Provider::YouTube.owns_host(h)) {
            return YouTubeQuery::Unsupported;
        }

        let playlist = url
            .query_pairs()
            .find(|(key, value)| key == "list" && !value.is_empty())
            .map(|(_, value)| value.into_owned());

        match (Self::video_id(&url), playlist) {
            (_, Some(list)) => YouTubeQuery::Playlist(list),
            (Some(video), None) => YouTubeQuery::Video(video),
            (None, None) => YouTubeQuery::Unsupported,
        }
    }

    /// Extracts the video id from watch, short-link, embed and shorts URLs.
    pub fn video_id(url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

        let candidate = if Provider::YouTube.owns_host(host) && host.ends_with("youtu.be") {
            segments.next().map(str::to_string)
        } else {
            match segments.next()? {
                "watch" => url
                    .query_pairs()
                    .find(|(key, _)| key == "v")
                    .map(|(_, value)| value.into_owned()),
                "embed" | "v" | "shorts" | "live" => segments.next().map(str::to_string),
                _ => None,
            }
        };

        candidate.filter(|id| is_video_id(id))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let http_error = |source| SourceError::Http {
            provider: Provider::YouTube,
            source,
        };

        let response = self
            .http
            .get(format!("{}/{}", self.api_base, endpoint))
            .query(params)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                provider: Provider::YouTube,
                status: response.status(),
            });
        }

        response.json::<T>().await.map_err(http_error)
    }

    async fn fetch_video(&self, video_id: &str, requester: &Requester) -> Result<Track, SourceError> {
        let response: ListResponse<Video> = self
            .get(
                "videos",
                &[("part", "snippet,contentDetails,statistics"), ("id", video_id)],
            )
            .await?;

        response
            .items
            .into_iter()
            .next()
            .and_then(|video| Self::map_video(video, requester))
            .ok_or_else(|| SourceError::Unresolved {
                provider: Provider::YouTube,
                item: video_id.to_string(),
            })
    }

    async fn playlist_video_ids(&self, playlist_id: &str) -> Result<Vec<String>, SourceError> {
        let max_results = PLAYLIST_LIMIT.to_string();
        let response: ListResponse<PlaylistItem> = self
            .get(
                "playlistItems",
                &[
                    ("part", "snippet"),
                    ("playlistId", playlist_id),
                    ("maxResults", &max_results),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.snippet?.resource_id?.video_id)
            .take(PLAYLIST_LIMIT)
            .collect())
    }

    async fn search_video_ids(&self, term: &str) -> Result<Vec<String>, SourceError> {
        let max_results = SEARCH_LIMIT.to_string();
        let response: ListResponse<SearchItem> = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("type", "video"),
                    ("q", term),
                    ("maxResults", &max_results),
                ],
            )
            .await?;

        Ok(response
            .items
            .into_iter()
            .filter_map(|item| item.id?.video_id)
            .take(SEARCH_LIMIT)
            .collect())
    }

    /// Resolves every id, keeping input order and dropping failures.
    async fn fetch_all(&self, video_ids: Vec<String>, requester: &Requester) -> Vec<Track> {
        stream::iter(video_ids)
            .map(|video_id| async move {
                match self.fetch_video(&video_id, requester).await {
                    Ok(track) => Some(track),
                    Err(e) => {
                        warn!("⚠️ Dropping YouTube video {}: {}", video_id, e);
                        None
                    }
                }
            })
            .buffered(MEMBER_CONCURRENCY)
            .filter_map(future::ready)
            .collect()
            .await
    }

    fn map_video(video: Video, requester: &Requester) -> Option<Track> {
        let id = video.id?;
        let snippet = video.snippet?;
        let title = snippet.title?;
        let duration = parse_iso8601_duration(video.content_details?.duration.as_deref()?)?;
        let views = video
            .statistics
            .and_then(|s| s.view_count)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let url = Self::watch_url(&id);
        let mut track = Track::new(
            Provider::YouTube,
            url.clone(),
            url,
            title,
            duration,
            requester.clone(),
        )
        .with_description(snippet.description)
        .with_views(views);

        if let Some(thumbnail) = snippet.thumbnails.and_then(Thumbnails::best) {
            track = track.with_thumbnail(thumbnail);
        }

        Some(track)
    }
}

#[async_trait]
impl MusicSource for YouTubeClient {
    fn provider(&self) -> Provider {
        Provider::YouTube
    }

    async fn resolve(&self, query: &str, requester: &Requester) -> Vec<Track> {
        match Self::classify(query) {
            YouTubeQuery::Video(video_id) => match self.fetch_video(&video_id, requester).await {
                Ok(track) => vec![track],
                Err(e) => {
                    warn!("❌ YouTube video {} unresolved: {}", video_id, e);
                    Vec::new()
                }
            },
            YouTubeQuery::Playlist(playlist_id) => {
                match self.playlist_video_ids(&playlist_id).await {
                    Ok(ids) => {
                        info!("📋 Playlist {} lists {} videos", playlist_id, ids.len());
                        self.fetch_all(ids, requester).await
                    }
                    Err(e) => {
                        warn!("❌ YouTube playlist {} unresolved: {}", playlist_id, e);
                        Vec::new()
                    }
                }
            }
            YouTubeQuery::Search(term) => match self.search_video_ids(&term).await {
                Ok(ids) => self.fetch_all(ids, requester).await,
                Err(e) => {
                    warn!("❌ YouTube search '{}' failed: {}", term, e);
                    Vec::new()
                }
            },
            YouTubeQuery::Unsupported => {
                debug!("YouTube URL is neither a video nor a playlist: {}", query);
                Vec::new()
            }
        }
    }

    fn stream_source(&self, track: &Track) -> Result<StreamLocator, SourceError> {
        parse_url(track.stream_url())
            .map(|url| StreamLocator::AudioOnly { url: url.into() })
            .ok_or_else(|| SourceError::InvalidStreamUrl(track.stream_url().to_string()))
    }
}

fn is_video_id(id: &str) -> bool {
    id.len() == 11
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Parses an ISO 8601 duration (`PT1H2M3S`, `P1DT2H`, `P0D`) into seconds.
///
/// Months, years and fractions are not used by YouTube and are rejected.
pub(crate) fn parse_iso8601_duration(value: &str) -> Option<u64> {
    let rest = value.strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }

    let (date, time) = match rest.split_once('T') {
        Some((_, "")) => return None,
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut total = sum_units(date, &[('W', 604_800), ('D', 86_400)])?;
    if let Some(time) = time {
        total = total.checked_add(sum_units(time, &[('H', 3_600), ('M', 60), ('S', 1)])?)?;
    }
    Some(total)
}

/// Sums `<digits><unit>` pairs; units must appear in the given order.
fn sum_units(part: &str, units: &[(char, u64)]) -> Option<u64> {
    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut next_unit = 0;

    for ch in part.chars() {
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }

        let offset = units[next_unit..].iter().position(|(unit, _)| *unit == ch)?;
        let (_, seconds) = units[next_unit + offset];
        let amount: u64 = digits.parse().ok()?;
        total = total.checked_add(amount.checked_mul(seconds)?)?;

        digits.clear();
        next_unit += offset + 1;
    }

    digits.is_empty().then_some(total)
}
