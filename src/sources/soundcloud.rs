use async_trait::async_trait;
use futures::{future, stream, StreamExt};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{
    is_url, parse_url, MusicSource, Provider, Requester, StreamLocator, Track,
    MEMBER_CONCURRENCY, PLAYLIST_LIMIT, SEARCH_LIMIT,
};
use crate::error::SourceError;

const API_BASE: &str = "https://api.soundcloud.com";

/// Resource returned by the resolve endpoint, tagged by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Resource {
    Track(Value),
    Playlist {
        #[serde(default)]
        tracks: Vec<Value>,
    },
    /// Users, groups and anything else that cannot be played
    #[serde(other)]
    Unsupported,
}

/// Track payload. Every field is optional so one malformed entry only
/// drops itself.
#[derive(Debug, Deserialize)]
struct ApiTrack {
    title: Option<String>,
    permalink_url: Option<String>,
    stream_url: Option<String>,
    /// Milliseconds
    duration: Option<u64>,
    description: Option<String>,
    playback_count: Option<u64>,
    artwork_url: Option<String>,
}

pub struct SoundCloudClient {
    client_id: String,
    api_base: String,
    http: reqwest::Client,
}

impl SoundCloudClient {
    pub fn new(client_id: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| SourceError::Http {
                provider: Provider::SoundCloud,
                source,
            })?;

        Ok(Self {
            client_id: client_id.into(),
            api_base: API_BASE.to_string(),
            http,
        })
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let http_error = |source| SourceError::Http {
            provider: Provider::SoundCloud,
            source,
        };

        let response = self
            .http
            .get(format!("{}/{}", self.api_base, endpoint))
            .query(params)
            .query(&[("client_id", self.client_id.as_str())])
            .send()
            .await
            .map_err(http_error)?;

        if !response.status().is_success() {
            return Err(SourceError::Status {
                provider: Provider::SoundCloud,
                status: response.status(),
            });
        }

        response.json::<T>().await.map_err(http_error)
    }

    async fn resolve_url(&self, url: &str, requester: &Requester) -> Result<Vec<Track>, SourceError> {
        let resource: Resource = self.get("resolve.json", &[("url", url)]).await?;

        let tracks = match resource {
            Resource::Track(raw) => Self::map_track(raw, requester).into_iter().collect(),
            Resource::Playlist { tracks } => {
                let members: Vec<Value> = tracks.into_iter().take(PLAYLIST_LIMIT).collect();
                let total = members.len();
                let mapped = self.fetch_members(members, requester).await;
                info!("📋 SoundCloud set: {}/{} tracks usable", mapped.len(), total);
                mapped
            }
            Resource::Unsupported => {
                debug!("SoundCloud resource is not playable: {}", url);
                Vec::new()
            }
        };

        Ok(tracks)
    }

    /// Maps set members, fetching the ones the set only lists by id.
    async fn fetch_members(&self, members: Vec<Value>, requester: &Requester) -> Vec<Track> {
        stream::iter(members)
            .map(|raw| async move {
                if let Some(track) = Self::map_track(raw.clone(), requester) {
                    return Some(track);
                }

                let Some(id) = raw.get("id").and_then(Value::as_u64) else {
                    debug!("Skipping SoundCloud set member without id");
                    return None;
                };
                match self.get::<Value>(&format!("tracks/{}", id), &[]).await {
                    Ok(full) => Self::map_track(full, requester),
                    Err(e) => {
                        warn!("⚠️ Dropping SoundCloud track {}: {}", id, e);
                        None
                    }
                }
            })
            .buffered(MEMBER_CONCURRENCY)
            .filter_map(future::ready)
            .collect()
            .await
    }

    async fn search(&self, term: &str, requester: &Requester) -> Result<Vec<Track>, SourceError> {
        let results: Vec<Value> = self.get("tracks", &[("q", term)]).await?;

        Ok(results
            .into_iter()
            .take(SEARCH_LIMIT)
            .filter_map(|raw| Self::map_track(raw, requester))
            .collect())
    }

    fn map_track(raw: Value, requester: &Requester) -> Option<Track> {
        let track: ApiTrack = match serde_json::from_value(raw) {
            Ok(track) => track,
            Err(e) => {
                debug!("Skipping malformed SoundCloud track: {}", e);
                return None;
            }
        };

        let mapped = Track::new(
            Provider::SoundCloud,
            track.permalink_url?,
            track.stream_url?,
            track.title?,
            track.duration? / 1000,
            requester.clone(),
        )
        .with_description(track.description.unwrap_or_default())
        .with_views(track.playback_count.unwrap_or(0));

        Some(match track.artwork_url {
            Some(artwork) => mapped.with_thumbnail(artwork),
            None => mapped,
        })
    }
}

#[async_trait]
impl MusicSource for SoundCloudClient {
    fn provider(&self) -> Provider {
        Provider::SoundCloud
    }

    async fn resolve(&self, query: &str, requester: &Requester) -> Vec<Track> {
        let result = if is_url(query) {
            self.resolve_url(query.trim(), requester).await
        } else {
            self.search(query.trim(), requester).await
        };

        result.unwrap_or_else(|e| {
            warn!("❌ SoundCloud lookup for '{}' failed: {}", query, e);
            Vec::new()
        })
    }

    /// The stream endpoint only answers with the client id attached.
    fn stream_source(&self, track: &Track) -> Result<StreamLocator, SourceError> {
        let mut url = parse_url(track.stream_url())
            .ok_or_else(|| SourceError::InvalidStreamUrl(track.stream_url().to_string()))?;
        url.query_pairs_mut().append_pair("client_id", &self.client_id);

        Ok(StreamLocator::Direct { url: url.into() })
    }
}
