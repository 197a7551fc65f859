//! # Sources
//!
//! Turns user queries into [`Track`]s and tracks into stream locators.
//!
//! Each provider has one [`MusicSource`] implementation; the
//! [`ProviderDispatcher`] picks the right one from a query and an optional
//! provider hint. Resolution never fails loudly: anything that goes wrong
//! while fetching metadata is logged and shows up as fewer (or zero) tracks.

pub mod soundcloud;
pub mod track;
pub mod youtube;

use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tracing::{debug, info};
use url::Url;

use crate::error::SourceError;

pub use soundcloud::SoundCloudClient;
pub use track::{Requester, Track};
pub use youtube::YouTubeClient;

/// Candidates kept from a free-text search.
pub const SEARCH_LIMIT: usize = 3;

/// Members fetched from a playlist (one API page).
pub const PLAYLIST_LIMIT: usize = 50;

/// Playlist/search members whose metadata is fetched at the same time.
pub const MEMBER_CONCURRENCY: usize = 4;

/// Supported media providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    YouTube,
    SoundCloud,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::YouTube, Provider::SoundCloud];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::YouTube => "youtube",
            Provider::SoundCloud => "soundcloud",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Comma separated list for user-facing messages.
    pub fn supported_list() -> String {
        Self::ALL
            .iter()
            .map(Provider::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn domains(&self) -> &'static [&'static str] {
        match self {
            Provider::YouTube => &["youtube.com", "youtu.be"],
            Provider::SoundCloud => &["soundcloud.com"],
        }
    }

    /// True when `host` is one of the provider's domains or a subdomain of one.
    pub fn owns_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.domains().iter().any(|domain| {
            host == *domain
                || host
                    .strip_suffix(*domain)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the voice layer should open a track's audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamLocator {
    /// A page URL whose audio-only formats are extracted on demand.
    AudioOnly { url: String },
    /// A URL that can be fetched directly, credentials already attached.
    Direct { url: String },
}

impl StreamLocator {
    pub fn url(&self) -> &str {
        match self {
            StreamLocator::AudioOnly { url } | StreamLocator::Direct { url } => url,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamLocator::AudioOnly { .. } => "audio-only",
            StreamLocator::Direct { .. } => "direct",
        }
    }
}

/// Common contract of every provider resolver.
#[async_trait]
pub trait MusicSource: Send + Sync {
    fn provider(&self) -> Provider;

    /// Resolves a URL (single item or playlist) or a search term.
    ///
    /// Returns an empty vector when nothing could be resolved; members that
    /// fail individually are dropped.
    async fn resolve(&self, query: &str, requester: &Requester) -> Vec<Track>;

    /// Locator used to open the track's audio.
    fn stream_source(&self, track: &Track) -> Result<StreamLocator, SourceError>;
}

/// Parses `query` as an absolute http(s) URL with a host.
///
/// Anything else (free text, relative paths, other schemes) is not a URL.
pub fn parse_url(query: &str) -> Option<Url> {
    let url = Url::parse(query.trim()).ok()?;
    let web_scheme = matches!(url.scheme(), "http" | "https");
    (web_scheme && url.host_str().is_some()).then_some(url)
}

pub fn is_url(query: &str) -> bool {
    parse_url(query).is_some()
}

/// Routes queries and tracks to the resolver of their provider.
///
/// Holds no state besides the resolver table.
pub struct ProviderDispatcher {
    youtube: Arc<dyn MusicSource>,
    soundcloud: Arc<dyn MusicSource>,
}

impl ProviderDispatcher {
    pub fn new(youtube: Arc<dyn MusicSource>, soundcloud: Arc<dyn MusicSource>) -> Self {
        debug_assert_eq!(youtube.provider(), Provider::YouTube);
        debug_assert_eq!(soundcloud.provider(), Provider::SoundCloud);
        Self {
            youtube,
            soundcloud,
        }
    }

    /// Picks the provider for a query.
    ///
    /// URLs are matched on their host and the hint is ignored; an unknown
    /// host yields `None` so the caller can refuse the command. Free text is
    /// a search on the hinted provider, YouTube by default.
    pub fn detect_provider(&self, query: &str, hint: Option<Provider>) -> Option<Provider> {
        match parse_url(query) {
            Some(url) => {
                let host = url.host_str()?;
                let provider = Provider::ALL.into_iter().find(|p| p.owns_host(host));
                debug!("🔎 URL host {} -> {:?}", host, provider);
                provider
            }
            None => Some(hint.unwrap_or(Provider::YouTube)),
        }
    }

    pub async fn resolve(
        &self,
        provider: Provider,
        query: &str,
        requester: &Requester,
    ) -> Vec<Track> {
        info!("🔍 Resolving on {}: {}", provider, query);
        let tracks = self.source(provider).resolve(query, requester).await;
        info!("✅ {} track(s) resolved on {} for {}", tracks.len(), provider, query);
        tracks
    }

    pub fn stream_source(&self, track: &Track) -> Result<StreamLocator, SourceError> {
        self.source(track.provider()).stream_source(track)
    }

    fn source(&self, provider: Provider) -> &dyn MusicSource {
        match provider {
            Provider::YouTube => self.youtube.as_ref(),
            Provider::SoundCloud => self.soundcloud.as_ref(),
        }
    }
}
