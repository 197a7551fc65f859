use serenity::model::id::{ChannelId, UserId};
use std::time::Duration;

use super::Provider;

/// Who asked for a track and where the request came from.
///
/// The channel is where playback notifications for the track are posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: UserId,
    pub user_name: String,
    pub channel_id: ChannelId,
}

impl Requester {
    pub fn new(user_id: UserId, user_name: impl Into<String>, channel_id: ChannelId) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            channel_id,
        }
    }
}

/// A playable item, normalized across providers.
///
/// Only resolvers build tracks, and a track never changes once built. The
/// duration is always known and measured in whole seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    provider: Provider,
    url: String,
    stream_url: String,
    title: String,
    description: String,
    views: u64,
    thumbnail: Option<String>,
    duration: Duration,
    requested_by: Requester,
}

impl Track {
    pub fn new(
        provider: Provider,
        url: impl Into<String>,
        stream_url: impl Into<String>,
        title: impl Into<String>,
        duration_secs: u64,
        requested_by: Requester,
    ) -> Self {
        Self {
            provider,
            url: url.into(),
            stream_url: stream_url.into(),
            title: title.into(),
            description: String::new(),
            views: 0,
            thumbnail: None,
            duration: Duration::from_secs(duration_secs),
            requested_by,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_views(mut self, views: u64) -> Self {
        self.views = views;
        self
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    // Getters
    pub fn provider(&self) -> Provider {
        self.provider
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    /// Provider-specific source used to build a [`StreamLocator`](super::StreamLocator).
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn description(&self) -> &str {
        &self.description
    }
    pub fn views(&self) -> u64 {
        self.views
    }
    pub fn thumbnail(&self) -> Option<&str> {
        self.thumbnail.as_deref()
    }
    pub fn duration(&self) -> Duration {
        self.duration
    }
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs()
    }
    pub fn requested_by(&self) -> &Requester {
        &self.requested_by
    }
}
