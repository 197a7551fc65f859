//! Best-effort mirror of guild queues to an external REST API.
//!
//! The in-memory store stays authoritative: publishing never blocks, never
//! fails from the caller's point of view and is never retried.

use serde::Serialize;
use serenity::model::id::GuildId;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sources::Track;

/// A queue change to mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEvent {
    Created { guild_id: GuildId, tracks: Vec<Track> },
    Updated { guild_id: GuildId, tracks: Vec<Track> },
    Deleted { guild_id: GuildId },
}

impl MirrorEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            MirrorEvent::Created { guild_id, .. }
            | MirrorEvent::Updated { guild_id, .. }
            | MirrorEvent::Deleted { guild_id } => *guild_id,
        }
    }
}

/// Receives every queue mutation. Must return immediately.
#[cfg_attr(test, mockall::automock)]
pub trait QueueMirror: Send + Sync {
    fn publish(&self, event: MirrorEvent);
}

/// Used when no queue API is configured.
pub struct NoopMirror;

impl QueueMirror for NoopMirror {
    fn publish(&self, event: MirrorEvent) {
        debug!("Queue mirror disabled, dropping event for guild {}", event.guild_id());
    }
}

#[derive(Debug, Serialize)]
struct QueueBody<'a> {
    #[serde(rename = "guildID")]
    guild_id: String,
    tracks: Vec<TrackBody<'a>>,
}

#[derive(Debug, Serialize)]
struct TrackBody<'a> {
    provider: &'static str,
    url: &'a str,
    title: &'a str,
    description: &'a str,
    views: u64,
    #[serde(rename = "thumbnailURL")]
    thumbnail_url: Option<&'a str>,
    duration: u64,
    initiator: String,
}

impl<'a> QueueBody<'a> {
    fn new(guild_id: GuildId, tracks: &'a [Track]) -> Self {
        Self {
            guild_id: guild_id.to_string(),
            tracks: tracks
                .iter()
                .map(|track| TrackBody {
                    provider: track.provider().as_str(),
                    url: track.url(),
                    title: track.title(),
                    description: track.description(),
                    views: track.views(),
                    thumbnail_url: track.thumbnail(),
                    duration: track.duration_secs(),
                    initiator: track.requested_by().user_id.to_string(),
                })
                .collect(),
        }
    }
}

/// Forwards events to one background worker that writes them in order.
pub struct RestQueueMirror {
    sender: mpsc::UnboundedSender<MirrorEvent>,
}

impl RestQueueMirror {
    /// Spawns the writer task; must be called from within a tokio runtime.
    pub fn spawn(http: reqwest::Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let worker = MirrorWorker {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        };

        info!("🪞 Queue mirror enabled: {}", worker.base_url);
        tokio::spawn(worker.run(receiver));

        Self { sender }
    }
}

impl QueueMirror for RestQueueMirror {
    fn publish(&self, event: MirrorEvent) {
        if let Err(e) = self.sender.send(event) {
            warn!("⚠️ Queue mirror worker is gone, dropping event for guild {}", e.0.guild_id());
        }
    }
}

struct MirrorWorker {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl MirrorWorker {
    async fn run(self, mut receiver: mpsc::UnboundedReceiver<MirrorEvent>) {
        while let Some(event) = receiver.recv().await {
            let guild_id = event.guild_id();
            if let Err(e) = self.write(&event).await {
                warn!("⚠️ Queue mirror write failed for guild {}: {}", guild_id, e);
            }
        }
        debug!("Queue mirror worker stopped");
    }

    async fn write(&self, event: &MirrorEvent) -> Result<(), reqwest::Error> {
        let request = match event {
            MirrorEvent::Created { guild_id, tracks } => self
                .http
                .post(format!("{}/queues", self.base_url))
                .json(&QueueBody::new(*guild_id, tracks)),
            MirrorEvent::Updated { guild_id, tracks } => self
                .http
                .put(format!("{}/queues/{}", self.base_url, guild_id))
                .json(&QueueBody::new(*guild_id, tracks)),
            MirrorEvent::Deleted { guild_id } => self
                .http
                .delete(format!("{}/queues/{}", self.base_url, guild_id)),
        };

        let request = match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        request.send().await?.error_for_status()?;
        Ok(())
    }
}
