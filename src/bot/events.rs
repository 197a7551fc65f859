use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    builder::{CreateEmbed, CreateMessage},
    http::Http,
    model::id::{ChannelId, GuildId},
};
use songbird::{
    input::{HttpRequest, Input, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Call, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler, Songbird,
    TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{
    EndReason, OpenedStream, PlaybackListener, StreamControl, VoiceGateway, VoiceSession,
};
use crate::error::PlayerError;
use crate::sources::{StreamLocator, Track};
use crate::ui::embeds;

/// Voice sessions backed by songbird calls.
pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { manager, http }
    }
}

impl VoiceGateway for SongbirdGateway {
    fn session(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceSession>> {
        let call = self.manager.get(guild_id)?;
        Some(Arc::new(SongbirdSession {
            guild_id,
            call,
            manager: Arc::clone(&self.manager),
            http: self.http.clone(),
        }))
    }
}

struct SongbirdSession {
    guild_id: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

#[async_trait]
impl VoiceSession for SongbirdSession {
    fn is_session_active(&self) -> bool {
        // A call that is busy is being driven, so it counts as connected.
        self.call
            .try_lock()
            .map(|call| call.current_channel().is_some())
            .unwrap_or(true)
    }

    async fn open_stream(&self, locator: &StreamLocator) -> Result<OpenedStream, PlayerError> {
        let input: Input = match locator {
            StreamLocator::AudioOnly { url } => YoutubeDl::new(self.http.clone(), url.clone()).into(),
            StreamLocator::Direct { url } => HttpRequest::new(self.http.clone(), url.clone()).into(),
        };

        let handle = self.call.lock().await.play_input(input);
        let (sender, terminal) = mpsc::unbounded_channel();
        let requested = Arc::new(Mutex::new(None));

        for event in [TrackEvent::End, TrackEvent::Error] {
            let notifier = TerminalNotifier {
                guild_id: self.guild_id,
                sender: sender.clone(),
                requested: Arc::clone(&requested),
            };
            if let Err(e) = handle.add_event(VoiceEvent::Track(event), notifier) {
                let _ = handle.stop();
                return Err(PlayerError::StreamOpen(e.to_string()));
            }
        }

        debug!("🎧 {} stream handed to songbird in guild {}", locator.kind(), self.guild_id);
        Ok(OpenedStream {
            control: Box::new(SongbirdStream { handle, requested }),
            terminal,
        })
    }

    async fn leave(&self) -> Result<(), PlayerError> {
        self.manager
            .remove(self.guild_id)
            .await
            .map_err(|e| PlayerError::Voice(e.to_string()))
    }
}

/// Controls of one songbird track.
struct SongbirdStream {
    handle: TrackHandle,
    /// Reason recorded by [`StreamControl::end`], reported by the end event
    requested: Arc<Mutex<Option<EndReason>>>,
}

#[async_trait]
impl StreamControl for SongbirdStream {
    fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        self.handle
            .set_volume(volume)
            .map_err(|e| PlayerError::StreamControl(e.to_string()))
    }

    fn pause(&self) -> Result<(), PlayerError> {
        self.handle
            .pause()
            .map_err(|e| PlayerError::StreamControl(e.to_string()))
    }

    fn resume(&self) -> Result<(), PlayerError> {
        self.handle
            .play()
            .map_err(|e| PlayerError::StreamControl(e.to_string()))
    }

    fn end(&self, reason: EndReason) {
        *self.requested.lock() = Some(reason);
        if let Err(e) = self.handle.stop() {
            debug!("Track already gone when stopping: {}", e);
        }
    }

    async fn position(&self) -> Option<Duration> {
        self.handle.get_info().await.ok().map(|state| state.position)
    }
}

/// Forwards songbird's end and error events into the stream's terminal
/// channel.
struct TerminalNotifier {
    guild_id: GuildId,
    sender: mpsc::UnboundedSender<EndReason>,
    requested: Arc<Mutex<Option<EndReason>>>,
}

#[async_trait]
impl VoiceEventHandler for TerminalNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let failure = match ctx {
            EventContext::Track(tracks) => tracks.iter().find_map(|(state, _)| match &state.playing {
                PlayMode::Errored(e) => Some(EndReason::Failed(format!("{:?}", e))),
                _ => None,
            }),
            _ => None,
        };

        let reason = failure
            .or_else(|| self.requested.lock().clone())
            .unwrap_or(EndReason::Finished);

        debug!("Track event '{}' in guild {}", reason.tag(), self.guild_id);
        if self.sender.send(reason).is_err() {
            debug!("Terminal channel of guild {} already closed", self.guild_id);
        }

        None
    }
}

/// Posts playback notifications to the channel a track was requested from.
pub struct ChannelNotifier {
    http: Arc<Http>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    fn post(&self, channel_id: ChannelId, embed: CreateEmbed) {
        let http = Arc::clone(&self.http);
        tokio::spawn(async move {
            if let Err(e) = channel_id
                .send_message(&*http, CreateMessage::new().embed(embed))
                .await
            {
                warn!("⚠️ Could not post to channel {}: {:?}", channel_id, e);
            }
        });
    }
}

impl PlaybackListener for ChannelNotifier {
    fn track_started(&self, guild_id: GuildId, track: &Track) {
        info!("📣 Announcing {} in guild {}", track.title(), guild_id);
        self.post(
            track.requested_by().channel_id,
            embeds::create_now_playing_embed(track),
        );
    }

    fn track_failed(&self, _guild_id: GuildId, track: &Track, error: &PlayerError) {
        self.post(
            track.requested_by().channel_id,
            embeds::create_track_failed_embed(track, &error.to_string()),
        );
    }

    fn queue_finished(&self, _guild_id: GuildId, last: &Track) {
        self.post(
            last.requested_by().channel_id,
            embeds::create_queue_finished_embed(),
        );
    }
}
