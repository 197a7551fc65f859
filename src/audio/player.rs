use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::queue::GuildQueueStore;
use super::voice::{EndReason, OpenedStream, StreamControl, VoiceGateway, VoiceSession};
use crate::error::PlayerError;
use crate::sources::{ProviderDispatcher, Track};

/// Receives playback notifications. Implementations must not block.
pub trait PlaybackListener: Send + Sync {
    fn track_started(&self, guild_id: GuildId, track: &Track);
    fn track_failed(&self, guild_id: GuildId, track: &Track, error: &PlayerError);
    /// The queue ran dry after `last` and the voice session was released.
    fn queue_finished(&self, guild_id: GuildId, last: &Track);
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackSettings {
    /// Percent applied to every guild until changed with `/volume`.
    pub default_volume: u8,
    pub open_timeout: Duration,
}

/// Externally visible playback state of a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Idle,
    Starting,
    Playing,
    Ending,
}

impl PlaybackPhase {
    /// A track is at the head of the queue and being played (or about to).
    pub fn is_active(&self) -> bool {
        !matches!(self, PlaybackPhase::Idle)
    }
}

/// Snapshot for `/nowplaying`.
#[derive(Debug, Clone)]
pub struct NowPlaying {
    pub track: Track,
    pub position: Option<Duration>,
    pub paused: bool,
}

struct ActiveStream {
    session: u64,
    track: Track,
    control: Box<dyn StreamControl>,
    paused: bool,
}

enum State {
    Idle,
    Starting { session: u64 },
    Playing(ActiveStream),
    Ending { session: u64 },
}

impl State {
    fn phase(&self) -> PlaybackPhase {
        match self {
            State::Idle => PlaybackPhase::Idle,
            State::Starting { .. } => PlaybackPhase::Starting,
            State::Playing(_) => PlaybackPhase::Playing,
            State::Ending { .. } => PlaybackPhase::Ending,
        }
    }
}

struct GuildPlayback {
    state: State,
    /// Percent, 0..=100
    volume: u8,
}

enum Attempt {
    /// Started a stream or had nothing to do
    Done,
    /// The head failed to open and was dropped; try the next one
    Advance,
}

/// Per-guild playback state machine.
///
/// Each guild gets a lazily created slot guarded by its own async mutex.
/// Every state transition and every queue mutation made on behalf of a
/// guild happens while that mutex is held; only opening a stream runs with
/// it released, guarded by the `Starting` state and a session number.
pub struct PlaybackEngine {
    queues: Arc<GuildQueueStore>,
    dispatcher: Arc<ProviderDispatcher>,
    voice: Arc<dyn VoiceGateway>,
    listener: Arc<dyn PlaybackListener>,
    guilds: DashMap<GuildId, Arc<Mutex<GuildPlayback>>>,
    settings: PlaybackSettings,
    sessions: AtomicU64,
}

impl PlaybackEngine {
    pub fn new(
        queues: Arc<GuildQueueStore>,
        dispatcher: Arc<ProviderDispatcher>,
        voice: Arc<dyn VoiceGateway>,
        listener: Arc<dyn PlaybackListener>,
        settings: PlaybackSettings,
    ) -> Self {
        Self {
            queues,
            dispatcher,
            voice,
            listener,
            guilds: DashMap::new(),
            settings,
            sessions: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub fn queues(&self) -> &GuildQueueStore {
        &self.queues
    }

    /// Starts the head of the queue if the guild is idle and connected.
    ///
    /// Anything missing (voice session, tracks, idleness) makes this a
    /// logged no-op. Heads that fail to open are reported and dropped until
    /// one plays or the queue is empty.
    pub async fn try_play(self: &Arc<Self>, guild_id: GuildId) {
        while let Attempt::Advance = self.start_head(guild_id).await {}
        self.collect(guild_id);
    }

    async fn start_head(self: &Arc<Self>, guild_id: GuildId) -> Attempt {
        let slot = self.slot(guild_id);

        let (session, voice, track) = {
            let mut guild = slot.lock().await;

            if !matches!(guild.state, State::Idle) {
                debug!("⏭️ Guild {} is {:?}, not starting", guild_id, guild.state.phase());
                return Attempt::Done;
            }
            let Some(voice) = self.voice.session(guild_id) else {
                debug!("🔇 No voice session in guild {}, not starting", guild_id);
                return Attempt::Done;
            };
            if !voice.is_session_active() {
                debug!("🔇 Voice session of guild {} is not active", guild_id);
                return Attempt::Done;
            }
            let Some(track) = self.queues.head(guild_id) else {
                debug!("📭 Queue of guild {} is empty", guild_id);
                return Attempt::Done;
            };

            let session = self.sessions.fetch_add(1, Ordering::Relaxed) + 1;
            guild.state = State::Starting { session };
            (session, voice, track)
        };

        let opened = self.open(voice.as_ref(), &track).await;

        let mut guild = slot.lock().await;
        if !matches!(guild.state, State::Starting { session: current } if current == session) {
            debug!("Guild {} was reset while opening {}", guild_id, track.title());
            if let Ok(stream) = opened {
                stream.control.end(EndReason::Stopped);
            }
            return Attempt::Done;
        }

        match opened {
            Ok(OpenedStream { control, terminal }) => {
                if let Err(e) = control.set_volume(multiplier(guild.volume)) {
                    warn!("⚠️ Could not apply volume in guild {}: {}", guild_id, e);
                }
                guild.state = State::Playing(ActiveStream {
                    session,
                    track: track.clone(),
                    control,
                    paused: false,
                });
                self.watch(guild_id, session, terminal);
                drop(guild);

                info!("▶️ Playing in guild {}: {}", guild_id, track.title());
                self.listener.track_started(guild_id, &track);
                Attempt::Done
            }
            Err(e) => {
                warn!("❌ Could not open {} in guild {}: {}", track.title(), guild_id, e);
                self.listener.track_failed(guild_id, &track, &e);

                guild.state = State::Ending { session };
                let remaining = self.queues.pop_front(guild_id);
                if remaining.is_empty() {
                    self.release_voice(guild_id, voice.as_ref()).await;
                    guild.state = State::Idle;
                    drop(guild);
                    self.listener.queue_finished(guild_id, &track);
                    Attempt::Done
                } else {
                    guild.state = State::Idle;
                    Attempt::Advance
                }
            }
        }
    }

    async fn open(&self, voice: &dyn VoiceSession, track: &Track) -> Result<OpenedStream, PlayerError> {
        let locator = self
            .dispatcher
            .stream_source(track)
            .map_err(|e| PlayerError::StreamOpen(e.to_string()))?;

        debug!("🎧 Opening {} stream: {}", locator.kind(), locator.url());
        let timeout = self.settings.open_timeout;
        tokio::time::timeout(timeout, voice.open_stream(&locator))
            .await
            .map_err(|_| PlayerError::OpenTimedOut(timeout))?
    }

    /// Hands the first terminal event of a stream to [`Self::finish`].
    fn watch(
        self: &Arc<Self>,
        guild_id: GuildId,
        session: u64,
        mut terminal: mpsc::UnboundedReceiver<EndReason>,
    ) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let reason = terminal
                .recv()
                .await
                .unwrap_or_else(|| EndReason::Failed("stream vanished without an end event".into()));
            engine.finish(guild_id, session, reason).await;

            while let Some(duplicate) = terminal.recv().await {
                debug!(
                    "Ignoring extra '{}' end event for guild {}",
                    duplicate.tag(),
                    guild_id
                );
            }
        });
    }

    /// Advances the queue after the stream of `session` ended.
    async fn finish(self: &Arc<Self>, guild_id: GuildId, session: u64, reason: EndReason) {
        let Some(slot) = self.existing_slot(guild_id) else {
            return;
        };
        let mut guild = slot.lock().await;

        let ended = match std::mem::replace(&mut guild.state, State::Ending { session }) {
            State::Playing(active) if active.session == session => active,
            other => {
                guild.state = other;
                debug!(
                    "Stale '{}' end event for guild {} ignored",
                    reason.tag(),
                    guild_id
                );
                return;
            }
        };

        match &reason {
            EndReason::Failed(e) => warn!("⚠️ Stream failed in guild {}: {}", guild_id, e),
            _ => info!(
                "⏹️ Track ended in guild {} ({}): {}",
                guild_id,
                reason.tag(),
                ended.track.title()
            ),
        }

        let remaining = self.queues.pop_front(guild_id);
        if remaining.is_empty() {
            if let Some(voice) = self.voice.session(guild_id) {
                self.release_voice(guild_id, voice.as_ref()).await;
            }
            guild.state = State::Idle;
            drop(guild);
            drop(slot);

            info!("📭 Queue finished in guild {}", guild_id);
            self.listener.queue_finished(guild_id, &ended.track);
            self.collect(guild_id);
        } else {
            guild.state = State::Idle;
            drop(guild);
            drop(slot);

            self.try_play(guild_id).await;
        }
    }

    /// Ends the current stream with a skip; the queue advances once the
    /// stream reports its end.
    pub async fn skip(&self, guild_id: GuildId) -> Result<Track, PlayerError> {
        let slot = self
            .existing_slot(guild_id)
            .ok_or(PlayerError::NothingToSkip)?;
        let guild = slot.lock().await;

        match &guild.state {
            State::Playing(active) => {
                info!("⏭️ Skipping in guild {}: {}", guild_id, active.track.title());
                active.control.end(EndReason::Skipped);
                Ok(active.track.clone())
            }
            _ => Err(PlayerError::NothingToSkip),
        }
    }

    /// Drops the queue, stops any stream and leaves the voice channel.
    pub async fn cleanup(&self, guild_id: GuildId) {
        let slot = self.slot(guild_id);
        {
            let mut guild = slot.lock().await;
            self.queues.remove(guild_id);

            if let State::Playing(active) = std::mem::replace(&mut guild.state, State::Idle) {
                active.control.end(EndReason::Stopped);
            }
            if let Some(voice) = self.voice.session(guild_id) {
                self.release_voice(guild_id, voice.as_ref()).await;
            }
        }
        drop(slot);

        info!("🧹 Cleaned up guild {}", guild_id);
        self.collect(guild_id);
    }

    /// Leaves the voice channel when the guild has nothing to play.
    pub async fn release_if_idle(&self, guild_id: GuildId) {
        let slot = self.slot(guild_id);
        {
            let guild = slot.lock().await;
            if matches!(guild.state, State::Idle) && !self.queues.contains(guild_id) {
                if let Some(voice) = self.voice.session(guild_id) {
                    self.release_voice(guild_id, voice.as_ref()).await;
                }
            }
        }
        drop(slot);
        self.collect(guild_id);
    }

    /// Sets the volume of the live stream from a 0..=100 percentage.
    pub async fn set_volume(&self, guild_id: GuildId, level: i64) -> Result<u8, PlayerError> {
        let percent = u8::try_from(level)
            .ok()
            .filter(|percent| *percent <= 100)
            .ok_or(PlayerError::VolumeOutOfRange(level))?;

        let slot = self.existing_slot(guild_id).ok_or(PlayerError::NotPlaying)?;
        let mut guild = slot.lock().await;
        {
            let State::Playing(active) = &guild.state else {
                return Err(PlayerError::NotPlaying);
            };
            active.control.set_volume(multiplier(percent))?;
        }
        guild.volume = percent;

        info!("🔊 Volume in guild {} set to {}%", guild_id, percent);
        Ok(percent)
    }

    pub async fn volume(&self, guild_id: GuildId) -> u8 {
        match self.existing_slot(guild_id) {
            Some(slot) => slot.lock().await.volume,
            None => self.settings.default_volume,
        }
    }

    pub async fn pause(&self, guild_id: GuildId) -> Result<Track, PlayerError> {
        self.with_active(guild_id, |active| {
            active.control.pause()?;
            active.paused = true;
            Ok(active.track.clone())
        })
        .await
    }

    pub async fn resume(&self, guild_id: GuildId) -> Result<Track, PlayerError> {
        self.with_active(guild_id, |active| {
            active.control.resume()?;
            active.paused = false;
            Ok(active.track.clone())
        })
        .await
    }

    pub async fn now_playing(&self, guild_id: GuildId) -> Option<NowPlaying> {
        let slot = self.existing_slot(guild_id)?;
        let guild = slot.lock().await;
        let State::Playing(active) = &guild.state else {
            return None;
        };

        Some(NowPlaying {
            track: active.track.clone(),
            position: active.control.position().await,
            paused: active.paused,
        })
    }

    #[cfg(test)]
    pub async fn phase(&self, guild_id: GuildId) -> PlaybackPhase {
        match self.existing_slot(guild_id) {
            Some(slot) => slot.lock().await.state.phase(),
            None => PlaybackPhase::Idle,
        }
    }

    /// Runs a queue edit serialized with playback transitions of the guild.
    pub async fn edit_queue<R>(
        &self,
        guild_id: GuildId,
        edit: impl FnOnce(&GuildQueueStore, PlaybackPhase) -> R,
    ) -> R {
        let slot = self.slot(guild_id);
        let result = {
            let guild = slot.lock().await;
            edit(&self.queues, guild.state.phase())
        };
        drop(slot);

        self.collect(guild_id);
        result
    }

    async fn with_active<R>(
        &self,
        guild_id: GuildId,
        action: impl FnOnce(&mut ActiveStream) -> Result<R, PlayerError>,
    ) -> Result<R, PlayerError> {
        let slot = self.existing_slot(guild_id).ok_or(PlayerError::NotPlaying)?;
        let mut guild = slot.lock().await;
        match &mut guild.state {
            State::Playing(active) => action(active),
            _ => Err(PlayerError::NotPlaying),
        }
    }

    async fn release_voice(&self, guild_id: GuildId, voice: &dyn VoiceSession) {
        match voice.leave().await {
            Ok(()) => info!("👋 Left voice in guild {}", guild_id),
            Err(e) => warn!("⚠️ Could not leave voice in guild {}: {}", guild_id, e),
        }
    }

    fn slot(&self, guild_id: GuildId) -> Arc<Mutex<GuildPlayback>> {
        let default_volume = self.settings.default_volume;
        Arc::clone(
            self.guilds
                .entry(guild_id)
                .or_insert_with(|| {
                    Arc::new(Mutex::new(GuildPlayback {
                        state: State::Idle,
                        volume: default_volume,
                    }))
                })
                .value(),
        )
    }

    fn existing_slot(&self, guild_id: GuildId) -> Option<Arc<Mutex<GuildPlayback>>> {
        self.guilds.get(&guild_id).map(|slot| Arc::clone(slot.value()))
    }

    /// Drops the slot of an idle guild with no queue that nobody else holds.
    fn collect(&self, guild_id: GuildId) {
        let removed = self.guilds.remove_if(&guild_id, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .is_ok_and(|guild| matches!(guild.state, State::Idle))
                && !self.queues.contains(guild_id)
        });

        if removed.is_some() {
            debug!("Released playback slot of guild {}", guild_id);
        }
    }
}

fn multiplier(percent: u8) -> f32 {
    f32::from(percent) / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::voice::fakes::FakeGateway;
    use crate::sources::fakes::{dispatcher, FakeSource};
    use crate::sources::track::fixtures::track;
    use crate::sources::Provider;
    use crate::storage::NoopMirror;
    use parking_lot::Mutex as SyncMutex;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(10);

    #[derive(Default)]
    struct RecordingListener {
        events: SyncMutex<Vec<String>>,
    }

    impl RecordingListener {
        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl PlaybackListener for RecordingListener {
        fn track_started(&self, _guild_id: GuildId, track: &Track) {
            self.events.lock().push(format!("started:{}", track.title()));
        }

        fn track_failed(&self, _guild_id: GuildId, track: &Track, _error: &PlayerError) {
            self.events.lock().push(format!("failed:{}", track.title()));
        }

        fn queue_finished(&self, _guild_id: GuildId, last: &Track) {
            self.events.lock().push(format!("finished:{}", last.title()));
        }
    }

    struct Harness {
        engine: Arc<PlaybackEngine>,
        gateway: Arc<FakeGateway>,
        listener: Arc<RecordingListener>,
    }

    impl Harness {
        fn new() -> Self {
            let gateway = Arc::new(FakeGateway::default());
            let listener = Arc::new(RecordingListener::default());
            let engine = Arc::new(PlaybackEngine::new(
                Arc::new(GuildQueueStore::new(Arc::new(NoopMirror))),
                Arc::new(dispatcher(
                    FakeSource::new(Provider::YouTube),
                    FakeSource::new(Provider::SoundCloud),
                )),
                gateway.clone(),
                listener.clone(),
                PlaybackSettings {
                    default_volume: 50,
                    open_timeout: Duration::from_secs(1),
                },
            ));
            Self {
                engine,
                gateway,
                listener,
            }
        }

        fn queue(&self, names: &[&str]) {
            self.engine
                .queues()
                .append(GUILD, names.iter().map(|name| track(name)).collect());
        }

        fn titles(&self) -> Vec<String> {
            self.engine
                .queues()
                .get(GUILD)
                .iter()
                .map(|t| t.title().to_string())
                .collect()
        }
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn try_play_without_voice_session_does_nothing() {
        let h = Harness::new();
        h.queue(&["a"]);

        h.engine.try_play(GUILD).await;

        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Idle);
        assert_eq!(h.titles(), vec!["a"]);
        assert!(h.listener.events().is_empty());
    }

    #[tokio::test]
    async fn try_play_with_empty_queue_opens_nothing() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);

        h.engine.try_play(GUILD).await;

        assert_eq!(session.opened_count(), 0);
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Idle);
        assert!(h.engine.guilds.is_empty());
    }

    #[tokio::test]
    async fn try_play_while_playing_opens_nothing_more() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a", "b"]);

        h.engine.try_play(GUILD).await;
        h.engine.try_play(GUILD).await;

        assert_eq!(session.opened_count(), 1);
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Playing);
        assert_eq!(h.titles(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn try_play_while_starting_opens_nothing_more() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        let gate = session.hold_opens();
        h.queue(&["a", "b"]);

        let engine = Arc::clone(&h.engine);
        let first = tokio::spawn(async move { engine.try_play(GUILD).await });
        eventually(|| session.opened_count() == 1).await;
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Starting);

        h.engine.try_play(GUILD).await;
        assert_eq!(session.opened_count(), 1);

        gate.notify_one();
        first.await.unwrap();

        assert_eq!(session.opened_count(), 1);
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Playing);
        assert_eq!(h.listener.events(), vec!["started:a"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_and_skips_keep_arrival_order() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["seed"]);
        h.engine.try_play(GUILD).await;

        let appender = |prefix: &'static str| {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move {
                for i in 0..10 {
                    let name = format!("{}{}", prefix, i);
                    engine
                        .edit_queue(GUILD, |queues, _| queues.append(GUILD, vec![track(&name)]))
                        .await;
                    engine.try_play(GUILD).await;
                    tokio::task::yield_now().await;
                }
            })
        };
        let skipper = {
            let engine = Arc::clone(&h.engine);
            tokio::spawn(async move {
                for _ in 0..8 {
                    let _ = engine.skip(GUILD).await;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
            })
        };

        let (a, b, skips) = tokio::join!(appender("a"), appender("b"), skipper);
        a.unwrap();
        b.unwrap();
        skips.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Playing);
        let opened: Vec<String> = session
            .opened
            .lock()
            .iter()
            .filter_map(|locator| locator.url().rsplit("v=").next().map(str::to_string))
            .collect();
        let queued = h.titles();
        assert_eq!(opened.last(), queued.first());

        // Finished tracks followed by the queue, each track exactly once
        let mut seen: Vec<String> = opened[..opened.len() - 1].to_vec();
        seen.extend(queued);
        assert_eq!(seen[0], "seed");
        for prefix in ["a", "b"] {
            let in_order: Vec<String> = seen
                .iter()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect();
            let expected: Vec<String> = (0..10).map(|i| format!("{}{}", prefix, i)).collect();
            assert_eq!(in_order, expected);
        }
        assert_eq!(seen.len(), 21);
    }

    #[tokio::test]
    async fn release_if_idle_leaves_only_without_a_queue() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a"]);

        h.engine.release_if_idle(GUILD).await;
        assert_eq!(session.leave_count(), 0);

        h.engine.queues().remove(GUILD);
        h.engine.release_if_idle(GUILD).await;
        assert_eq!(session.leave_count(), 1);
        assert!(h.engine.guilds.is_empty());
    }

    #[tokio::test]
    async fn try_play_on_inactive_session_does_nothing() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        session
            .active
            .store(false, std::sync::atomic::Ordering::SeqCst);
        h.queue(&["a"]);

        h.engine.try_play(GUILD).await;

        assert_eq!(session.opened_count(), 0);
    }

    #[tokio::test]
    async fn starting_applies_the_guild_volume() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a"]);

        h.engine.try_play(GUILD).await;

        assert_eq!(*session.stream(0).volume.lock(), Some(0.5));
        assert_eq!(h.listener.events(), vec!["started:a"]);
        let now = h.engine.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title(), "a");
        assert_eq!(now.position, Some(Duration::from_secs(42)));
        assert!(!now.paused);
    }

    #[tokio::test]
    async fn skip_advances_exactly_once_despite_duplicate_end_events() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a", "b", "c"]);
        h.engine.try_play(GUILD).await;

        let skipped = h.engine.skip(GUILD).await.unwrap();

        assert_eq!(skipped.title(), "a");
        eventually(|| session.opened_count() == 2).await;
        // give a second advance a chance to happen
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.opened_count(), 2);
        assert_eq!(h.titles(), vec!["b", "c"]);
        assert_eq!(*session.stream(0).ended_with.lock(), vec![EndReason::Skipped]);
        assert_eq!(
            h.engine.now_playing(GUILD).await.map(|n| n.track.title().to_string()),
            Some("b".to_string())
        );
    }

    #[tokio::test]
    async fn skip_when_idle_is_rejected() {
        let h = Harness::new();
        h.gateway.connect(GUILD);

        assert_eq!(h.engine.skip(GUILD).await, Err(PlayerError::NothingToSkip));
    }

    #[tokio::test]
    async fn playback_continues_then_leaves_on_empty_queue() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a", "b"]);
        h.engine.try_play(GUILD).await;

        session.stream(0).emit(EndReason::Finished);
        eventually(|| session.opened_count() == 2).await;
        session.stream(1).emit(EndReason::Finished);
        eventually(|| session.leave_count() == 1).await;

        assert!(!h.engine.queues().contains(GUILD));
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Idle);
        assert_eq!(
            h.listener.events(),
            vec!["started:a", "started:b", "finished:b"]
        );
        eventually(|| h.engine.guilds.is_empty()).await;
    }

    #[tokio::test]
    async fn stream_fault_still_advances_the_queue() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a", "b"]);
        h.engine.try_play(GUILD).await;

        session
            .stream(0)
            .emit(EndReason::Failed("connection reset".into()));

        eventually(|| session.opened_count() == 2).await;
        assert_eq!(h.titles(), vec!["b"]);
    }

    #[tokio::test]
    async fn open_failure_drops_the_head_and_tries_the_next() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        session.fail_on("v=bad");
        h.queue(&["bad", "b"]);

        h.engine.try_play(GUILD).await;

        assert_eq!(session.opened_count(), 2);
        assert_eq!(h.titles(), vec!["b"]);
        assert_eq!(h.listener.events(), vec!["failed:bad", "started:b"]);
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Playing);
    }

    #[tokio::test]
    async fn open_failures_on_every_track_release_the_voice_session() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        session.fail_on("v=bad");
        h.queue(&["bad1", "bad2"]);

        h.engine.try_play(GUILD).await;

        assert!(!h.engine.queues().contains(GUILD));
        assert_eq!(session.leave_count(), 1);
        assert_eq!(
            h.listener.events(),
            vec!["failed:bad1", "failed:bad2", "finished:bad2"]
        );
    }

    #[tokio::test]
    async fn out_of_range_volume_leaves_the_stream_untouched() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a"]);
        h.engine.try_play(GUILD).await;

        assert_eq!(
            h.engine.set_volume(GUILD, 150).await,
            Err(PlayerError::VolumeOutOfRange(150))
        );
        assert_eq!(
            h.engine.set_volume(GUILD, -1).await,
            Err(PlayerError::VolumeOutOfRange(-1))
        );
        assert_eq!(*session.stream(0).volume.lock(), Some(0.5));
        assert_eq!(h.engine.volume(GUILD).await, 50);
    }

    #[tokio::test]
    async fn volume_requires_a_playing_stream() {
        let h = Harness::new();
        h.gateway.connect(GUILD);

        assert_eq!(
            h.engine.set_volume(GUILD, 20).await,
            Err(PlayerError::NotPlaying)
        );
    }

    #[tokio::test]
    async fn volume_carries_over_to_the_next_track() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a", "b"]);
        h.engine.try_play(GUILD).await;

        assert_eq!(h.engine.set_volume(GUILD, 80).await, Ok(80));
        assert_eq!(*session.stream(0).volume.lock(), Some(0.8));

        h.engine.skip(GUILD).await.unwrap();
        eventually(|| session.opened_count() == 2).await;
        assert_eq!(*session.stream(1).volume.lock(), Some(0.8));
    }

    #[tokio::test]
    async fn pause_and_resume_toggle_the_stream() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a"]);

        assert_eq!(h.engine.pause(GUILD).await, Err(PlayerError::NotPlaying));
        h.engine.try_play(GUILD).await;

        h.engine.pause(GUILD).await.unwrap();
        assert!(session.last_stream().paused.load(std::sync::atomic::Ordering::SeqCst));
        assert!(h.engine.now_playing(GUILD).await.unwrap().paused);

        h.engine.resume(GUILD).await.unwrap();
        assert!(!session.last_stream().paused.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cleanup_stops_everything_and_ignores_late_end_events() {
        let h = Harness::new();
        let session = h.gateway.connect(GUILD);
        h.queue(&["a", "b"]);
        h.engine.try_play(GUILD).await;

        h.engine.cleanup(GUILD).await;

        assert!(!h.engine.queues().contains(GUILD));
        assert_eq!(*session.stream(0).ended_with.lock(), vec![EndReason::Stopped]);
        assert_eq!(session.leave_count(), 1);
        assert_eq!(h.engine.phase(GUILD).await, PlaybackPhase::Idle);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(session.opened_count(), 1);
        assert!(h.engine.guilds.is_empty());
    }

    #[tokio::test]
    async fn queue_edits_see_the_playback_phase() {
        let h = Harness::new();
        h.gateway.connect(GUILD);
        h.queue(&["a"]);

        let idle = h.engine.edit_queue(GUILD, |_, phase| phase).await;
        h.engine.try_play(GUILD).await;
        let playing = h.engine.edit_queue(GUILD, |_, phase| phase).await;

        assert_eq!(idle, PlaybackPhase::Idle);
        assert_eq!(playing, PlaybackPhase::Playing);
        assert!(playing.is_active());
    }
}
