//! Capabilities the playback engine needs from the voice layer.
//!
//! The serenity/songbird implementation lives in `bot::events`; tests plug
//! in in-memory fakes.

use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::error::PlayerError;
use crate::sources::StreamLocator;

/// Why a stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Skipped,
    Stopped,
    Failed(String),
}

impl EndReason {
    pub fn tag(&self) -> &'static str {
        match self {
            EndReason::Finished => "finished",
            EndReason::Skipped => "skip",
            EndReason::Stopped => "stop",
            EndReason::Failed(_) => "error",
        }
    }
}

/// Live controls of an open stream.
#[async_trait]
pub trait StreamControl: Send + Sync {
    /// `volume` is a multiplier in `0.0..=1.0`.
    fn set_volume(&self, volume: f32) -> Result<(), PlayerError>;
    fn pause(&self) -> Result<(), PlayerError>;
    fn resume(&self) -> Result<(), PlayerError>;
    /// Forces the stream to end; the terminal event carries `reason`.
    fn end(&self, reason: EndReason);
    async fn position(&self) -> Option<Duration>;
}

/// A freshly opened stream and the channel its terminal events arrive on.
///
/// Some voice backends report a forced stop more than once, so the
/// receiver may yield several events. Only the first one counts.
pub struct OpenedStream {
    pub control: Box<dyn StreamControl>,
    pub terminal: mpsc::UnboundedReceiver<EndReason>,
}

/// A guild's voice connection.
#[async_trait]
pub trait VoiceSession: Send + Sync {
    fn is_session_active(&self) -> bool;
    async fn open_stream(&self, locator: &StreamLocator) -> Result<OpenedStream, PlayerError>;
    async fn leave(&self) -> Result<(), PlayerError>;
}

/// Looks up the voice session of a guild, if the bot has one.
pub trait VoiceGateway: Send + Sync {
    fn session(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceSession>>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use dashmap::DashMap;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    use super::*;

    /// Shared record of one opened fake stream.
    #[derive(Default)]
    pub struct StreamProbe {
        pub volume: Mutex<Option<f32>>,
        pub paused: AtomicBool,
        pub ended_with: Mutex<Vec<EndReason>>,
        sender: Mutex<Option<mpsc::UnboundedSender<EndReason>>>,
    }

    impl StreamProbe {
        /// Emits a terminal event as the backend would.
        pub fn emit(&self, reason: EndReason) {
            if let Some(sender) = self.sender.lock().as_ref() {
                let _ = sender.send(reason);
            }
        }
    }

    struct FakeControl {
        probe: Arc<StreamProbe>,
        /// Number of terminal events a forced end emits
        echoes: usize,
    }

    #[async_trait]
    impl StreamControl for FakeControl {
        fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
            *self.probe.volume.lock() = Some(volume);
            Ok(())
        }

        fn pause(&self) -> Result<(), PlayerError> {
            self.probe.paused.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn resume(&self) -> Result<(), PlayerError> {
            self.probe.paused.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn end(&self, reason: EndReason) {
            self.probe.ended_with.lock().push(reason.clone());
            for _ in 0..self.echoes {
                self.probe.emit(reason.clone());
            }
        }

        async fn position(&self) -> Option<Duration> {
            Some(Duration::from_secs(42))
        }
    }

    /// In-memory voice session recording what the engine asked of it.
    pub struct FakeSession {
        pub active: AtomicBool,
        pub opened: Mutex<Vec<StreamLocator>>,
        pub streams: Mutex<Vec<Arc<StreamProbe>>>,
        pub leaves: AtomicUsize,
        /// Locators containing one of these fragments fail to open
        pub failing: Mutex<Vec<String>>,
        /// Terminal events emitted per forced end
        pub echoes: usize,
        /// When set, every open waits for a permit before completing
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl FakeSession {
        pub fn new() -> Self {
            Self {
                active: AtomicBool::new(true),
                opened: Mutex::new(Vec::new()),
                streams: Mutex::new(Vec::new()),
                leaves: AtomicUsize::new(0),
                failing: Mutex::new(Vec::new()),
                echoes: 2,
                gate: Mutex::new(None),
            }
        }

        /// Holds every following open until the returned `Notify` is signalled.
        pub fn hold_opens(&self) -> Arc<Notify> {
            let gate = Arc::new(Notify::new());
            *self.gate.lock() = Some(gate.clone());
            gate
        }

        pub fn fail_on(&self, fragment: &str) {
            self.failing.lock().push(fragment.to_string());
        }

        pub fn opened_count(&self) -> usize {
            self.opened.lock().len()
        }

        pub fn stream(&self, index: usize) -> Arc<StreamProbe> {
            self.streams.lock()[index].clone()
        }

        pub fn last_stream(&self) -> Arc<StreamProbe> {
            let streams = self.streams.lock();
            streams[streams.len() - 1].clone()
        }

        pub fn leave_count(&self) -> usize {
            self.leaves.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VoiceSession for FakeSession {
        fn is_session_active(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        async fn open_stream(&self, locator: &StreamLocator) -> Result<OpenedStream, PlayerError> {
            self.opened.lock().push(locator.clone());

            let gate = self.gate.lock().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }

            if self.failing.lock().iter().any(|f| locator.url().contains(f.as_str())) {
                return Err(PlayerError::StreamOpen(format!("cannot open {}", locator.url())));
            }

            let (sender, terminal) = mpsc::unbounded_channel();
            let probe = Arc::new(StreamProbe::default());
            *probe.sender.lock() = Some(sender);
            self.streams.lock().push(probe.clone());

            Ok(OpenedStream {
                control: Box::new(FakeControl {
                    probe,
                    echoes: self.echoes,
                }),
                terminal,
            })
        }

        async fn leave(&self) -> Result<(), PlayerError> {
            self.leaves.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeGateway {
        sessions: DashMap<GuildId, Arc<FakeSession>>,
    }

    impl FakeGateway {
        pub fn connect(&self, guild_id: GuildId) -> Arc<FakeSession> {
            let session = Arc::new(FakeSession::new());
            self.sessions.insert(guild_id, session.clone());
            session
        }
    }

    impl VoiceGateway for FakeGateway {
        fn session(&self, guild_id: GuildId) -> Option<Arc<dyn VoiceSession>> {
            self.sessions
                .get(&guild_id)
                .map(|session| session.clone() as Arc<dyn VoiceSession>)
        }
    }
}
