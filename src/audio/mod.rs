//! # Audio Module
//!
//! Per-guild queues and the playback state machine driving them.
//!
//! ## Architecture
//!
//! ### [`queue`] - Guild Queue Store
//! - One track list per guild, absent when empty
//! - Snapshot-returning operations, mirrored to the queue API
//!
//! ### [`player`] - Playback Engine
//! - `Idle → Starting → Playing → Ending` per guild, behind one async mutex
//! - Continuous playback, skip de-duplication, voice release on empty queue
//!
//! ### [`voice`] - Voice capabilities
//! - What the engine needs from a voice connection: open a stream, leave
//!
//! ### [`jukebox`] - Command facade
//! - Play flow (detect, resolve, cap, append, start) and queue editing

pub mod jukebox;
pub mod player;
pub mod queue;
pub mod voice;

pub use jukebox::{Enqueued, Jukebox};
pub use player::{NowPlaying, PlaybackEngine, PlaybackListener, PlaybackPhase, PlaybackSettings};
pub use queue::{GuildQueueStore, QueuePage};
pub use voice::{EndReason, OpenedStream, StreamControl, VoiceGateway, VoiceSession};
