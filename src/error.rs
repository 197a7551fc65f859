//! Error types for resolution, playback and queue commands.
//!
//! Every `Display` message is written to be shown to the requester as-is.

use std::time::Duration;

use thiserror::Error;

use crate::sources::Provider;

/// Failures talking to a provider API.
///
/// These never cross [`ProviderDispatcher::resolve`](crate::sources::ProviderDispatcher::resolve):
/// resolvers log them and report "no tracks" instead.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (DNS, TLS, timeout, body decoding)
    #[error("request to {provider} failed: {source}")]
    Http {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    /// The API answered with a non-success status
    #[error("{provider} API returned {status}")]
    Status {
        provider: Provider,
        status: reqwest::StatusCode,
    },

    /// The API answered but the payload lacked what we need
    #[error("{provider} returned no usable metadata for {item}")]
    Unresolved { provider: Provider, item: String },

    /// A track's stream URL could not be turned into a locator
    #[error("invalid stream URL {0}")]
    InvalidStreamUrl(String),
}

/// Playback precondition violations and voice/stream faults.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("Unable to skip the track, make sure the bot is playing something.")]
    NothingToSkip,

    #[error("I am not playing anything right now.")]
    NotPlaying,

    #[error("{0} is not a valid volume, it must be a number between 0 and 100.")]
    VolumeOutOfRange(i64),

    #[error("voice connection error: {0}")]
    Voice(String),

    #[error("unable to open stream: {0}")]
    StreamOpen(String),

    #[error("stream control error: {0}")]
    StreamControl(String),

    #[error("opening the stream took longer than {0:?}")]
    OpenTimedOut(Duration),
}

/// Outcomes of the play command that are not a successful enqueue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    #[error("Sorry I don't support this provider/service. Here is a list of the supported providers: `{supported}`")]
    UnsupportedProvider { supported: String },

    #[error("The search query is too short, put at least {min} characters.")]
    QueryTooShort { min: usize },

    #[error("Your track hasn't been queued, nothing was found on {provider} for `{query}`.")]
    NoTracksResolved { provider: Provider, query: String },

    #[error("The queue is full ({max} tracks).")]
    QueueFull { max: usize },
}

/// Queue command preconditions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("There are no tracks in the queue.")]
    EmptyQueue,

    #[error("This is not a valid page, please put a value between 1 and {pages}.")]
    InvalidPage { pages: usize },

    #[error("You can't shuffle a queue with fewer than 2 tracks.")]
    NotEnoughTracks,

    #[error("Positions must be between 1 and {len}.")]
    InvalidRange { len: usize },

    #[error("The current track can't be removed, use skip instead.")]
    CurrentTrack,
}
