use rand::seq::SliceRandom;
use serenity::model::id::{GuildId, UserId};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

use super::player::PlaybackEngine;
use super::queue::QueuePage;
use crate::error::{PlayError, QueueError};
use crate::sources::{is_url, Provider, ProviderDispatcher, Requester, Track};

/// Shortest free-text search accepted.
pub const MIN_SEARCH_LEN: usize = 3;

/// Result of a successful `/play`.
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub provider: Provider,
    pub tracks: Vec<Track>,
    /// 1-based queue position of the first added track
    pub position: usize,
    pub queue_len: usize,
    /// Resolved tracks left out because the queue was full
    pub dropped: usize,
}

/// Command-level operations: resolution, queue editing and the glue that
/// starts playback afterwards.
pub struct Jukebox {
    dispatcher: Arc<ProviderDispatcher>,
    engine: Arc<PlaybackEngine>,
    max_queue_size: usize,
}

impl Jukebox {
    pub fn new(
        dispatcher: Arc<ProviderDispatcher>,
        engine: Arc<PlaybackEngine>,
        max_queue_size: usize,
    ) -> Self {
        Self {
            dispatcher,
            engine,
            max_queue_size,
        }
    }

    pub fn engine(&self) -> &Arc<PlaybackEngine> {
        &self.engine
    }

    /// Resolves `query`, queues what fits and starts playback if idle.
    ///
    /// Resolution runs without any guild lock; only the final append is
    /// serialized with playback.
    pub async fn play(
        &self,
        guild_id: GuildId,
        requester: Requester,
        query: &str,
        hint: Option<Provider>,
    ) -> Result<Enqueued, PlayError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PlayError::QueryTooShort {
                min: MIN_SEARCH_LEN,
            });
        }

        let provider = self.dispatcher.detect_provider(query, hint).ok_or_else(|| {
            PlayError::UnsupportedProvider {
                supported: Provider::supported_list(),
            }
        })?;

        if !is_url(query) && query.chars().count() < MIN_SEARCH_LEN {
            return Err(PlayError::QueryTooShort {
                min: MIN_SEARCH_LEN,
            });
        }

        let resolved = self.dispatcher.resolve(provider, query, &requester).await;
        if resolved.is_empty() {
            self.engine.release_if_idle(guild_id).await;
            return Err(PlayError::NoTracksResolved {
                provider,
                query: query.to_string(),
            });
        }

        let max = self.max_queue_size;
        let enqueued = self
            .engine
            .edit_queue(guild_id, |queues, _| {
                let current = queues.len(guild_id);
                let room = max.saturating_sub(current);
                if room == 0 {
                    return Err(PlayError::QueueFull { max });
                }

                let dropped = resolved.len().saturating_sub(room);
                let tracks: Vec<Track> = resolved.into_iter().take(room).collect();
                let queue_len = queues.append(guild_id, tracks.clone()).len();

                Ok(Enqueued {
                    provider,
                    tracks,
                    position: current + 1,
                    queue_len,
                    dropped,
                })
            })
            .await?;

        info!(
            "➕ {} track(s) queued in guild {} by {} ({} dropped)",
            enqueued.tracks.len(),
            guild_id,
            requester.user_name,
            enqueued.dropped
        );

        self.engine.try_play(guild_id).await;
        Ok(enqueued)
    }

    pub async fn queue_page(&self, guild_id: GuildId, page: usize) -> Result<QueuePage, QueueError> {
        self.engine
            .edit_queue(guild_id, |queues, _| {
                let tracks = queues.get(guild_id);
                if tracks.is_empty() {
                    return Err(QueueError::EmptyQueue);
                }
                QueuePage::build(&tracks, page).ok_or(QueueError::InvalidPage {
                    pages: QueuePage::page_count(tracks.len()),
                })
            })
            .await
    }

    /// Shuffles everything after the head. Returns the queue length.
    pub async fn shuffle(&self, guild_id: GuildId) -> Result<usize, QueueError> {
        self.engine
            .edit_queue(guild_id, |queues, _| {
                let mut tracks = queues.get(guild_id);
                if tracks.len() < 2 {
                    return Err(QueueError::NotEnoughTracks);
                }

                tracks[1..].shuffle(&mut rand::thread_rng());
                Ok(queues.replace(guild_id, tracks).len())
            })
            .await
    }

    /// Empties the queue, keeping the track being played. Returns how many
    /// tracks were removed.
    pub async fn clear(&self, guild_id: GuildId) -> Result<usize, QueueError> {
        self.engine
            .edit_queue(guild_id, |queues, phase| {
                let len = queues.len(guild_id);
                if len == 0 {
                    return Err(QueueError::EmptyQueue);
                }

                if phase.is_active() {
                    queues.splice_range(guild_id, 1, len - 1);
                    Ok(len - 1)
                } else {
                    queues.remove(guild_id);
                    Ok(len)
                }
            })
            .await
    }

    /// Keeps the first occurrence of every stream source.
    pub async fn remove_duplicates(&self, guild_id: GuildId) -> Result<usize, QueueError> {
        self.engine
            .edit_queue(guild_id, |queues, _| {
                let tracks = queues.get(guild_id);
                if tracks.is_empty() {
                    return Err(QueueError::EmptyQueue);
                }

                let before = tracks.len();
                let mut seen = HashSet::new();
                let unique: Vec<Track> = tracks
                    .into_iter()
                    .filter(|track| seen.insert(track.stream_url().to_string()))
                    .collect();

                let removed = before - unique.len();
                if removed > 0 {
                    queues.replace(guild_id, unique);
                }
                Ok(removed)
            })
            .await
    }

    /// Drops tracks whose requester is not in `present`.
    pub async fn remove_absent(
        &self,
        guild_id: GuildId,
        present: &HashSet<UserId>,
    ) -> Result<usize, QueueError> {
        self.engine
            .edit_queue(guild_id, |queues, phase| {
                let tracks = queues.get(guild_id);
                if tracks.is_empty() {
                    return Err(QueueError::EmptyQueue);
                }

                let before = tracks.len();
                let kept: Vec<Track> = tracks
                    .into_iter()
                    .enumerate()
                    .filter(|(index, track)| {
                        (*index == 0 && phase.is_active())
                            || present.contains(&track.requested_by().user_id)
                    })
                    .map(|(_, track)| track)
                    .collect();

                let removed = before - kept.len();
                if removed > 0 {
                    queues.replace(guild_id, kept);
                }
                Ok(removed)
            })
            .await
    }

    /// Removes `count` tracks starting at 1-based `position`.
    pub async fn remove_range(
        &self,
        guild_id: GuildId,
        position: usize,
        count: usize,
    ) -> Result<Vec<Track>, QueueError> {
        self.engine
            .edit_queue(guild_id, |queues, phase| {
                let tracks = queues.get(guild_id);
                let len = tracks.len();
                if len == 0 {
                    return Err(QueueError::EmptyQueue);
                }
                if position == 0 || position > len {
                    return Err(QueueError::InvalidRange { len });
                }
                if position == 1 && phase.is_active() {
                    return Err(QueueError::CurrentTrack);
                }

                let start = position - 1;
                let end = start.saturating_add(count.max(1)).min(len);
                queues.splice_range(guild_id, start, end - start);
                Ok(tracks[start..end].to_vec())
            })
            .await
    }

    pub async fn leave(&self, guild_id: GuildId) {
        self.engine.cleanup(guild_id).await;
    }
}
