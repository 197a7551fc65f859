use dashmap::{mapref::entry::Entry, DashMap};
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::debug;

use crate::sources::Track;
use crate::storage::{MirrorEvent, QueueMirror};

/// Tracks shown per page of `/queue`.
pub const PAGE_SIZE: usize = 10;

/// Per-guild track queues.
///
/// A guild with no tracks has no entry. Every operation works on one map
/// entry while holding its shard lock and hands back a snapshot, so callers
/// never share a live vector. Mirror events are published under the same
/// lock, which keeps them in mutation order for a given guild.
pub struct GuildQueueStore {
    queues: DashMap<GuildId, Vec<Track>>,
    mirror: Arc<dyn QueueMirror>,
}

impl GuildQueueStore {
    pub fn new(mirror: Arc<dyn QueueMirror>) -> Self {
        Self {
            queues: DashMap::new(),
            mirror,
        }
    }

    /// Adds tracks at the tail, creating the queue if needed.
    pub fn append(&self, guild_id: GuildId, tracks: Vec<Track>) -> Vec<Track> {
        if tracks.is_empty() {
            return self.get(guild_id);
        }

        match self.queues.entry(guild_id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().extend(tracks);
                let snapshot = entry.get().clone();
                self.mirror.publish(MirrorEvent::Updated {
                    guild_id,
                    tracks: snapshot.clone(),
                });
                snapshot
            }
            Entry::Vacant(entry) => {
                debug!("Queue created for guild {}", guild_id);
                let snapshot = tracks.clone();
                entry.insert(tracks);
                self.mirror.publish(MirrorEvent::Created {
                    guild_id,
                    tracks: snapshot.clone(),
                });
                snapshot
            }
        }
    }

    /// Drops the head; deletes the entry when nothing is left.
    pub fn pop_front(&self, guild_id: GuildId) -> Vec<Track> {
        self.mutate(guild_id, |tracks| {
            if !tracks.is_empty() {
                tracks.remove(0);
            }
        })
    }

    /// Removes up to `delete_count` tracks starting at `start`.
    ///
    /// Out-of-range bounds are clamped; a range past the end removes nothing.
    pub fn splice_range(&self, guild_id: GuildId, start: usize, delete_count: usize) -> Vec<Track> {
        self.mutate(guild_id, |tracks| {
            let start = start.min(tracks.len());
            let end = start.saturating_add(delete_count).min(tracks.len());
            tracks.drain(start..end);
        })
    }

    /// Swaps the whole queue, but only for a guild that already has one.
    pub fn replace(&self, guild_id: GuildId, new_tracks: Vec<Track>) -> Vec<Track> {
        self.mutate(guild_id, |tracks| *tracks = new_tracks)
    }

    pub fn remove(&self, guild_id: GuildId) {
        if self.queues.remove(&guild_id).is_some() {
            debug!("Queue removed for guild {}", guild_id);
            self.mirror.publish(MirrorEvent::Deleted { guild_id });
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Vec<Track> {
        self.queues
            .get(&guild_id)
            .map(|tracks| tracks.clone())
            .unwrap_or_default()
    }

    pub fn head(&self, guild_id: GuildId) -> Option<Track> {
        self.queues
            .get(&guild_id)
            .and_then(|tracks| tracks.first().cloned())
    }

    pub fn len(&self, guild_id: GuildId) -> usize {
        self.queues.get(&guild_id).map_or(0, |tracks| tracks.len())
    }

    pub fn contains(&self, guild_id: GuildId) -> bool {
        self.queues.contains_key(&guild_id)
    }

    /// Applies `change` to an existing queue and keeps "absent == empty".
    fn mutate(&self, guild_id: GuildId, change: impl FnOnce(&mut Vec<Track>)) -> Vec<Track> {
        let Entry::Occupied(mut entry) = self.queues.entry(guild_id) else {
            return Vec::new();
        };

        change(entry.get_mut());

        if entry.get().is_empty() {
            entry.remove();
            debug!("Queue emptied for guild {}", guild_id);
            self.mirror.publish(MirrorEvent::Deleted { guild_id });
            return Vec::new();
        }

        let snapshot = entry.get().clone();
        self.mirror.publish(MirrorEvent::Updated {
            guild_id,
            tracks: snapshot.clone(),
        });
        snapshot
    }
}

/// One page of a queue listing.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    /// `(1-based position, track)`
    pub items: Vec<(usize, Track)>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl QueuePage {
    /// Number of pages needed for `total` tracks (at least one).
    pub fn page_count(total: usize) -> usize {
        total.div_ceil(PAGE_SIZE).max(1)
    }

    /// Builds page `page` (1-based), or `None` when it does not exist.
    pub fn build(tracks: &[Track], page: usize) -> Option<Self> {
        let total_pages = Self::page_count(tracks.len());
        if page == 0 || page > total_pages {
            return None;
        }

        let start = (page - 1) * PAGE_SIZE;
        let items = tracks
            .iter()
            .enumerate()
            .skip(start)
            .take(PAGE_SIZE)
            .map(|(index, track)| (index + 1, track.clone()))
            .collect();

        Some(Self {
            items,
            current_page: page,
            total_pages,
            total_items: tracks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::track::fixtures::track;
    use crate::storage::{MockQueueMirror, NoopMirror};
    use mockall::predicate::eq;
    use mockall::Sequence;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);

    fn store() -> GuildQueueStore {
        GuildQueueStore::new(Arc::new(NoopMirror))
    }

    fn titles(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|t| t.title()).collect()
    }

    #[test]
    fn appending_nothing_changes_nothing() {
        let store = store();
        assert!(store.append(GUILD, vec![]).is_empty());
        assert!(!store.contains(GUILD));

        store.append(GUILD, vec![track("a")]);
        assert_eq!(store.append(GUILD, vec![]).len(), store.get(GUILD).len());
    }

    #[test]
    fn append_to_empty_guild_yields_exactly_the_tracks() {
        let store = store();
        let tracks = vec![track("a"), track("b"), track("c")];

        let returned = store.append(GUILD, tracks.clone());

        assert_eq!(returned, tracks);
        assert_eq!(store.get(GUILD), tracks);
    }

    #[test]
    fn sequential_appends_keep_order() {
        let store = store();
        store.append(GUILD, vec![track("a")]);
        store.append(GUILD, vec![track("b")]);

        assert_eq!(titles(&store.get(GUILD)), vec!["a", "b"]);
        assert_eq!(store.head(GUILD), Some(track("a")));
    }

    #[test]
    fn popping_the_last_track_removes_the_entry() {
        let store = store();
        store.append(GUILD, vec![track("a")]);

        assert!(store.pop_front(GUILD).is_empty());
        assert!(store.get(GUILD).is_empty());
        assert!(!store.contains(GUILD));
        assert_eq!(store.head(GUILD), None);
    }

    #[test]
    fn pop_on_absent_guild_is_a_no_op() {
        let store = store();
        assert!(store.pop_front(GUILD).is_empty());
        assert!(!store.contains(GUILD));
    }

    #[test]
    fn replace_never_creates_a_queue() {
        let store = store();
        assert!(store.replace(GUILD, vec![track("a")]).is_empty());
        assert!(!store.contains(GUILD));

        store.append(GUILD, vec![track("a"), track("b")]);
        let replaced = store.replace(GUILD, vec![track("b"), track("a")]);
        assert_eq!(titles(&replaced), vec!["b", "a"]);
    }

    #[test]
    fn replace_with_nothing_removes_the_entry() {
        let store = store();
        store.append(GUILD, vec![track("a")]);

        store.replace(GUILD, vec![]);

        assert!(!store.contains(GUILD));
    }

    #[test]
    fn splice_range_clamps_bounds() {
        let store = store();
        store.append(GUILD, vec![track("a"), track("b"), track("c"), track("d")]);

        assert_eq!(titles(&store.splice_range(GUILD, 1, 2)), vec!["a", "d"]);
        assert_eq!(titles(&store.splice_range(GUILD, 5, 1)), vec!["a", "d"]);
        assert_eq!(titles(&store.splice_range(GUILD, 1, usize::MAX)), vec!["a"]);
        assert!(store.splice_range(GUILD, 0, 1).is_empty());
        assert!(!store.contains(GUILD));
    }

    #[test]
    fn guilds_are_independent() {
        let store = store();
        let other = GuildId::new(2);
        store.append(GUILD, vec![track("a")]);
        store.append(other, vec![track("b")]);

        store.remove(GUILD);

        assert!(!store.contains(GUILD));
        assert_eq!(titles(&store.get(other)), vec!["b"]);
    }

    #[test]
    fn mutations_publish_mirror_events_in_order() {
        let mut mirror = MockQueueMirror::new();
        let mut seq = Sequence::new();
        mirror
            .expect_publish()
            .with(eq(MirrorEvent::Created {
                guild_id: GUILD,
                tracks: vec![track("a")],
            }))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        mirror
            .expect_publish()
            .with(eq(MirrorEvent::Updated {
                guild_id: GUILD,
                tracks: vec![track("a"), track("b")],
            }))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        mirror
            .expect_publish()
            .with(eq(MirrorEvent::Updated {
                guild_id: GUILD,
                tracks: vec![track("b")],
            }))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        mirror
            .expect_publish()
            .with(eq(MirrorEvent::Deleted { guild_id: GUILD }))
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let store = GuildQueueStore::new(Arc::new(mirror));
        store.append(GUILD, vec![track("a")]);
        store.append(GUILD, vec![track("b")]);
        store.pop_front(GUILD);
        store.pop_front(GUILD);
        // absent guild: nothing published
        store.pop_front(GUILD);
        store.replace(GUILD, vec![track("c")]);
        store.remove(GUILD);
    }

    #[test]
    fn pages_are_one_based_and_bounded() {
        let tracks: Vec<_> = (0..23).map(|i| track(&format!("t{i}"))).collect();

        let second = QueuePage::build(&tracks, 2).unwrap();
        assert_eq!(second.total_pages, 3);
        assert_eq!(second.items.len(), 10);
        assert_eq!(second.items[0].0, 11);
        assert_eq!(second.items[0].1.title(), "t10");

        let last = QueuePage::build(&tracks, 3).unwrap();
        assert_eq!(last.items.len(), 3);

        assert!(QueuePage::build(&tracks, 0).is_none());
        assert!(QueuePage::build(&tracks, 4).is_none());
        assert_eq!(QueuePage::page_count(0), 1);
    }
}
