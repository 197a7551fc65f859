//! Discord presentation: embeds for replies and notifications.

pub mod embeds;
