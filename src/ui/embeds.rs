use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::audio::{Enqueued, NowPlaying, QueuePage};
use crate::sources::Track;

/// Standard color palette
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

const STANDARD_FOOTER: &str = "🎵 Streamer Bot";

/// Embed posted when a track starts playing.
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    track_embed(track)
        .title("🎵 Now Playing")
        .color(colors::SUCCESS_GREEN)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// `/nowplaying` with elapsed time and pause state.
pub fn create_now_playing_status_embed(now: &NowPlaying) -> CreateEmbed {
    let elapsed = now
        .position
        .map(|position| {
            format!(
                "{} / {}",
                format_duration(position),
                format_duration(now.track.duration())
            )
        })
        .unwrap_or_else(|| format_duration(now.track.duration()));

    let (title, color) = if now.paused {
        ("⏸️ Paused", colors::WARNING_ORANGE)
    } else {
        ("🎵 Now Playing", colors::SUCCESS_GREEN)
    };

    track_embed(&now.track)
        .title(title)
        .color(color)
        .field("⏱️ Progress", elapsed, true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Reply to `/play`: one track or a batch.
pub fn create_enqueued_embed(enqueued: &Enqueued) -> CreateEmbed {
    let embed = match enqueued.tracks.as_slice() {
        [track] => track_embed(track)
            .title("✅ Track Added")
            .color(colors::SUCCESS_GREEN)
            .field("📍 Position", enqueued.position.to_string(), true),
        tracks => {
            let total: Duration = tracks.iter().map(Track::duration).sum();
            CreateEmbed::default()
                .title("📋 Tracks Added")
                .description(format!(
                    "Added **{} tracks** from {} to the queue",
                    tracks.len(),
                    enqueued.provider
                ))
                .color(colors::MUSIC_PURPLE)
                .field("📍 Positions", format!("{}-{}", enqueued.position, enqueued.queue_len), true)
                .field("⏱️ Total length", format_duration(total), true)
        }
    };

    let footer = if enqueued.dropped > 0 {
        format!(
            "⚠️ {} track(s) left out, the queue is full • {} in queue",
            enqueued.dropped, enqueued.queue_len
        )
    } else {
        format!("🎵 {} in queue", enqueued.queue_len)
    };

    embed
        .footer(CreateEmbedFooter::new(footer))
        .timestamp(Timestamp::now())
}

pub fn create_queue_embed(page: &QueuePage) -> CreateEmbed {
    let lines: Vec<String> = page
        .items
        .iter()
        .map(|(position, track)| {
            let marker = if *position == 1 { "▶️" } else { "▫️" };
            format!(
                "{} `{}.` [{}]({}) `{}` • <@{}>",
                marker,
                position,
                truncate(track.title(), 60),
                track.url(),
                format_duration(track.duration()),
                track.requested_by().user_id
            )
        })
        .collect();

    CreateEmbed::default()
        .title("📋 Queue")
        .description(lines.join("\n"))
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new(format!(
            "Page {}/{} • {} tracks",
            page.current_page, page.total_pages, page.total_items
        )))
        .timestamp(Timestamp::now())
}

pub fn create_queue_finished_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("📭 Queue Finished")
        .description("No more tracks to play, leaving the voice channel.\n\n💡 Use `/play <song>` to start again")
        .color(colors::NEUTRAL_GRAY)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_track_failed_embed(track: &Track, reason: &str) -> CreateEmbed {
    create_error_embed(
        "Playback Failed",
        &format!("Could not play **{}**: {}\nSkipping to the next track.", track.title(), reason),
    )
}

pub fn create_volume_embed(percent: u8) -> CreateEmbed {
    let emoji = match percent {
        0 => "🔇",
        1..=50 => "🔉",
        _ => "🔊",
    };

    CreateEmbed::default()
        .title(format!("{} Volume", emoji))
        .description(format!("**{}%**\n{}", percent, volume_bar(percent)))
        .color(colors::INFO_BLUE)
        .footer(CreateEmbedFooter::new("💡 /volume <0-100> to change it"))
}

/// `/ping`: heartbeat latency of the shard and the round trip of the reply.
pub fn create_ping_embed(gateway: Option<Duration>, api: Duration) -> CreateEmbed {
    CreateEmbed::default()
        .title("🏓 Pong!")
        .color(colors::INFO_BLUE)
        .field("💓 Gateway", format_latency(gateway), true)
        .field("📡 API", format_latency(Some(api)), true)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Streamer Bot - Commands")
        .color(colors::INFO_BLUE)
        .description("Streams YouTube and SoundCloud audio into your voice channel")
        .field(
            "🎵 Playback",
            "• `/play <query> [provider]` - Play a URL or search\n\
            • `/pause` - Pause the current track\n\
            • `/resume` - Resume playback\n\
            • `/skip` - Skip the current track\n\
            • `/nowplaying` - Show the current track\n\
            • `/volume [level]` - Show or set the volume (0-100)",
            false,
        )
        .field(
            "📜 Queue",
            "• `/queue [page]` - Show the queue\n\
            • `/shuffle` - Shuffle upcoming tracks\n\
            • `/clear` - Remove upcoming tracks\n\
            • `/remove <position> [count]` - Remove tracks\n\
            • `/removedupes` - Remove duplicate tracks\n\
            • `/leavecleanup` - Remove tracks of members who left",
            false,
        )
        .field(
            "🔊 Connection",
            "• `/join` - Join your voice channel\n\
            • `/leave` - Leave and clear the queue",
            false,
        )
        .field(
            "🛠️ Utility",
            "• `/ping` - Show gateway and API latency\n\
            • `/clean` - Delete my recent messages here",
            false,
        )
        .field("🎵 Providers", "• YouTube\n• SoundCloud", false)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Fields shared by every single-track embed
fn track_embed(track: &Track) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .description(format!("**[{}]({})**", track.title(), track.url()))
        .field("⏱️ Duration", format_duration(track.duration()), true)
        .field("👤 Requested by", format!("<@{}>", track.requested_by().user_id), true)
        .field("🔗 Source", track.provider().to_string(), true);

    if track.views() > 0 {
        embed = embed.field("👁️ Views", format_views(track.views()), true);
    }
    if let Some(thumbnail) = track.thumbnail() {
        embed = embed.thumbnail(thumbnail);
    }

    embed.url(track.url()).timestamp(Timestamp::now())
}

fn format_latency(latency: Option<Duration>) -> String {
    match latency {
        Some(latency) => format!("{}ms", latency.as_millis()),
        None => "n/a".to_string(),
    }
}

fn volume_bar(percent: u8) -> String {
    let segments = 20;
    let filled = usize::from(percent) * segments / 100;
    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(segments - filled))
}

/// Formats a duration as `H:MM:SS`, or `M:SS` under an hour.
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

/// Groups thousands: `1234567` → `1,234,567`.
fn format_views(views: u64) -> String {
    let digits = views.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut)
}
