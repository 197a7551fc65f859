use anyhow::Result;
use futures::future;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage,
        EditInteractionResponse, GetMessages,
    },
    model::{
        application::{CommandDataOptionValue, CommandInteraction},
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::{collections::HashSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    bot::{ShardManagerContainer, StreamerBot},
    sources::{Provider, Requester},
    ui::embeds,
};

/// Recent channel messages inspected by `/clean`.
const CLEAN_SCAN_LIMIT: u8 = 100;

/// Why a voice command was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceRefusal {
    UserNotInVoice,
    BotNotInVoice,
    DifferentChannel,
}

impl VoiceRefusal {
    fn embed(self) -> CreateEmbed {
        match self {
            VoiceRefusal::UserNotInVoice => embeds::create_error_embed(
                "Not in voice",
                "You need to be in a voice channel.",
            ),
            VoiceRefusal::BotNotInVoice => embeds::create_error_embed(
                "Not in voice",
                "I am not connected to a voice channel.",
            ),
            VoiceRefusal::DifferentChannel => embeds::create_error_embed(
                "Wrong channel",
                "You must be in the same voice channel as me.",
            ),
        }
    }
}

/// What `/play` has to do about voice before queueing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlayVoice {
    Join(ChannelId),
    AlreadyThere(ChannelId),
}

/// `/play` needs the caller in voice, and in the bot's channel if it has one.
fn check_play_voice(
    user: Option<ChannelId>,
    bot: Option<ChannelId>,
) -> Result<PlayVoice, VoiceRefusal> {
    match (user, bot) {
        (None, _) => Err(VoiceRefusal::UserNotInVoice),
        (Some(user), None) => Ok(PlayVoice::Join(user)),
        (Some(user), Some(bot)) if user == bot => Ok(PlayVoice::AlreadyThere(bot)),
        (Some(_), Some(_)) => Err(VoiceRefusal::DifferentChannel),
    }
}

/// `/leave` needs the bot connected and the caller beside it.
fn check_leave_voice(
    user: Option<ChannelId>,
    bot: Option<ChannelId>,
) -> Result<ChannelId, VoiceRefusal> {
    match (user, bot) {
        (_, None) => Err(VoiceRefusal::BotNotInVoice),
        (Some(user), Some(bot)) if user == bot => Ok(bot),
        _ => Err(VoiceRefusal::DifferentChannel),
    }
}

/// Dispatches a slash command.
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &StreamerBot,
) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        return respond(
            ctx,
            &command,
            embeds::create_error_embed("Server only", "Commands can only be used in a server."),
        )
        .await;
    };

    info!(
        "📝 /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    match command.data.name.as_str() {
        "play" => handle_play(ctx, &command, bot, guild_id).await,
        "skip" => handle_skip(ctx, &command, bot, guild_id).await,
        "pause" => handle_pause(ctx, &command, bot, guild_id).await,
        "resume" => handle_resume(ctx, &command, bot, guild_id).await,
        "nowplaying" => handle_nowplaying(ctx, &command, bot, guild_id).await,
        "volume" => handle_volume(ctx, &command, bot, guild_id).await,
        "queue" => handle_queue(ctx, &command, bot, guild_id).await,
        "shuffle" => handle_shuffle(ctx, &command, bot, guild_id).await,
        "clear" => handle_clear(ctx, &command, bot, guild_id).await,
        "remove" => handle_remove(ctx, &command, bot, guild_id).await,
        "removedupes" => handle_removedupes(ctx, &command, bot, guild_id).await,
        "leavecleanup" => handle_leavecleanup(ctx, &command, bot, guild_id).await,
        "join" => handle_join(ctx, &command, bot, guild_id).await,
        "leave" => handle_leave(ctx, &command, bot, guild_id).await,
        "ping" => handle_ping(ctx, &command).await,
        "clean" => handle_clean(ctx, &command).await,
        "help" => respond(ctx, &command, embeds::create_help_embed()).await,
        _ => {
            respond(
                ctx,
                &command,
                embeds::create_error_embed("Unknown command", "Use `/help` to list the commands."),
            )
            .await
        }
    }
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let query = string_option(command, "query").unwrap_or_default();
    let hint = string_option(command, "provider").and_then(Provider::from_name);

    // Resolution can take longer than the interaction deadline
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;

    let user_channel = user_voice_channel(ctx, guild_id, command.user.id);
    let bot_channel = bot_voice_channel(ctx, guild_id);
    let voice = match check_play_voice(user_channel, bot_channel) {
        Ok(voice) => voice,
        Err(refusal) => return edit(ctx, command, refusal.embed()).await,
    };

    // The cache can show the bot in a channel songbird no longer drives
    let join = match voice {
        PlayVoice::Join(channel_id) => Some(channel_id),
        PlayVoice::AlreadyThere(channel_id) => {
            (!bot.is_connected(ctx, guild_id).await).then_some(channel_id)
        }
    };

    if let Some(channel_id) = join {
        if let Err(e) = bot.join_voice_channel(ctx, guild_id, channel_id).await {
            warn!("⚠️ Join failed in guild {}: {:?}", guild_id, e);
            return edit(
                ctx,
                command,
                embeds::create_error_embed("Voice error", "I could not join your voice channel."),
            )
            .await;
        }
    }

    let requester = Requester::new(command.user.id, command.user.name.clone(), command.channel_id);
    let embed = match bot.jukebox.play(guild_id, requester, query, hint).await {
        Ok(enqueued) => embeds::create_enqueued_embed(&enqueued),
        Err(e) => embeds::create_error_embed("Nothing queued", &e.to_string()),
    };

    edit(ctx, command, embed).await
}

async fn handle_skip(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.engine().skip(guild_id).await {
        Ok(track) => embeds::create_success_embed("Skipped", &format!("**{}**", track.title())),
        Err(e) => embeds::create_error_embed("Nothing to skip", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_pause(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.engine().pause(guild_id).await {
        Ok(track) => embeds::create_success_embed("Paused", &format!("⏸️ **{}**", track.title())),
        Err(e) => embeds::create_error_embed("Cannot pause", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_resume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.engine().resume(guild_id).await {
        Ok(track) => embeds::create_success_embed("Resumed", &format!("▶️ **{}**", track.title())),
        Err(e) => embeds::create_error_embed("Cannot resume", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_nowplaying(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.engine().now_playing(guild_id).await {
        Some(now) => embeds::create_now_playing_status_embed(&now),
        None => embeds::create_error_embed("Nothing playing", "I am not playing anything right now."),
    };
    respond(ctx, command, embed).await
}

async fn handle_volume(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let engine = bot.jukebox.engine();
    let embed = match int_option(command, "level") {
        None => embeds::create_volume_embed(engine.volume(guild_id).await),
        Some(level) => match engine.set_volume(guild_id, level).await {
            Ok(percent) => embeds::create_volume_embed(percent),
            Err(e) => embeds::create_error_embed("Volume unchanged", &e.to_string()),
        },
    };
    respond(ctx, command, embed).await
}

async fn handle_queue(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let page = int_option(command, "page")
        .map_or(1, |page| usize::try_from(page).unwrap_or(0));

    let embed = match bot.jukebox.queue_page(guild_id, page).await {
        Ok(page) => embeds::create_queue_embed(&page),
        Err(e) => embeds::create_error_embed("Queue", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_shuffle(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.shuffle(guild_id).await {
        Ok(len) => embeds::create_success_embed("Shuffled", &format!("🔀 {} tracks shuffled", len)),
        Err(e) => embeds::create_error_embed("Cannot shuffle", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_clear(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.clear(guild_id).await {
        Ok(removed) => {
            embeds::create_success_embed("Queue cleared", &format!("🗑️ {} track(s) removed", removed))
        }
        Err(e) => embeds::create_error_embed("Cannot clear", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_remove(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let position = int_option(command, "position")
        .and_then(|p| usize::try_from(p).ok())
        .unwrap_or(0);
    let count = int_option(command, "count")
        .and_then(|c| usize::try_from(c).ok())
        .unwrap_or(1);

    let embed = match bot.jukebox.remove_range(guild_id, position, count).await {
        Ok(removed) => {
            let titles: Vec<String> = removed
                .iter()
                .map(|track| format!("• {}", track.title()))
                .collect();
            embeds::create_success_embed("Removed", &titles.join("\n"))
        }
        Err(e) => embeds::create_error_embed("Cannot remove", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_removedupes(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let embed = match bot.jukebox.remove_duplicates(guild_id).await {
        Ok(removed) => embeds::create_success_embed(
            "Duplicates removed",
            &format!("🧹 {} duplicate(s) removed", removed),
        ),
        Err(e) => embeds::create_error_embed("Cannot remove duplicates", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_leavecleanup(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(present) = members_with_bot(ctx, guild_id) else {
        return respond(
            ctx,
            command,
            embeds::create_error_embed("Not in voice", "I am not connected to a voice channel."),
        )
        .await;
    };

    let embed = match bot.jukebox.remove_absent(guild_id, &present).await {
        Ok(removed) => embeds::create_success_embed(
            "Queue cleaned",
            &format!("🧹 {} track(s) from absent members removed", removed),
        ),
        Err(e) => embeds::create_error_embed("Cannot clean up", &e.to_string()),
    };
    respond(ctx, command, embed).await
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let Some(channel_id) = user_voice_channel(ctx, guild_id, command.user.id) else {
        return respond(
            ctx,
            command,
            embeds::create_error_embed("Not in voice", "You need to be in a voice channel."),
        )
        .await;
    };

    let embed = match bot.join_voice_channel(ctx, guild_id, channel_id).await {
        Ok(()) => embeds::create_success_embed("Connected", &format!("🔊 Joined <#{}>", channel_id)),
        Err(e) => {
            warn!("⚠️ Join failed in guild {}: {:?}", guild_id, e);
            embeds::create_error_embed("Voice error", "I could not join your voice channel.")
        }
    };
    respond(ctx, command, embed).await
}

async fn handle_leave(
    ctx: &Context,
    command: &CommandInteraction,
    bot: &StreamerBot,
    guild_id: GuildId,
) -> Result<()> {
    let user_channel = user_voice_channel(ctx, guild_id, command.user.id);
    if let Err(refusal) = check_leave_voice(user_channel, bot_voice_channel(ctx, guild_id)) {
        return respond(ctx, command, refusal.embed()).await;
    }

    bot.jukebox.leave(guild_id).await;
    respond(
        ctx,
        command,
        embeds::create_success_embed("Disconnected", "👋 Left the voice channel and cleared the queue"),
    )
    .await
}

async fn handle_ping(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    let sent = Instant::now();
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
        )
        .await?;
    let api_latency = sent.elapsed();

    let gateway_latency = {
        let data = ctx.data.read().await;
        match data.get::<ShardManagerContainer>() {
            Some(manager) => {
                let runners = manager.runners.lock().await;
                runners.get(&ctx.shard_id).and_then(|runner| runner.latency)
            }
            None => None,
        }
    };

    edit(ctx, command, embeds::create_ping_embed(gateway_latency, api_latency)).await
}

/// Deletes the bot's messages among the most recent ones of the channel.
async fn handle_clean(ctx: &Context, command: &CommandInteraction) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new().ephemeral(true)),
        )
        .await?;

    let bot_id = ctx.cache.current_user().id;
    let messages = match command
        .channel_id
        .messages(&ctx.http, GetMessages::new().limit(CLEAN_SCAN_LIMIT))
        .await
    {
        Ok(messages) => messages,
        Err(e) => {
            warn!("⚠️ Could not fetch messages of channel {}: {:?}", command.channel_id, e);
            return edit(
                ctx,
                command,
                embeds::create_error_embed(
                    "Clean failed",
                    "Something went wrong while fetching the channel messages.",
                ),
            )
            .await;
        }
    };

    let deletions = messages
        .iter()
        .filter(|message| message.author.id == bot_id)
        .map(|message| message.delete(&ctx.http));
    let deleted = future::join_all(deletions)
        .await
        .into_iter()
        .filter(|result| match result {
            Ok(()) => true,
            Err(e) => {
                debug!("Could not delete a message in {}: {:?}", command.channel_id, e);
                false
            }
        })
        .count();

    info!("🧹 Deleted {} bot message(s) in channel {}", deleted, command.channel_id);
    edit(
        ctx,
        command,
        embeds::create_success_embed("Channel cleaned", &format!("🧹 {} message(s) deleted", deleted)),
    )
    .await
}

// Helpers

async fn respond(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .create_response(
            &ctx.http,
            CreateInteractionResponse::Message(CreateInteractionResponseMessage::new().embed(embed)),
        )
        .await?;
    Ok(())
}

async fn edit(ctx: &Context, command: &CommandInteraction, embed: CreateEmbed) -> Result<()> {
    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;
    Ok(())
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn int_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| match opt.value {
            CommandDataOptionValue::Integer(value) => Some(value),
            _ => None,
        })
}

/// Voice channel the user is connected to, from the cache.
fn user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = ctx.cache.guild(guild_id)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|state| state.channel_id)
}

fn bot_voice_channel(ctx: &Context, guild_id: GuildId) -> Option<ChannelId> {
    let bot_id = ctx.cache.current_user().id;
    user_voice_channel(ctx, guild_id, bot_id)
}

/// Users sharing the bot's voice channel, or `None` when the bot is not in one.
fn members_with_bot(ctx: &Context, guild_id: GuildId) -> Option<HashSet<UserId>> {
    let channel_id = bot_voice_channel(ctx, guild_id)?;
    let guild = ctx.cache.guild(guild_id)?;

    Some(
        guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .map(|state| state.user_id)
            .collect(),
    )
}
