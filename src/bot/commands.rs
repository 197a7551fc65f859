use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::sources::Provider;

/// Every slash command the bot understands.
pub fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        skip_command(),
        pause_command(),
        resume_command(),
        nowplaying_command(),
        volume_command(),
        queue_command(),
        shuffle_command(),
        clear_command(),
        remove_command(),
        removedupes_command(),
        leavecleanup_command(),
        join_command(),
        leave_command(),
        ping_command(),
        clean_command(),
        help_command(),
    ]
}

pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Guild commands update instantly, handy during development.
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

// Playback

fn play_command() -> CreateCommand {
    let provider = Provider::ALL.iter().fold(
        CreateCommandOption::new(
            CommandOptionType::String,
            "provider",
            "Where to search when the query is not a URL (default: youtube)",
        ),
        |option, provider| option.add_string_choice(provider.as_str(), provider.as_str()),
    );

    CreateCommand::new("play")
        .description("Play a track or playlist from a URL, or search for one")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
        .add_option(provider)
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current track")
}

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current track")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume the paused track")
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the current track")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Show or set the volume")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volume from 0 to 100")
                .min_int_value(0)
                .max_int_value(100),
        )
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the upcoming tracks")
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear").description("Remove every upcoming track")
}

fn remove_command() -> CreateCommand {
    CreateCommand::new("remove")
        .description("Remove tracks from the queue")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "position",
                "Queue position of the first track to remove",
            )
            .required(true)
            .min_int_value(1),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "count", "How many tracks (default 1)")
                .min_int_value(1),
        )
}

fn removedupes_command() -> CreateCommand {
    CreateCommand::new("removedupes").description("Remove duplicate tracks from the queue")
}

fn leavecleanup_command() -> CreateCommand {
    CreateCommand::new("leavecleanup")
        .description("Remove tracks requested by members who left the voice channel")
}

// Connection

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel and clear the queue")
}

// Utility

fn ping_command() -> CreateCommand {
    CreateCommand::new("ping").description("Check the bot's response time to Discord")
}

fn clean_command() -> CreateCommand {
    CreateCommand::new("clean")
        .description("Delete the bot's most recent messages in this channel")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("List the available commands")
}
