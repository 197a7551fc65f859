//! # Bot Module
//!
//! Discord side of Streamer Bot: slash command registration, interaction
//! dispatch and voice connection upkeep. Playback itself lives in
//! [`crate::audio`]; this module only translates Discord events into
//! [`Jukebox`] calls.

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
    gateway::ShardManager,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod events;
pub mod handlers;

use crate::{audio::Jukebox, config::Config};

/// Client data key for the shard manager, read by `/ping` for gateway latency.
pub struct ShardManagerContainer;

impl TypeMapKey for ShardManagerContainer {
    type Value = Arc<ShardManager>;
}

/// Event handler shared by every shard.
pub struct StreamerBot {
    config: Arc<Config>,
    pub jukebox: Arc<Jukebox>,
}

impl StreamerBot {
    pub fn new(config: Arc<Config>, jukebox: Arc<Jukebox>) -> Self {
        Self { config, jukebox }
    }

    /// Registers slash commands globally, or on `GUILD_ID` when set.
    ///
    /// Guild commands propagate within seconds, global ones can take up to
    /// an hour.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ Bot is not a member of guild {}, skipping registration", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Guild command registration failed: {:?}", e);
                        anyhow::anyhow!(
                            "Could not register guild commands. Check the 'applications.commands' scope."
                        )
                    })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Global command registration failed: {:?}", e);
                    anyhow::anyhow!(
                        "Could not register global commands. Check the 'applications.commands' scope."
                    )
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    /// Joins (or moves to) a voice channel.
    pub async fn join_voice_channel(
        &self,
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<()> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| anyhow::anyhow!("Songbird was not registered on the client"))?;

        manager.join(guild_id, channel_id).await?;

        info!("🔊 Connected to voice channel {} in guild {}", channel_id, guild_id);
        Ok(())
    }

    /// Whether a songbird call exists for the guild.
    pub async fn is_connected(&self, ctx: &Context, guild_id: GuildId) -> bool {
        match songbird::get(ctx).await {
            Some(manager) => manager.get(guild_id).is_some(),
            None => false,
        }
    }
}

#[async_trait]
impl EventHandler for StreamerBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Command registration failed: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Command handling failed: {:?}", e);
            }
        }
    }

    /// Tears playback down when the bot is kicked or disconnected from voice.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        if new.user_id != ctx.cache.current_user().id {
            return;
        }

        if old.is_some() && new.channel_id.is_none() {
            if let Some(guild_id) = new.guild_id {
                info!("🔌 Disconnected from voice in guild {}", guild_id);
                self.jukebox.leave(guild_id).await;
            }
        }
    }
}
