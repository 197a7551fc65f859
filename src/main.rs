use anyhow::Result;
use serenity::{
    http::Http,
    model::{gateway::GatewayIntents, id::ApplicationId},
    Client,
};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::{GuildQueueStore, Jukebox, PlaybackEngine, PlaybackSettings};
use crate::bot::{
    events::{ChannelNotifier, SongbirdGateway},
    ShardManagerContainer, StreamerBot,
};
use crate::config::Config;
use crate::sources::{ProviderDispatcher, SoundCloudClient, YouTubeClient};
use crate::storage::{NoopMirror, QueueMirror, RestQueueMirror};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("streamer_bot=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting Streamer Bot v{}", env!("CARGO_PKG_VERSION"));

    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    // Providers
    let youtube = YouTubeClient::new(&config.youtube_api_key, config.provider_timeout())?;
    let soundcloud = SoundCloudClient::new(&config.soundcloud_client_id, config.provider_timeout())?;
    let dispatcher = Arc::new(ProviderDispatcher::new(
        Arc::new(youtube),
        Arc::new(soundcloud),
    ));

    // Queues and their external mirror
    let http_client = reqwest::Client::builder()
        .timeout(config.provider_timeout())
        .build()?;
    let mirror: Arc<dyn QueueMirror> = match &config.queue_api_url {
        Some(url) => Arc::new(RestQueueMirror::spawn(
            http_client,
            url.clone(),
            config.queue_api_token.clone(),
        )),
        None => Arc::new(NoopMirror),
    };
    let queues = Arc::new(GuildQueueStore::new(mirror));

    // Voice and playback
    let songbird = Songbird::serenity();
    // Streams stay open for the whole track, so this client has no timeout
    let gateway = SongbirdGateway::new(Arc::clone(&songbird), reqwest::Client::new());
    let notifier = ChannelNotifier::new(Arc::new(Http::new(&config.discord_token)));

    let engine = Arc::new(PlaybackEngine::new(
        queues,
        Arc::clone(&dispatcher),
        Arc::new(gateway),
        Arc::new(notifier),
        PlaybackSettings {
            default_volume: config.default_volume,
            open_timeout: config.stream_open_timeout(),
        },
    ));
    let jukebox = Arc::new(Jukebox::new(dispatcher, engine, config.max_queue_size));

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES;

    let handler = StreamerBot::new(Arc::clone(&config), jukebox);

    let mut client = Client::builder(&config.discord_token, intents)
        .application_id(ApplicationId::new(config.application_id))
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    client
        .data
        .write()
        .await
        .insert::<ShardManagerContainer>(Arc::clone(&client.shard_manager));

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("⚠️ Shutdown signal received, exiting...");
                std::process::exit(0);
            }
            Err(e) => error!("Could not listen for Ctrl+C: {:?}", e),
        }
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}
