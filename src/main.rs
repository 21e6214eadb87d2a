use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod config;
mod sources;
mod ui;

use crate::audio::{driver::SongbirdGateway, PlaybackManager};
use crate::bot::JukeboxBot;
use crate::config::Config;
use crate::sources::{ExtractionBackend, MediaResolver, YtDlpClient, YtDlpFallback};

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("guild_jukebox=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Guild Jukebox v{}", env!("CARGO_PKG_VERSION"));

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    if let Err(e) = YtDlpClient::verify_dependencies().await {
        warn!("⚠️ {:?}", e);
    }

    // Cadena de resolución
    let ytdlp = Arc::new(YtDlpClient::new(&config.resolver));
    let secondary = config
        .resolver
        .enable_secondary_extractor
        .then(|| Arc::new(YtDlpFallback::new(&config.resolver)) as Arc<dyn ExtractionBackend>);
    if secondary.is_some() {
        info!("🛡️ Extractor secundario activado");
    }
    let resolver = MediaResolver::new(ytdlp.clone(), ytdlp, secondary, &config.resolver);

    // Voz
    let songbird = Songbird::serenity();
    let gateway = Arc::new(SongbirdGateway::new(songbird.clone(), reqwest::Client::new()));
    let playback = PlaybackManager::new(&config, resolver, gateway);

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let handler = JukeboxBot::new(config.clone(), playback, YtDlpClient::new(&config.resolver));

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    if yt_dlp.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
