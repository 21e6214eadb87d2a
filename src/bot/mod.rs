//! # Bot Module
//!
//! Discord front end: slash command registration, interaction dispatch and
//! voice state tracking. Playback itself lives in [`crate::audio`]; this
//! module only translates Discord events into [`PlaybackManager`] calls.

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod notifier;

use crate::{audio::PlaybackManager, config::Config, sources::YtDlpClient};

/// Handler de eventos de Discord.
pub struct JukeboxBot {
    config: Arc<Config>,
    /// Colas y sesiones por guild
    pub playback: PlaybackManager,
    /// Metadata y búsqueda para `/play`
    pub metadata: YtDlpClient,
}

impl JukeboxBot {
    pub fn new(config: Config, playback: PlaybackManager, metadata: YtDlpClient) -> Self {
        Self {
            config: Arc::new(config),
            playback,
            metadata,
        }
    }

    /// Registers slash commands with Discord.
    ///
    /// With `GUILD_ID` set, commands go to that guild only (instant updates,
    /// meant for development); otherwise they are registered globally.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Error registrando comandos de guild: {:?}", e);
                        anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                    })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for JukeboxBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// Someone dragged the bot out of its channel: release the guild the same
    /// way `/stop` does. Late echoes of our own leave are ignored by the
    /// manager when they name another channel or a session is still joining.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let current_user_id = ctx.cache.current_user().id;
        if new.user_id != current_user_id || new.channel_id.is_some() {
            return;
        }
        let Some(from) = old.and_then(|state| state.channel_id) else {
            return;
        };

        if let Some(guild_id) = new.guild_id {
            if self
                .playback
                .release_after_voice_disconnect(guild_id, from)
                .await
            {
                info!("🔌 Bot desconectado en guild {}, sesión liberada", guild_id);
            }
        }
    }
}
