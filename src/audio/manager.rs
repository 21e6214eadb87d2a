use serenity::model::id::{ChannelId, GuildId};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    idle::IdleTimer,
    queue::{QueueError, QueueSnapshot, QueueStore, Track},
    session::{PlaybackSession, SessionEvent, SessionHandle, SessionId, SessionPhase},
    voice::{Notifier, VoiceGateway},
};
use crate::{config::Config, sources::ytdlp::VideoMetadata, sources::MediaResolver};

/// Colaboradores compartidos por el manager y sus sesiones.
#[derive(Clone)]
pub struct PlaybackServices {
    pub store: Arc<QueueStore>,
    pub resolver: Arc<MediaResolver>,
    pub gateway: Arc<dyn VoiceGateway>,
    pub idle: IdleTimer,
    pub idle_grace: Duration,
}

/// Punto de entrada de los comandos: cola, sesiones y desconexión por guild.
#[derive(Clone)]
pub struct PlaybackManager {
    services: PlaybackServices,
    display_limit: usize,
}

impl PlaybackManager {
    pub fn new(config: &Config, resolver: MediaResolver, gateway: Arc<dyn VoiceGateway>) -> Self {
        let store = Arc::new(QueueStore::new(config.max_queue_size));
        Self {
            services: PlaybackServices {
                idle: IdleTimer::new(store.clone()),
                store,
                resolver: Arc::new(resolver),
                gateway,
                idle_grace: config.idle_grace,
            },
            display_limit: config.queue_display_limit,
        }
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        &self.services.store
    }

    /// Agrega un track; crea el estado del guild si no existe y despierta a
    /// una sesión que estaba drenando.
    pub fn enqueue(&self, guild_id: GuildId, track: Track) -> Result<usize, QueueError> {
        self.services.store.create(guild_id);
        let position = self.services.store.enqueue(guild_id, track)?;
        self.wake(guild_id);
        Ok(position)
    }

    pub fn enqueue_batch(
        &self,
        guild_id: GuildId,
        tracks: Vec<VideoMetadata>,
        requested_by: &str,
    ) -> Result<usize, QueueError> {
        self.services.store.create(guild_id);
        let added = self
            .services
            .store
            .enqueue_batch(guild_id, tracks, requested_by)?;
        if added > 0 {
            self.wake(guild_id);
        }
        Ok(added)
    }

    /// Inicia una sesión si el guild no tiene una. La comprobación y el
    /// registro ocurren bajo el mismo lock, así que dos llamadas concurrentes
    /// nunca crean dos sesiones.
    pub fn start_if_idle(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        notifier: Arc<dyn Notifier>,
    ) -> bool {
        let state = self.services.store.create(guild_id);
        let (id, events_tx, events_rx) = {
            let mut s = state.lock();
            if s.session.is_some() {
                return false;
            }
            let (tx, rx) = mpsc::unbounded_channel();
            let id = SessionId::next();
            s.session = Some(SessionHandle::new(id, tx.clone()));
            s.channel_id = Some(channel_id);
            s.notifier = Some(notifier.clone());
            (id, tx, rx)
        };

        info!("🎵 Iniciando sesión {} en guild {}", id, guild_id);
        let session = PlaybackSession::new(
            id,
            guild_id,
            channel_id,
            self.services.clone(),
            notifier,
            events_tx,
        );
        let task = tokio::spawn(session.run(events_rx));

        let mut s = state.lock();
        if let Some(handle) = s.session.as_mut().filter(|h| h.id == id) {
            handle.attach_task(task.abort_handle());
        }
        true
    }

    /// Salta el track actual. `false` si no había nada sonando.
    ///
    /// Only stops the player; the session sees the track finish and advances
    /// on its own, so this never waits on a resolution in progress.
    pub async fn skip(&self, guild_id: GuildId) -> bool {
        let player = self
            .services
            .store
            .with_state(guild_id, |s| {
                if s.phase != SessionPhase::Playing {
                    return None;
                }
                s.current.take()?;
                s.player.clone()
            })
            .flatten();

        match player {
            Some(player) => {
                debug!("⏭️ Saltando track en guild {}", guild_id);
                player.stop().await;
                true
            }
            None => false,
        }
    }

    /// Detiene la reproducción y sale del canal. Idempotente.
    pub async fn stop(&self, guild_id: GuildId) -> bool {
        teardown_guild(&self.services, guild_id, None).await
    }

    /// The bot was disconnected from `from` by someone else. Releases the
    /// guild only when that is the channel the current session joined;
    /// a session still connecting is left alone.
    pub async fn release_after_voice_disconnect(
        &self,
        guild_id: GuildId,
        from: ChannelId,
    ) -> bool {
        let joined = self
            .services
            .store
            .with_state(guild_id, |s| {
                s.session.is_some()
                    && s.phase != SessionPhase::Connecting
                    && s.channel_id == Some(from)
            })
            .unwrap_or(false);

        if !joined {
            debug!("Desconexión de voz ajena a la sesión de guild {}", guild_id);
            return false;
        }
        self.stop(guild_id).await
    }

    pub fn snapshot_queue(&self, guild_id: GuildId) -> QueueSnapshot {
        self.services
            .store
            .display_snapshot(guild_id, self.display_limit)
    }

    /// Fase actual; un guild sin estado cuenta como desconectado.
    pub fn phase(&self, guild_id: GuildId) -> SessionPhase {
        self.services
            .store
            .with_state(guild_id, |s| s.phase)
            .unwrap_or(SessionPhase::Disconnected)
    }

    fn wake(&self, guild_id: GuildId) {
        self.services.store.with_state(guild_id, |s| {
            if let Some(session) = &s.session {
                session.send(SessionEvent::Wake);
            }
        });
    }
}

/// Libera todo lo que el guild tiene: temporizador, sesión, reproductor,
/// conexión y cola. Con `only` solo actúa si esa sesión sigue registrada
/// (la sesión cerrándose a sí misma no se aborta).
///
/// The entry stays registered, marked as releasing, until the voice channel
/// has been left; a session started meanwhile reuses it and joins only after
/// the release completes.
pub(crate) async fn teardown_guild(
    services: &PlaybackServices,
    guild_id: GuildId,
    only: Option<SessionId>,
) -> bool {
    let store = &services.store;
    let Some(state) = store.get(guild_id) else {
        debug!("Nada que detener en guild {}", guild_id);
        return false;
    };

    let taken = {
        let mut s = state.lock();
        if only.is_some() && s.session_id() != only {
            return false;
        }

        s.cancel_idle_timer();
        let dropped = s.queue.len();
        s.queue.clear();
        s.current = None;
        let session = s.session.take();
        let player = s.player.take();
        let connection = s.connection.take();

        if session.is_none() && player.is_none() && connection.is_none() && dropped == 0 {
            None
        } else {
            s.set_phase(SessionPhase::Disconnected);
            s.channel_id = None;
            s.releasing.send_replace(true);
            Some((session, player, connection))
        }
    };

    let Some((session, player, connection)) = taken else {
        store.remove_if_idle(guild_id);
        debug!("Nada que detener en guild {}", guild_id);
        return false;
    };

    if only.is_none() {
        if let Some(session) = &session {
            session.abort();
        }
    }
    if let Some(player) = player {
        player.stop().await;
    }
    match connection {
        Some(connection) => connection.destroy().await,
        // la sesión murió a mitad de la unión
        None if session.is_some() => services.gateway.leave(guild_id).await,
        None => {}
    }

    state.lock().releasing.send_replace(false);
    store.remove_if_idle(guild_id);

    info!("⏹️ Reproducción detenida en guild {}", guild_id);
    true
}
