//! Implementación de las interfaces de voz sobre songbird.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::{
    input::HttpRequest,
    tracks::{PlayMode, TrackHandle},
    Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::voice::{
    ConnectionError, PlayerEvent, PlayerEventKind, PlayerEventSender, TrackPlayer,
    VoiceConnection, VoiceGateway,
};
use crate::sources::ResolvedSource;

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { manager, http }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError> {
        let call = self
            .manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| ConnectionError::Join(e.to_string()))?;

        info!("🔊 Conectado al canal de voz en guild {}", guild_id);

        Ok(Arc::new(SongbirdConnection {
            manager: self.manager.clone(),
            guild_id,
            call,
            http: self.http.clone(),
        }))
    }

    async fn leave(&self, guild_id: GuildId) {
        match self.manager.remove(guild_id).await {
            Ok(()) => info!("👋 Unión interrumpida, canal de voz liberado en guild {}", guild_id),
            Err(e) => debug!("Sin llamada que liberar en guild {}: {:?}", guild_id, e),
        }
    }
}

struct SongbirdConnection {
    manager: Arc<Songbird>,
    guild_id: GuildId,
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
}

#[async_trait]
impl VoiceConnection for SongbirdConnection {
    fn create_player(&self, events: PlayerEventSender) -> Arc<dyn TrackPlayer> {
        Arc::new(SongbirdTrackPlayer {
            call: self.call.clone(),
            http: self.http.clone(),
            events,
            current: parking_lot::Mutex::new(None),
        })
    }

    async fn destroy(&self) {
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", self.guild_id),
            Err(e) => debug!("Conexión de guild {} ya cerrada: {:?}", self.guild_id, e),
        }
    }
}

struct SongbirdTrackPlayer {
    call: Arc<Mutex<Call>>,
    http: reqwest::Client,
    events: PlayerEventSender,
    current: parking_lot::Mutex<Option<TrackHandle>>,
}

#[async_trait]
impl TrackPlayer for SongbirdTrackPlayer {
    async fn play(&self, source: &ResolvedSource, token: u64) -> Result<(), ConnectionError> {
        let input = HttpRequest::new(self.http.clone(), source.stream_url.clone());

        let previous = self.current.lock().take();
        if let Some(previous) = previous {
            let _ = previous.stop();
        }

        let handle = {
            let mut call = self.call.lock().await;
            call.play_input(input.into())
        };

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    events: self.events.clone(),
                    token,
                },
            )
            .map_err(|e| ConnectionError::Driver(e.to_string()))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    events: self.events.clone(),
                    token,
                },
            )
            .map_err(|e| ConnectionError::Driver(e.to_string()))?;

        *self.current.lock() = Some(handle);

        debug!("▶️ Reproduciendo {} (token {})", source.resolved_title, token);
        Ok(())
    }

    async fn stop(&self) {
        let handle = self.current.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.stop() {
                warn!("Error al detener track: {:?}", e);
            }
        }
    }
}

/// Handler para cuando termina una canción
struct TrackEndNotifier {
    events: PlayerEventSender,
    token: u64,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        debug!("Track {} terminado", self.token);
        self.events.send(PlayerEvent {
            token: self.token,
            kind: PlayerEventKind::Finished,
        });
        None
    }
}

/// Handler para errores de stream
struct TrackErrorNotifier {
    events: PlayerEventSender,
    token: u64,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let message = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(format!("{:?}", e)),
                    _ => None,
                })
                .unwrap_or_else(|| "track error".to_string()),
            _ => "track error".to_string(),
        };

        error!("❌ Error de reproducción (token {}): {}", self.token, message);
        self.events.send(PlayerEvent {
            token: self.token,
            kind: PlayerEventKind::Errored(message),
        });
        None
    }
}
