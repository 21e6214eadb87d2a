//! Collaborator seams of the playback core.
//!
//! The session never talks to songbird or serenity directly; it goes through
//! these traits so every transition can run against fakes. Track completion
//! and stream errors come back as [`PlayerEvent`]s on the session's channel.

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::session::SessionEvent;
use crate::sources::ResolvedSource;

/// Fallo de la capa de voz. Fatal para la sesión.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("no se pudo conectar al canal de voz: {0}")]
    Join(String),
    #[error("el driver de voz rechazó la pista: {0}")]
    Driver(String),
}

/// Best-effort message delivery failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("no se pudo enviar la notificación: {0}")]
pub struct NotifyError(pub String);

#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEventKind {
    Finished,
    Errored(String),
}

/// Reported by a [`TrackPlayer`] for the play identified by `token`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerEvent {
    pub token: u64,
    pub kind: PlayerEventKind,
}

/// Canal por el que el reproductor avisa a su sesión
#[derive(Debug, Clone)]
pub struct PlayerEventSender(UnboundedSender<SessionEvent>);

impl PlayerEventSender {
    pub(crate) fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self(tx)
    }

    /// Envía el evento; si la sesión ya terminó se descarta.
    pub fn send(&self, event: PlayerEvent) {
        let _ = self.0.send(SessionEvent::Player(event));
    }
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError>;

    /// Leaves the guild's voice channel without a connection handle, for a
    /// join that was interrupted before it completed.
    async fn leave(&self, guild_id: GuildId);
}

#[async_trait]
pub trait VoiceConnection: Send + Sync {
    fn create_player(&self, events: PlayerEventSender) -> Arc<dyn TrackPlayer>;

    /// Leaves the channel and releases the driver.
    async fn destroy(&self);
}

#[async_trait]
pub trait TrackPlayer: Send + Sync {
    /// Starts `source`, replacing whatever was playing. Completion or failure
    /// is reported later as a [`PlayerEvent`] carrying `token`.
    async fn play(&self, source: &ResolvedSource, token: u64) -> Result<(), ConnectionError>;

    async fn stop(&self);
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &str) -> Result<(), NotifyError>;
}

/// Envía sin reintentar; los fallos solo se registran.
pub async fn notify_best_effort(notifier: &dyn Notifier, message: &str) {
    if let Err(e) = notifier.send(message).await {
        warn!("📪 {}", e);
    }
}
