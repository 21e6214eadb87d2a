//! Sesión de reproducción de un guild.
//!
//! Each guild with an active voice connection runs one [`PlaybackSession`]
//! task. Everything that moves the session between phases (track ends, stream
//! errors, wake-ups after an enqueue) arrives as a [`SessionEvent`] on
//! its channel and goes through [`PlaybackSession::handle_event`], so the
//! phase only ever changes on the session's own task.
//!
//! Results of slow operations are checked against the session id registered
//! in the [`QueueStore`] before they are applied; a stopped or replaced
//! session drops them silently.

use serenity::model::id::{ChannelId, GuildId};
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{sync::mpsc, task::AbortHandle};
use tracing::{debug, error, info, warn};

use super::{
    manager::{teardown_guild, PlaybackServices},
    queue::Track,
    voice::{
        notify_best_effort, ConnectionError, Notifier, PlayerEvent, PlayerEventKind,
        PlayerEventSender, TrackPlayer, VoiceConnection,
    },
};
use crate::{
    sources::{BackendFailure, ErrorKind, Resolution},
    ui::messages,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Playing,
    ResolvingFallback,
    Draining,
    Disconnected,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Playing => "playing",
            SessionPhase::ResolvingFallback => "resolving fallback",
            SessionPhase::Draining => "draining",
            SessionPhase::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
pub enum SessionEvent {
    Player(PlayerEvent),
    /// Hay tracks nuevos en la cola.
    Wake,
}

/// Registration of a running session inside the guild state.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    events: mpsc::UnboundedSender<SessionEvent>,
    task: Option<AbortHandle>,
}

impl SessionHandle {
    pub(crate) fn new(id: SessionId, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            id,
            events,
            task: None,
        }
    }

    pub(crate) fn attach_task(&mut self, task: AbortHandle) {
        self.task = Some(task);
    }

    pub fn send(&self, event: SessionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn abort(&self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

struct CurrentTrack {
    track: Track,
    token: u64,
    recovered: bool,
}

pub struct PlaybackSession {
    id: SessionId,
    guild_id: GuildId,
    channel_id: ChannelId,
    services: PlaybackServices,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedSender<SessionEvent>,
    player: Option<Arc<dyn TrackPlayer>>,
    phase: SessionPhase,
    current: Option<CurrentTrack>,
    next_token: u64,
}

impl PlaybackSession {
    pub(crate) fn new(
        id: SessionId,
        guild_id: GuildId,
        channel_id: ChannelId,
        services: PlaybackServices,
        notifier: Arc<dyn Notifier>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            id,
            guild_id,
            channel_id,
            services,
            notifier,
            events,
            player: None,
            phase: SessionPhase::Idle,
            current: None,
            next_token: 0,
        }
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        info!("▶️ Sesión {} iniciada en guild {}", self.id, self.guild_id);

        match self.connect().await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                error!("❌ Error conectando a voz en guild {}: {}", self.guild_id, e);
                self.shutdown(&messages::connection_failed()).await;
                return;
            }
        }

        self.advance().await;

        while self.phase != SessionPhase::Disconnected {
            let Some(event) = events.recv().await else {
                break;
            };
            if !self.is_current() {
                break;
            }
            self.handle_event(event).await;
        }

        debug!("⏹️ Sesión {} terminada", self.id);
    }

    /// Idle → Connecting. Devuelve `false` si la sesión quedó obsoleta
    /// mientras se conectaba.
    async fn connect(&mut self) -> Result<bool, ConnectionError> {
        self.set_phase(SessionPhase::Connecting);

        self.wait_for_release().await;
        if !self.is_current() {
            return Ok(false);
        }

        let connection = self
            .services
            .gateway
            .connect(self.guild_id, self.channel_id)
            .await?;
        let player = connection.create_player(PlayerEventSender::new(self.events.clone()));

        if !self.attach(&connection, &player) {
            debug!("🗑️ Conexión obsoleta descartada para guild {}", self.guild_id);
            connection.destroy().await;
            return Ok(false);
        }

        self.player = Some(player);
        info!("🔊 Conectado a canal {} en guild {}", self.channel_id, self.guild_id);
        Ok(true)
    }

    /// Blocks while a previous teardown of this guild is still leaving the
    /// voice channel.
    async fn wait_for_release(&self) {
        let Some(mut releasing) = self
            .services
            .store
            .with_state(self.guild_id, |s| s.releasing.subscribe())
        else {
            return;
        };

        if *releasing.borrow() {
            debug!("⏳ Esperando a que termine la desconexión previa en guild {}", self.guild_id);
        }
        let _ = releasing.wait_for(|busy| !*busy).await.map(|_| ());
    }

    fn attach(&self, connection: &Arc<dyn VoiceConnection>, player: &Arc<dyn TrackPlayer>) -> bool {
        self.services
            .store
            .with_state(self.guild_id, |s| {
                if s.session_id() != Some(self.id) {
                    return false;
                }
                s.connection = Some(connection.clone());
                s.player = Some(player.clone());
                true
            })
            .unwrap_or(false)
    }

    pub(crate) async fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Player(PlayerEvent { token, kind }) => {
                if !self.is_active_token(token) {
                    debug!("🗑️ Evento obsoleto del reproductor (token {})", token);
                    return;
                }
                match kind {
                    PlayerEventKind::Finished => {
                        debug!("Track terminado, reproduciendo siguiente...");
                        self.finish_current();
                        self.advance().await;
                    }
                    PlayerEventKind::Errored(message) => self.recover(message).await,
                }
            }
            SessionEvent::Wake => {
                if self.phase == SessionPhase::Draining {
                    self.advance().await;
                }
            }
        }
    }

    /// Takes tracks from the queue until one plays or the queue runs dry.
    async fn advance(&mut self) {
        loop {
            let Some(track) = self.services.store.dequeue_front(self.guild_id) else {
                self.enter_draining();
                return;
            };

            self.services.idle.cancel(self.guild_id);

            let result = self.services.resolver.resolve(&track.url, &track.title).await;
            if !self.is_current() {
                debug!("🗑️ Resolución obsoleta descartada: {}", track.title);
                return;
            }

            match result {
                Ok(resolution) => {
                    self.start_track(track, resolution, false).await;
                    return;
                }
                Err(e) => {
                    warn!("⏭️ Saltando {}: {}", track.title, e);
                    self.notify(&messages::skipping(&track, e.first_kind())).await;
                }
            }
        }
    }

    /// Stream error on the current track: one fallback pass starting past
    /// the primary extractor. A track that already recovered once is skipped.
    async fn recover(&mut self, message: String) {
        let Some(current) = self.current.take() else {
            return;
        };
        let failure = BackendFailure::new(message);
        warn!(
            "⚠️ Error de stream en {} ({:?}): {}",
            current.track.title, failure.kind, failure.message
        );

        if current.recovered {
            self.notify(&messages::skipping(&current.track, failure.kind)).await;
            self.advance().await;
            return;
        }

        self.set_phase(SessionPhase::ResolvingFallback);
        let track = current.track;
        let result = self
            .services
            .resolver
            .resolve_after_failure(&track.url, &track.title, failure)
            .await;
        if !self.is_current() {
            debug!("🗑️ Fallback obsoleto descartado: {}", track.title);
            return;
        }

        match result {
            Ok(resolution) => {
                self.start_track(track, resolution, true).await;
            }
            Err(e) => {
                warn!("⏭️ Sin alternativa para {}: {}", track.title, e);
                self.publish_current(None);
                self.notify(&messages::skipping(&track, e.first_kind())).await;
                self.advance().await;
            }
        }
    }

    /// Hands the resolved source to the player. Returns `false` when the voice
    /// layer failed and the session shut down.
    async fn start_track(&mut self, mut track: Track, resolution: Resolution, recovered: bool) -> bool {
        let Some(player) = self.player.clone() else {
            return false;
        };

        self.next_token += 1;
        let token = self.next_token;

        if let Err(e) = player.play(&resolution.source, token).await {
            error!("❌ El reproductor rechazó {}: {}", track.title, e);
            self.shutdown(&messages::connection_failed()).await;
            return false;
        }

        let message = if resolution.is_alternative() {
            track.title = resolution.source.resolved_title.clone();
            let kind = resolution
                .first_failure
                .as_ref()
                .map(|f| f.kind)
                .unwrap_or(ErrorKind::Unknown);
            messages::now_playing_alternative(&track, kind)
        } else {
            messages::now_playing(&track)
        };

        self.publish_current(Some(track.clone()));
        self.current = Some(CurrentTrack {
            track,
            token,
            recovered,
        });
        self.notify(&message).await;
        self.set_phase(SessionPhase::Playing);
        true
    }

    fn finish_current(&mut self) {
        self.current = None;
        self.publish_current(None);
    }

    /// Queue ran dry: Playing → Draining and the idle timer is armed.
    fn enter_draining(&mut self) {
        self.current = None;
        self.publish_current(None);
        self.set_phase(SessionPhase::Draining);

        let services = self.services.clone();
        let notifier = self.notifier.clone();
        let guild_id = self.guild_id;
        let grace = self.services.idle_grace;

        self.services.idle.schedule(guild_id, grace, move || async move {
            info!("🚪 Auto-desconectando guild {} por inactividad", guild_id);
            if teardown_guild(&services, guild_id, None).await {
                notify_best_effort(&*notifier, &messages::idle_disconnect(grace)).await;
            }
        });
    }

    /// Fatal voice failure: tell the channel and release everything.
    async fn shutdown(&mut self, message: &str) {
        self.notify(message).await;
        self.phase = SessionPhase::Disconnected;
        teardown_guild(&self.services, self.guild_id, Some(self.id)).await;
    }

    fn is_active_token(&self, token: u64) -> bool {
        self.current.as_ref().is_some_and(|c| c.token == token)
    }

    fn is_current(&self) -> bool {
        self.services.store.is_current(self.guild_id, self.id)
    }

    fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        let id = self.id;
        self.services.store.with_state(self.guild_id, |s| {
            if s.session_id() == Some(id) {
                s.set_phase(phase);
            }
        });
    }

    fn publish_current(&self, track: Option<Track>) {
        let id = self.id;
        self.services.store.with_state(self.guild_id, |s| {
            if s.session_id() == Some(id) {
                s.current = track;
            }
        });
    }

    async fn notify(&self, message: &str) {
        notify_best_effort(&*self.notifier, message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::{wait_for_phase, Harness, ScriptedBackend};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const GUILD: GuildId = GuildId::new(42);
    const CHANNEL: ChannelId = ChannelId::new(4242);

    #[tokio::test(start_paused = true)]
    async fn test_stale_player_event_is_ignored() {
        let harness = Harness::new(ScriptedBackend::all_ok());
        harness.enqueue(GUILD, "a", "Song A");
        harness.enqueue(GUILD, "b", "Song B");
        harness.start(GUILD, CHANNEL);
        wait_for_phase(&harness.manager, GUILD, SessionPhase::Playing).await;

        let player = harness.gateway.player(0);
        player.emit(PlayerEvent {
            token: 999,
            kind: PlayerEventKind::Finished,
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(player.played_urls(), vec!["https://cdn.test/a"]);
        assert_eq!(harness.store().len(GUILD), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_while_draining_reports_nothing_playing() {
        let harness = Harness::new(ScriptedBackend::all_ok());
        harness.enqueue(GUILD, "a", "Song A");
        harness.start(GUILD, CHANNEL);
        wait_for_phase(&harness.manager, GUILD, SessionPhase::Playing).await;

        harness.gateway.player(0).finish();
        wait_for_phase(&harness.manager, GUILD, SessionPhase::Draining).await;

        assert!(!harness.manager.skip(GUILD).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_rejection_shuts_session_down() {
        let harness = Harness::new(ScriptedBackend::all_ok());
        harness.gateway.fail_players();
        harness.enqueue(GUILD, "a", "Song A");
        harness.start(GUILD, CHANNEL);

        wait_for_phase(&harness.manager, GUILD, SessionPhase::Disconnected).await;
        assert!(!harness.store().has(GUILD));
        assert!(harness.gateway.connection(0).is_destroyed());
        assert!(harness
            .notifier
            .messages()
            .iter()
            .any(|m| m.contains("Voice connection error")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_history_of_single_track() {
        let harness = Harness::new(ScriptedBackend::all_ok());
        harness.enqueue(GUILD, "a", "Song A");
        harness.start(GUILD, CHANNEL);
        wait_for_phase(&harness.manager, GUILD, SessionPhase::Playing).await;
        harness.gateway.player(0).finish();
        wait_for_phase(&harness.manager, GUILD, SessionPhase::Draining).await;

        assert_eq!(
            harness.phase_history(GUILD),
            vec![
                SessionPhase::Idle,
                SessionPhase::Connecting,
                SessionPhase::Playing,
                SessionPhase::Draining,
            ]
        );
    }
}
