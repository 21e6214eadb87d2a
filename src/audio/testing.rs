//! Fakes para probar sesiones sin Discord ni yt-dlp.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{
    manager::PlaybackManager,
    queue::{QueueStore, Track},
    session::SessionPhase,
    voice::{
        ConnectionError, Notifier, NotifyError, PlayerEvent, PlayerEventKind, PlayerEventSender,
        TrackPlayer, VoiceConnection, VoiceGateway,
    },
};
use crate::{
    config::{Config, ResolverConfig},
    sources::{
        BackendFailure, ExtractionBackend, MediaResolver, ResolvedSource, SearchCandidate,
        SearchProvider,
    },
};

/// Extractor que responde según el id del video (último segmento de la URL).
#[derive(Clone)]
pub struct ScriptedBackend {
    prefix: String,
    failures: HashMap<String, String>,
    latency: Duration,
}

impl ScriptedBackend {
    pub fn all_ok() -> Self {
        Self {
            prefix: "https://cdn.test/".into(),
            failures: HashMap::new(),
            latency: Duration::ZERO,
        }
    }

    pub fn failing(mut self, id: &str, message: &str) -> Self {
        self.failures.insert(id.into(), message.into());
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

fn video_id(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

#[async_trait]
impl ExtractionBackend for ScriptedBackend {
    async fn extract(&self, url: &str) -> Result<ResolvedSource, BackendFailure> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let id = video_id(url);
        if let Some(message) = self.failures.get(id) {
            return Err(BackendFailure::new(message.clone()));
        }
        Ok(ResolvedSource {
            stream_url: format!("{}{}", self.prefix, id),
            mime_type: "audio/webm".into(),
            resolved_title: format!("Track {id}"),
            duration: None,
        })
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedSearch {
    candidates: Vec<SearchCandidate>,
}

impl ScriptedSearch {
    pub fn returning(candidates: Vec<SearchCandidate>) -> Self {
        Self { candidates }
    }
}

#[async_trait]
impl SearchProvider for ScriptedSearch {
    async fn search(&self, _query: &str, limit: usize) -> Result<Vec<SearchCandidate>, BackendFailure> {
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }
}

/// Voice operations in the order they happened.
pub type VoiceLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct FakeGateway {
    connections: Mutex<Vec<Arc<FakeConnection>>>,
    fail_connect: AtomicBool,
    fail_play: AtomicBool,
    connect_delay: Mutex<Duration>,
    destroy_delay: Mutex<Duration>,
    log: VoiceLog,
}

impl FakeGateway {
    pub fn delay_connections(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    pub fn delay_destroys(&self, delay: Duration) {
        *self.destroy_delay.lock() = delay;
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn leave_count(&self) -> usize {
        self.log.lock().iter().filter(|e| e.as_str() == "leave").count()
    }

    pub fn fail_connections(&self) {
        self.fail_connect.store(true, Ordering::SeqCst);
    }

    pub fn fail_players(&self) {
        self.fail_play.store(true, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<FakeConnection> {
        self.connections.lock()[index].clone()
    }

    pub fn player(&self, index: usize) -> Arc<FakePlayer> {
        self.connection(index)
            .player
            .lock()
            .clone()
            .expect("connection has no player")
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn connect(
        &self,
        _guild_id: GuildId,
        _channel_id: ChannelId,
    ) -> Result<Arc<dyn VoiceConnection>, ConnectionError> {
        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ConnectionError::Join("missing permissions".into()));
        }
        self.log.lock().push("connect".into());
        let connection = Arc::new(FakeConnection {
            player: Mutex::new(None),
            destroyed: AtomicBool::new(false),
            fail_play: self.fail_play.load(Ordering::SeqCst),
            destroy_delay: *self.destroy_delay.lock(),
            log: self.log.clone(),
        });
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }

    async fn leave(&self, _guild_id: GuildId) {
        self.log.lock().push("leave".into());
    }
}

pub struct FakeConnection {
    player: Mutex<Option<Arc<FakePlayer>>>,
    destroyed: AtomicBool,
    fail_play: bool,
    destroy_delay: Duration,
    log: VoiceLog,
}

impl FakeConnection {
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceConnection for FakeConnection {
    fn create_player(&self, events: PlayerEventSender) -> Arc<dyn TrackPlayer> {
        let player = Arc::new(FakePlayer {
            events,
            played: Mutex::new(Vec::new()),
            current: Mutex::new(None),
            stops: AtomicUsize::new(0),
            fail_play: self.fail_play,
        });
        *self.player.lock() = Some(player.clone());
        player
    }

    async fn destroy(&self) {
        if !self.destroy_delay.is_zero() {
            tokio::time::sleep(self.destroy_delay).await;
        }
        self.destroyed.store(true, Ordering::SeqCst);
        self.log.lock().push("destroy".into());
    }
}

/// Records what it was asked to play. Like the real driver, stopping a track
/// reports it as finished.
pub struct FakePlayer {
    events: PlayerEventSender,
    played: Mutex<Vec<String>>,
    current: Mutex<Option<u64>>,
    stops: AtomicUsize,
    fail_play: bool,
}

impl FakePlayer {
    pub fn played_urls(&self) -> Vec<String> {
        self.played.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: PlayerEvent) {
        self.events.send(event);
    }

    pub fn finish(&self) {
        if let Some(token) = *self.current.lock() {
            self.emit(PlayerEvent {
                token,
                kind: PlayerEventKind::Finished,
            });
        }
    }

    pub fn fail(&self, message: &str) {
        if let Some(token) = *self.current.lock() {
            self.emit(PlayerEvent {
                token,
                kind: PlayerEventKind::Errored(message.into()),
            });
        }
    }
}

#[async_trait]
impl TrackPlayer for FakePlayer {
    async fn play(&self, source: &ResolvedSource, token: u64) -> Result<(), ConnectionError> {
        if self.fail_play {
            return Err(ConnectionError::Driver("driver gone".into()));
        }
        self.played.lock().push(source.stream_url.clone());
        *self.current.lock() = Some(token);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.current.lock().take() {
            self.events.send(PlayerEvent {
                token,
                kind: PlayerEventKind::Finished,
            });
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn fail_all(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError("channel deleted".into()));
        }
        self.messages.lock().push(message.to_string());
        Ok(())
    }
}

pub struct Harness {
    pub manager: PlaybackManager,
    pub gateway: Arc<FakeGateway>,
    pub notifier: Arc<RecordingNotifier>,
    max_queue_size: usize,
}

impl Harness {
    pub fn new(backend: ScriptedBackend) -> Self {
        Self::with_backends(backend, ScriptedSearch::returning(Vec::new()), None)
    }

    pub fn with_backends(
        primary: ScriptedBackend,
        search: ScriptedSearch,
        secondary: Option<ScriptedBackend>,
    ) -> Self {
        let resolver_config = ResolverConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            retry_jitter: Duration::ZERO,
            enable_secondary_extractor: secondary.is_some(),
            ..ResolverConfig::default()
        };
        let config = Config {
            max_queue_size: 20,
            resolver: resolver_config,
            ..Config::default()
        };

        let secondary = secondary.map(|s| Arc::new(s) as Arc<dyn ExtractionBackend>);
        let resolver = MediaResolver::new(
            Arc::new(primary),
            Arc::new(search),
            secondary,
            &config.resolver,
        );
        let gateway = Arc::new(FakeGateway::default());

        Self {
            manager: PlaybackManager::new(&config, resolver, gateway.clone()),
            gateway,
            notifier: Arc::new(RecordingNotifier::default()),
            max_queue_size: config.max_queue_size,
        }
    }

    pub fn store(&self) -> &Arc<QueueStore> {
        self.manager.store()
    }

    pub fn max_queue_size(&self) -> usize {
        self.max_queue_size
    }

    pub fn enqueue(&self, guild_id: GuildId, id: &str, title: &str) -> usize {
        self.manager
            .enqueue(
                guild_id,
                Track::new(format!("https://youtu.be/{id}"), title, "tester"),
            )
            .expect("enqueue failed")
    }

    pub fn start(&self, guild_id: GuildId, channel_id: ChannelId) -> bool {
        self.manager
            .start_if_idle(guild_id, channel_id, self.notifier.clone())
    }

    pub fn idle_armed(&self, guild_id: GuildId) -> bool {
        self.store()
            .with_state(guild_id, |s| s.idle_timer.is_some())
            .unwrap_or(false)
    }

    pub fn phase_history(&self, guild_id: GuildId) -> Vec<SessionPhase> {
        self.store()
            .with_state(guild_id, |s| s.phase_history.clone())
            .unwrap_or_default()
    }

    /// Espera a que el reproductor de la conexión `index` haya recibido `count` tracks.
    pub async fn wait_for_plays(&self, index: usize, count: usize) {
        for _ in 0..2000 {
            if self.gateway.connect_count() > index
                && self.gateway.player(index).played_urls().len() >= count
            {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("connection {index} never reached {count} plays");
    }
}

pub async fn wait_for_phase(manager: &PlaybackManager, guild_id: GuildId, phase: SessionPhase) {
    for _ in 0..2000 {
        if manager.phase(guild_id) == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "guild {} never reached {} (stuck in {})",
        guild_id,
        phase,
        manager.phase(guild_id)
    );
}
