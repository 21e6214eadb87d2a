use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use std::{collections::VecDeque, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, info};

use super::{
    idle::IdleTimerHandle,
    session::{SessionHandle, SessionId, SessionPhase},
    voice::{Notifier, TrackPlayer, VoiceConnection},
};
use crate::sources::ytdlp::VideoMetadata;

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub url: String,
    pub title: String,
    pub requested_by: String,
    pub duration: Option<Duration>,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(url: impl Into<String>, title: impl Into<String>, requested_by: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            requested_by: requested_by.into(),
            duration: None,
            added_at: Utc::now(),
        }
    }

    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    pub fn from_metadata(meta: VideoMetadata, requested_by: &str) -> Self {
        Self::new(meta.url, meta.title, requested_by).with_duration(meta.duration)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("La cola está llena (máximo {0} canciones)")]
    Full(usize),
    #[error("No hay cola activa para este servidor")]
    UnknownGuild,
}

/// Estado de reproducción de un servidor.
///
/// Todo lo que la sesión, el temporizador y los comandos comparten vive aquí,
/// detrás de un único mutex por guild.
pub struct GuildPlaybackState {
    pub guild_id: GuildId,
    pub queue: VecDeque<Track>,
    pub current: Option<Track>,
    pub phase: SessionPhase,
    pub session: Option<SessionHandle>,
    /// Canal de voz al que se unió la sesión actual.
    pub channel_id: Option<ChannelId>,
    pub connection: Option<Arc<dyn VoiceConnection>>,
    pub player: Option<Arc<dyn TrackPlayer>>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub idle_timer: Option<IdleTimerHandle>,
    /// `true` while a teardown is still leaving the voice channel. A new
    /// session waits for `false` before joining.
    pub releasing: watch::Sender<bool>,
    #[cfg(test)]
    pub phase_history: Vec<SessionPhase>,
}

impl GuildPlaybackState {
    fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            queue: VecDeque::new(),
            current: None,
            phase: SessionPhase::Idle,
            session: None,
            channel_id: None,
            connection: None,
            player: None,
            notifier: None,
            idle_timer: None,
            releasing: watch::Sender::new(false),
            #[cfg(test)]
            phase_history: vec![SessionPhase::Idle],
        }
    }

    pub fn set_phase(&mut self, phase: SessionPhase) {
        self.phase = phase;
        #[cfg(test)]
        self.phase_history.push(phase);
    }

    pub fn cancel_idle_timer(&mut self) -> bool {
        match self.idle_timer.take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    pub fn is_releasing(&self) -> bool {
        *self.releasing.borrow()
    }

    /// Sin sesión, sin teardown en curso y sin nada encolado.
    fn is_idle(&self) -> bool {
        self.session.is_none() && self.queue.is_empty() && !self.is_releasing()
    }
}

pub type SharedState = Arc<Mutex<GuildPlaybackState>>;

/// Vista de la cola para mostrar: primeras entradas y el resto contado.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub entries: Vec<Track>,
    pub total: usize,
    pub total_duration: Duration,
}

impl QueueSnapshot {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }
}

/// Registro de colas por servidor. Una entrada por guild como máximo.
pub struct QueueStore {
    guilds: DashMap<GuildId, SharedState>,
    max_queue_size: usize,
}

impl QueueStore {
    pub fn new(max_queue_size: usize) -> Self {
        Self {
            guilds: DashMap::new(),
            max_queue_size,
        }
    }

    /// Crea el estado del guild, o devuelve el existente.
    pub fn create(&self, guild_id: GuildId) -> SharedState {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| {
                debug!("📝 Nueva cola para guild {}", guild_id);
                Arc::new(Mutex::new(GuildPlaybackState::new(guild_id)))
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<SharedState> {
        self.guilds.get(&guild_id).map(|entry| entry.clone())
    }

    pub fn has(&self, guild_id: GuildId) -> bool {
        self.guilds.contains_key(&guild_id)
    }

    /// Removes the guild entry, cancelling its idle timer first.
    pub fn delete(&self, guild_id: GuildId) -> Option<SharedState> {
        let (_, state) = self.guilds.remove(&guild_id)?;
        state.lock().cancel_idle_timer();
        Some(state)
    }

    /// Removes the guild entry only if nothing uses it any more: no session,
    /// no pending tracks and no release in progress.
    pub fn remove_if_idle(&self, guild_id: GuildId) -> bool {
        match self
            .guilds
            .remove_if(&guild_id, |_, state| state.lock().is_idle())
        {
            Some((_, state)) => {
                state.lock().cancel_idle_timer();
                true
            }
            None => false,
        }
    }

    /// True while `session` is the one registered for the guild.
    pub fn is_current(&self, guild_id: GuildId, session: SessionId) -> bool {
        self.with_state(guild_id, |s| s.session_id() == Some(session))
            .unwrap_or(false)
    }

    pub fn with_state<R>(
        &self,
        guild_id: GuildId,
        f: impl FnOnce(&mut GuildPlaybackState) -> R,
    ) -> Option<R> {
        let state = self.get(guild_id)?;
        let mut guard = state.lock();
        Some(f(&mut guard))
    }

    /// Agrega un track al final. Devuelve la posición (1-based) en la cola.
    pub fn enqueue(&self, guild_id: GuildId, track: Track) -> Result<usize, QueueError> {
        let max = self.max_queue_size;
        self.with_state(guild_id, |s| {
            if s.queue.len() >= max {
                return Err(QueueError::Full(max));
            }
            s.cancel_idle_timer();
            info!("➕ Agregado a la cola: {}", track.title);
            s.queue.push_back(track);
            Ok(s.queue.len())
        })
        .ok_or(QueueError::UnknownGuild)?
    }

    /// Agrega lo que quepa de una playlist. Devuelve cuántos entraron.
    pub fn enqueue_batch(
        &self,
        guild_id: GuildId,
        tracks: Vec<VideoMetadata>,
        requested_by: &str,
    ) -> Result<usize, QueueError> {
        let max = self.max_queue_size;
        self.with_state(guild_id, |s| {
            let available = max.saturating_sub(s.queue.len());
            if available == 0 && !tracks.is_empty() {
                return Err(QueueError::Full(max));
            }

            let to_add = tracks.len().min(available);
            if to_add > 0 {
                s.cancel_idle_timer();
            }
            s.queue.extend(
                tracks
                    .into_iter()
                    .take(to_add)
                    .map(|meta| Track::from_metadata(meta, requested_by)),
            );

            info!("➕ Agregadas {} canciones a la cola", to_add);
            Ok(to_add)
        })
        .ok_or(QueueError::UnknownGuild)?
    }

    pub fn dequeue_front(&self, guild_id: GuildId) -> Option<Track> {
        self.with_state(guild_id, |s| s.queue.pop_front()).flatten()
    }

    /// Vacía la cola; devuelve cuántas entradas se descartaron.
    pub fn clear(&self, guild_id: GuildId) -> usize {
        self.with_state(guild_id, |s| {
            let count = s.queue.len();
            s.queue.clear();
            count
        })
        .unwrap_or(0)
    }

    pub fn len(&self, guild_id: GuildId) -> usize {
        self.with_state(guild_id, |s| s.queue.len()).unwrap_or(0)
    }

    /// Pending tracks in play order.
    pub fn snapshot(&self, guild_id: GuildId) -> Vec<Track> {
        self.with_state(guild_id, |s| s.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Vista truncada a `limit` entradas para mostrar en Discord.
    pub fn display_snapshot(&self, guild_id: GuildId, limit: usize) -> QueueSnapshot {
        self.with_state(guild_id, |s| QueueSnapshot {
            current: s.current.clone(),
            entries: s.queue.iter().take(limit).cloned().collect(),
            total: s.queue.len(),
            total_duration: s.queue.iter().filter_map(|t| t.duration).sum(),
        })
        .unwrap_or(QueueSnapshot {
            current: None,
            entries: Vec::new(),
            total: 0,
            total_duration: Duration::ZERO,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);

    fn track(n: usize) -> Track {
        Track::new(format!("https://youtu.be/{n}"), format!("Song {n}"), "tester")
    }

    fn meta(n: usize) -> VideoMetadata {
        VideoMetadata {
            title: format!("Song {n}"),
            url: format!("https://youtu.be/{n}"),
            duration: Some(Duration::from_secs(60)),
        }
    }

    #[test]
    fn test_fifo_order() {
        let store = QueueStore::new(10);
        store.create(GUILD);

        for n in 1..=3 {
            store.enqueue(GUILD, track(n)).unwrap();
        }

        let titles: Vec<_> = std::iter::from_fn(|| store.dequeue_front(GUILD))
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Song 1", "Song 2", "Song 3"]);
        assert_eq!(store.dequeue_front(GUILD), None);
    }

    #[test]
    fn test_enqueue_reports_position() {
        let store = QueueStore::new(10);
        store.create(GUILD);
        assert_eq!(store.enqueue(GUILD, track(1)), Ok(1));
        assert_eq!(store.enqueue(GUILD, track(2)), Ok(2));
    }

    #[test]
    fn test_enqueue_unknown_guild() {
        let store = QueueStore::new(10);
        assert_eq!(store.enqueue(GUILD, track(1)), Err(QueueError::UnknownGuild));
    }

    #[test]
    fn test_queue_capacity() {
        let store = QueueStore::new(2);
        store.create(GUILD);
        store.enqueue(GUILD, track(1)).unwrap();
        store.enqueue(GUILD, track(2)).unwrap();
        assert_eq!(store.enqueue(GUILD, track(3)), Err(QueueError::Full(2)));
        assert_eq!(store.len(GUILD), 2);
    }

    #[test]
    fn test_batch_adds_what_fits() {
        let store = QueueStore::new(3);
        store.create(GUILD);
        store.enqueue(GUILD, track(0)).unwrap();

        let added = store
            .enqueue_batch(GUILD, (1..=5).map(meta).collect(), "dj")
            .unwrap();

        assert_eq!(added, 2);
        let queued = store.snapshot(GUILD);
        assert_eq!(queued.len(), 3);
        assert_eq!(queued[1].requested_by, "dj");
        assert_eq!(queued[2].title, "Song 2");
    }

    #[test]
    fn test_batch_on_full_queue() {
        let store = QueueStore::new(1);
        store.create(GUILD);
        store.enqueue(GUILD, track(0)).unwrap();
        assert_eq!(
            store.enqueue_batch(GUILD, vec![meta(1)], "dj"),
            Err(QueueError::Full(1))
        );
    }

    #[test]
    fn test_create_keeps_existing_state() {
        let store = QueueStore::new(10);
        store.create(GUILD);
        store.enqueue(GUILD, track(1)).unwrap();
        store.create(GUILD);
        assert_eq!(store.len(GUILD), 1);
    }

    #[test]
    fn test_guilds_are_isolated() {
        let store = QueueStore::new(10);
        let other = GuildId::new(2);
        store.create(GUILD);
        store.create(other);
        store.enqueue(GUILD, track(1)).unwrap();

        assert_eq!(store.len(other), 0);
        assert!(store.delete(other).is_some());
        assert!(store.has(GUILD));
        assert!(!store.has(other));
    }

    #[test]
    fn test_clear_and_delete() {
        let store = QueueStore::new(10);
        store.create(GUILD);
        store.enqueue(GUILD, track(1)).unwrap();
        store.enqueue(GUILD, track(2)).unwrap();

        assert_eq!(store.clear(GUILD), 2);
        assert!(store.delete(GUILD).is_some());
        assert!(store.delete(GUILD).is_none());
        assert_eq!(store.clear(GUILD), 0);
    }

    #[test]
    fn test_remove_if_idle_keeps_busy_state() {
        let store = QueueStore::new(10);
        store.create(GUILD);
        store.enqueue(GUILD, track(1)).unwrap();
        assert!(!store.remove_if_idle(GUILD));

        store.clear(GUILD);
        store.with_state(GUILD, |s| s.releasing.send_replace(true));
        assert!(!store.remove_if_idle(GUILD));

        store.with_state(GUILD, |s| s.releasing.send_replace(false));
        assert!(store.remove_if_idle(GUILD));
        assert!(!store.has(GUILD));
    }

    #[test]
    fn test_display_snapshot_truncates() {
        let store = QueueStore::new(100);
        store.create(GUILD);
        for n in 0..15 {
            store
                .enqueue(GUILD, track(n).with_duration(Some(Duration::from_secs(10))))
                .unwrap();
        }

        let snapshot = store.display_snapshot(GUILD, 10);
        assert_eq!(snapshot.entries.len(), 10);
        assert_eq!(snapshot.total, 15);
        assert_eq!(snapshot.remaining(), 5);
        assert_eq!(snapshot.total_duration, Duration::from_secs(150));
        assert_eq!(snapshot.entries[0].title, "Song 0");
    }

    #[test]
    fn test_display_snapshot_of_unknown_guild_is_empty() {
        let store = QueueStore::new(10);
        assert!(store.display_snapshot(GUILD, 10).is_empty());
    }
}
