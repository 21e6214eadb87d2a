//! Temporizador de inactividad por guild.
//!
//! A guild has at most one armed timer; arming replaces the previous one and
//! enqueueing cancels it. Every timer carries a generation id, and a timer
//! that wakes up after being replaced or cancelled does nothing.

use serenity::model::id::GuildId;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::task::AbortHandle;
use tracing::debug;

use super::queue::QueueStore;

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
pub struct IdleTimerHandle {
    id: u64,
    task: AbortHandle,
}

impl IdleTimerHandle {
    pub fn cancel(self) {
        self.task.abort();
    }
}

#[derive(Clone)]
pub struct IdleTimer {
    store: Arc<QueueStore>,
}

impl IdleTimer {
    pub fn new(store: Arc<QueueStore>) -> Self {
        Self { store }
    }

    /// Arma el temporizador del guild. `on_fire` corre una sola vez, después
    /// de `grace`, si nadie lo canceló ni lo reemplazó antes.
    ///
    /// Returns `false` when the guild has no state to attach the timer to.
    pub fn schedule<F, Fut>(&self, guild_id: GuildId, grace: Duration, on_fire: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(state) = self.store.get(guild_id) else {
            return false;
        };

        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let store = self.store.clone();

        // El handle se instala antes de que la tarea pueda comprobarlo.
        let mut guard = state.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(grace).await;

            let armed = store
                .with_state(guild_id, |s| match &s.idle_timer {
                    Some(handle) if handle.id == id => {
                        s.idle_timer = None;
                        true
                    }
                    _ => false,
                })
                .unwrap_or(false);

            if armed {
                debug!("⏰ Temporizador {} vencido para guild {}", id, guild_id);
                on_fire().await;
            }
        });

        let handle = IdleTimerHandle {
            id,
            task: task.abort_handle(),
        };
        if let Some(previous) = guard.idle_timer.replace(handle) {
            previous.cancel();
        }

        debug!(
            "⏳ Temporizador {} armado para guild {} ({})",
            id,
            guild_id,
            humantime::format_duration(grace)
        );
        true
    }

    pub fn cancel(&self, guild_id: GuildId) -> bool {
        self.store
            .with_state(guild_id, |s| s.cancel_idle_timer())
            .unwrap_or(false)
    }

    pub fn is_armed(&self, guild_id: GuildId) -> bool {
        self.store
            .with_state(guild_id, |s| s.idle_timer.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::Track;
    use std::sync::atomic::AtomicUsize;

    const GUILD: GuildId = GuildId::new(7);

    fn setup() -> (Arc<QueueStore>, IdleTimer, Arc<AtomicUsize>) {
        let store = Arc::new(QueueStore::new(10));
        store.create(GUILD);
        let timer = IdleTimer::new(store.clone());
        (store, timer, Arc::new(AtomicUsize::new(0)))
    }

    fn counting(fired: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + 'static {
        let fired = fired.clone();
        move || {
            fired.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_grace() {
        let (_store, timer, fired) = setup();
        assert!(timer.schedule(GUILD, Duration::from_secs(300), counting(&fired)));

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed(GUILD));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_replaces_previous_timer() {
        let (_store, timer, fired) = setup();
        let second = Arc::new(AtomicUsize::new(0));

        timer.schedule(GUILD, Duration::from_secs(10), counting(&fired));
        timer.schedule(GUILD, Duration::from_secs(20), counting(&second));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let (_store, timer, fired) = setup();
        timer.schedule(GUILD, Duration::from_secs(10), counting(&fired));

        assert!(timer.cancel(GUILD));
        assert!(!timer.cancel(GUILD));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enqueue_cancels_timer() {
        let (store, timer, fired) = setup();
        timer.schedule(GUILD, Duration::from_secs(10), counting(&fired));

        store
            .enqueue(GUILD, Track::new("https://youtu.be/x", "x", "tester"))
            .unwrap();
        assert!(!timer.is_armed(GUILD));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_of_deleted_guild_does_not_fire() {
        let (store, timer, fired) = setup();
        timer.schedule(GUILD, Duration::from_secs(10), counting(&fired));

        store.delete(GUILD);
        store.create(GUILD);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_schedule_without_state() {
        let store = Arc::new(QueueStore::new(10));
        let timer = IdleTimer::new(store);
        assert!(!timer.schedule(GUILD, Duration::from_secs(1), || async {}));
    }
}
