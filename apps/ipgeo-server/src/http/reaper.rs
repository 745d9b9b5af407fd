use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::session::SessionStore;

/// Sweep `store` every `every`, evicting sessions idle for longer than `ttl`.
pub fn spawn_reaper(store: SessionStore, ttl: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let evicted = reap_idle(&store, ttl, Instant::now()).await;
            if !evicted.is_empty() {
                let remaining = store.len().await;
                info!(evicted = evicted.len(), remaining, "reaped idle sessions");
            }
        }
    })
}

/// One sweep. Returns the ids that were evicted.
pub async fn reap_idle(store: &SessionStore, ttl: Duration, now: Instant) -> Vec<String> {
    let mut evicted = Vec::new();
    for session in store.all().await {
        let idle = now.saturating_duration_since(session.last_activity());
        if idle <= ttl {
            continue;
        }
        // Lost the race to a DELETE or to shutdown.
        if store.remove(session.id()).await.is_none() {
            continue;
        }
        if let Err(e) = session.close() {
            warn!(session_id = %session.id(), error = %e, "close failed while reaping");
        }
        debug!(session_id = %session.id(), idle_secs = idle.as_secs(), "session evicted");
        evicted.push(session.id().to_string());
    }
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::published;

    const TTL: Duration = Duration::from_secs(30 * 60);
    const INTERVAL: Duration = Duration::from_secs(5 * 60);

    #[tokio::test(start_paused = true)]
    async fn evicts_only_sessions_past_ttl() {
        let store = SessionStore::default();
        let old = published(&store).await;
        time::advance(Duration::from_secs(2 * 60)).await;
        let young = published(&store).await;

        // old has been idle 31 minutes, young 29.
        let now = old.last_activity() + Duration::from_secs(31 * 60);
        let evicted = reap_idle(&store, TTL, now).await;

        assert_eq!(evicted, vec![old.id().to_string()]);
        assert!(old.is_closed());
        assert!(store.get(old.id()).await.is_none());
        assert!(!young.is_closed());
        assert!(store.get(young.id()).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exactly_ttl_is_not_idle() {
        let store = SessionStore::default();
        let s = published(&store).await;
        let evicted = reap_idle(&store, TTL, s.last_activity() + TTL).await;
        assert!(evicted.is_empty());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_task_sweeps_on_interval() {
        let store = SessionStore::default();
        let idle = published(&store).await;
        let active = published(&store).await;
        let task = spawn_reaper(store.clone(), TTL, INTERVAL);

        // Ticks at 5..25 minutes: nothing is past the TTL yet.
        time::sleep(Duration::from_secs(29 * 60)).await;
        assert_eq!(store.len().await, 2);

        active.touch();
        // The 35 minute tick evicts the untouched session only.
        time::sleep(Duration::from_secs(7 * 60)).await;
        assert!(store.get(idle.id()).await.is_none());
        assert!(idle.is_closed());
        assert!(store.get(active.id()).await.is_some());

        task.abort();
    }
}
