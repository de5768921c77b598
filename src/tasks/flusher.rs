use crate::db::PollStore;
use crate::shutdown::ShutdownListener;
use crate::tally::Tally;
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Flushes the tally into the store every `every` until shutdown.
///
/// Cycles never overlap: a cycle that outlasts the period delays the next
/// tick instead of bursting. A cycle already running when shutdown fires is
/// allowed to finish.
pub async fn flush_task(
    tally: Arc<Tally>,
    store: Arc<dyn PollStore>,
    every: Duration,
    mut shutdown: ShutdownListener,
) {
    info!("Starting flush task (every {:?})", every);
    // First tick one period after start, like a plain ticker
    let mut interval = interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.triggered() => break,
            _ = interval.tick() => {
                tally.flush(store.as_ref()).await;
            }
        }
    }

    info!("Flush task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushPolicy;
    use crate::db::memory::MemoryStore;
    use crate::models::{NewPoll, Poll};
    use crate::shutdown::Shutdown;

    #[tokio::test]
    async fn flushes_periodically_and_stops_on_shutdown() {
        let store = Arc::new(MemoryStore::with_polls(vec![Poll::new(NewPoll {
            id: Some("p1".to_string()),
            title: "p1".to_string(),
            options: vec!["go".to_string()],
        })]));
        let tally = Arc::new(Tally::new(FlushPolicy::PerOption));
        let shutdown = Shutdown::new();

        let task = tokio::spawn(flush_task(
            Arc::clone(&tally),
            store.clone(),
            Duration::from_millis(20),
            shutdown.listener(),
        ));

        tally.record("go").await;
        tally.record("go").await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(store.result("p1", "go"), 2);

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("flush task stops after shutdown")
            .unwrap();

        // Nothing flushes once the task is gone
        tally.record("go").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.result("p1", "go"), 2);
        assert_eq!(tally.pending_votes().await, 1);
    }
}
