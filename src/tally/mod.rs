use log::{debug, error, info};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use crate::config::FlushPolicy;
use crate::db::PollStore;

/// Votes counted since the last successful flush, keyed by option.
///
/// Consumer callbacks call [`Tally::record`] while the flush timer calls
/// [`Tally::flush`]; one mutex guards the map for both, and a flush keeps it
/// locked until it has decided what to clear.
pub struct Tally {
    pending: Mutex<BTreeMap<String, u64>>,
    policy: FlushPolicy,
}

/// What a single flush cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending, the store was not touched.
    Skipped,
    Flushed { persisted: usize, failed: usize },
}

impl Tally {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            policy,
        }
    }

    pub async fn record(&self, option: &str) {
        let mut pending = self.pending.lock().await;
        *pending.entry(option.to_string()).or_insert(0) += 1;
    }

    pub async fn snapshot(&self) -> BTreeMap<String, u64> {
        self.pending.lock().await.clone()
    }

    /// Total votes not yet persisted.
    pub async fn pending_votes(&self) -> u64 {
        self.pending.lock().await.values().sum()
    }

    /// Applies every pending count to the store as an increment.
    ///
    /// Failures are logged and the affected counts stay pending according to
    /// the flush policy; nothing is returned as an error.
    pub async fn flush(&self, store: &dyn PollStore) -> FlushOutcome {
        let mut pending = self.pending.lock().await;
        if pending.is_empty() {
            debug!("No new votes, skipping database update");
            return FlushOutcome::Skipped;
        }

        info!("Updating database with {} option(s)...", pending.len());
        let mut persisted = Vec::with_capacity(pending.len());
        let mut failed = 0;

        for (option, count) in pending.iter() {
            match store.increment_option(option, *count).await {
                Ok(0) => {
                    // No poll offers it (any more); the votes have nowhere to go
                    debug!("No poll has option {}, dropping {} vote(s)", option, count);
                    persisted.push(option.clone());
                }
                Ok(polls) => {
                    debug!("Added {} to {} in {} poll(s)", count, option, polls);
                    persisted.push(option.clone());
                }
                Err(e) => {
                    error!("Failed to update {}: {}", option, e);
                    failed += 1;
                }
            }
        }

        match self.policy {
            FlushPolicy::PerOption => {
                for option in &persisted {
                    pending.remove(option);
                }
            }
            FlushPolicy::AllOrNothing => {
                if failed == 0 {
                    pending.clear();
                }
            }
        }

        if failed == 0 {
            info!("Finished updating database");
        } else {
            info!(
                "Database update incomplete: {} option(s) failed, {} pending",
                failed,
                pending.len()
            );
        }

        FlushOutcome::Flushed {
            persisted: persisted.len(),
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::models::{NewPoll, Poll};
    use std::sync::Arc;

    fn store_with(id: &str, options: &[&str]) -> MemoryStore {
        MemoryStore::with_polls(vec![Poll::new(NewPoll {
            id: Some(id.to_string()),
            title: id.to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
        })])
    }

    #[tokio::test]
    async fn flush_applies_exact_counts_and_clears() {
        let store = store_with("p1", &["go", "rust", "zig"]);
        let tally = Tally::new(FlushPolicy::PerOption);
        for vote in ["go", "rust", "go", "zig", "go", "rust"] {
            tally.record(vote).await;
        }

        let outcome = tally.flush(&store).await;

        assert_eq!(outcome, FlushOutcome::Flushed { persisted: 3, failed: 0 });
        assert_eq!(store.result("p1", "go"), 3);
        assert_eq!(store.result("p1", "rust"), 2);
        assert_eq!(store.result("p1", "zig"), 1);
        assert_eq!(tally.pending_votes().await, 0);
    }

    #[tokio::test]
    async fn empty_flush_never_touches_the_store() {
        let store = store_with("p1", &["go"]);
        let tally = Tally::new(FlushPolicy::PerOption);

        assert_eq!(tally.flush(&store).await, FlushOutcome::Skipped);
        assert_eq!(tally.flush(&store).await, FlushOutcome::Skipped);
        assert_eq!(store.calls(), 0);
        assert_eq!(store.result("p1", "go"), 0);
    }

    #[tokio::test]
    async fn per_option_policy_retries_only_the_failed_option() {
        let store = store_with("p1", &["go", "rust"]);
        let tally = Tally::new(FlushPolicy::PerOption);
        tally.record("go").await;
        tally.record("rust").await;
        tally.record("rust").await;

        store.fail_option("go");
        let outcome = tally.flush(&store).await;
        assert_eq!(outcome, FlushOutcome::Flushed { persisted: 1, failed: 1 });
        assert_eq!(tally.snapshot().await, BTreeMap::from([("go".to_string(), 1)]));

        store.heal();
        tally.flush(&store).await;

        assert_eq!(store.result("p1", "go"), 1);
        assert_eq!(store.result("p1", "rust"), 2);
        assert_eq!(tally.pending_votes().await, 0);
    }

    #[tokio::test]
    async fn all_or_nothing_policy_double_counts_after_partial_failure() {
        // Known gap of the legacy policy: "rust" persisted in the first cycle
        // but stays pending because "go" failed, so it is applied twice.
        let store = store_with("p1", &["go", "rust"]);
        let tally = Tally::new(FlushPolicy::AllOrNothing);
        tally.record("go").await;
        tally.record("rust").await;
        tally.record("rust").await;

        store.fail_option("go");
        tally.flush(&store).await;
        assert_eq!(tally.pending_votes().await, 3);

        store.heal();
        tally.flush(&store).await;

        assert_eq!(store.result("p1", "go"), 1);
        assert_eq!(store.result("p1", "rust"), 4);
    }

    #[tokio::test]
    async fn votes_for_unknown_options_are_dropped_after_flush() {
        let store = store_with("p1", &["go"]);
        let tally = Tally::new(FlushPolicy::PerOption);
        tally.record("cobol").await;

        assert_eq!(
            tally.flush(&store).await,
            FlushOutcome::Flushed { persisted: 1, failed: 0 }
        );
        assert_eq!(tally.pending_votes().await, 0);
    }

    #[tokio::test]
    async fn concurrent_records_are_not_lost() {
        let tally = Arc::new(Tally::new(FlushPolicy::PerOption));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let tally = Arc::clone(&tally);
            handles.push(tokio::spawn(async move {
                for _ in 0..250 {
                    let option = if worker % 2 == 0 { "go" } else { "rust" };
                    tally.record(option).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = tally.snapshot().await;
        assert_eq!(snapshot.get("go"), Some(&1000));
        assert_eq!(snapshot.get("rust"), Some(&1000));
    }
}
