//! In-memory [`PollStore`] with failure injection, for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::PollStore;
use crate::error::{Error, Result};
use crate::models::Poll;

#[derive(Default)]
pub struct MemoryStore {
    polls: Mutex<BTreeMap<String, Poll>>,
    failing: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_polls(polls: Vec<Poll>) -> Self {
        let store = Self::default();
        {
            let mut map = store.polls.lock().unwrap();
            for poll in polls {
                map.insert(poll.id.clone(), poll);
            }
        }
        store
    }

    /// Makes increments of `option` fail until [`MemoryStore::heal`] is called.
    pub fn fail_option(&self, option: &str) {
        self.failing.lock().unwrap().insert(option.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Number of store operations invoked so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn result(&self, poll_id: &str, option: &str) -> i64 {
        self.polls
            .lock()
            .unwrap()
            .get(poll_id)
            .and_then(|poll| poll.results.get(option).copied())
            .unwrap_or(0)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn load_options(&self) -> Result<Vec<String>> {
        self.touch();
        let mut options: Vec<String> = Vec::new();
        for poll in self.polls.lock().unwrap().values() {
            for option in &poll.options {
                if !options.contains(option) {
                    options.push(option.clone());
                }
            }
        }
        Ok(options)
    }

    async fn increment_option(&self, option: &str, count: u64) -> Result<u64> {
        self.touch();
        if self.failing.lock().unwrap().contains(option) {
            return Err(Error::Store(format!("injected failure for {}", option)));
        }
        let mut updated = 0;
        for poll in self.polls.lock().unwrap().values_mut() {
            if poll.options.iter().any(|o| o == option) {
                *poll.results.entry(option.to_string()).or_insert(0) += count as i64;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_polls(&self) -> Result<Vec<Poll>> {
        self.touch();
        Ok(self.polls.lock().unwrap().values().cloned().collect())
    }

    async fn get_poll(&self, poll_id: &str) -> Result<Option<Poll>> {
        self.touch();
        Ok(self.polls.lock().unwrap().get(poll_id).cloned())
    }

    async fn create_poll(&self, poll: &Poll) -> Result<()> {
        self.touch();
        let mut polls = self.polls.lock().unwrap();
        if polls.contains_key(&poll.id) {
            return Err(Error::PollExists(poll.id.clone()));
        }
        polls.insert(poll.id.clone(), poll.clone());
        Ok(())
    }

    async fn delete_poll(&self, poll_id: &str) -> Result<bool> {
        self.touch();
        Ok(self.polls.lock().unwrap().remove(poll_id).is_some())
    }
}
