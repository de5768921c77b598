//! In-process bus for pipeline tests.

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

use super::{decode_vote, VoteConsumer, VotePublisher};
use crate::error::{Error, Result};
use crate::shutdown::ShutdownListener;
use crate::tally::Tally;

pub struct MemoryPublisher {
    tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
    pub closed: AtomicBool,
}

pub struct MemoryConsumer {
    rx: mpsc::UnboundedReceiver<String>,
}

pub fn memory_bus() -> (MemoryPublisher, MemoryConsumer) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryPublisher {
            tx: Mutex::new(Some(tx)),
            failing: AtomicBool::new(false),
            delay: Mutex::new(None),
            closed: AtomicBool::new(false),
        },
        MemoryConsumer { rx },
    )
}

impl MemoryPublisher {
    pub fn fail_publishes(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    /// Makes every publish take `delay`, like a congested broker.
    pub fn slow_publishes(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl VotePublisher for MemoryPublisher {
    async fn publish(&self, vote: &str) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Store("bus unavailable".to_string()));
        }
        match self.tx.lock().unwrap().as_ref() {
            Some(tx) => tx
                .send(vote.to_string())
                .map_err(|_| Error::Store("bus closed".to_string())),
            None => Err(Error::Store("publisher closed".to_string())),
        }
    }

    async fn close(&self) -> Result<()> {
        self.tx.lock().unwrap().take();
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl VoteConsumer for MemoryConsumer {
    async fn consume(&mut self, tally: &Tally, mut shutdown: ShutdownListener) -> Result<u64> {
        let mut recorded = 0;
        loop {
            let payload = tokio::select! {
                _ = shutdown.triggered() => break,
                next = self.rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };
            if let Some(vote) = decode_vote(payload.as_bytes()) {
                tally.record(vote).await;
                recorded += 1;
            }
        }
        Ok(recorded)
    }
}
