//! Ingestor: turns the external event stream into vote messages.
//!
//! One task reads the stream and forwards matched options over a bounded
//! channel; a second task drains the channel into the bus. Shutdown (signal)
//! and the stream lifetime timer both end the reading task, which drops the
//! channel sender so the publisher drains what is buffered and closes.

pub mod filter;

pub use filter::OptionFilter;

use futures::StreamExt;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::VotePublisher;
use crate::config::IngestorConfig;
use crate::db::PollStore;
use crate::error::Result;
use crate::shutdown::{Shutdown, ShutdownListener};
use crate::stream::{EventSource, EventStream};

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub stream_lifetime: Option<Duration>,
    pub refresh_options: bool,
    pub reconnect_delay: Duration,
    pub vote_buffer: usize,
}

impl From<&IngestorConfig> for IngestSettings {
    fn from(config: &IngestorConfig) -> Self {
        Self {
            stream_lifetime: config.stream_lifetime,
            refresh_options: config.refresh_options,
            reconnect_delay: config.reconnect_delay,
            vote_buffer: config.vote_buffer,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestStats {
    pub connections: u64,
    pub events: u64,
    pub votes: u64,
    pub published: u64,
    pub dropped: u64,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub dropped: u64,
}

/// Why a stream connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Expired,
    Closed,
    Failed,
}

pub struct Ingestor {
    store: Arc<dyn PollStore>,
    source: Arc<dyn EventSource>,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(store: Arc<dyn PollStore>, source: Arc<dyn EventSource>, settings: IngestSettings) -> Self {
        Self {
            store,
            source,
            settings,
        }
    }

    /// Runs until shutdown, or until the first connection ends when options
    /// are not refreshed. Returns only after the publisher has drained.
    ///
    /// Failing to load the options at startup is fatal.
    pub async fn run(&self, publisher: Arc<dyn VotePublisher>, shutdown: &Shutdown) -> Result<IngestStats> {
        info!("Loading poll options...");
        let options = self.store.load_options().await?;
        info!("Loaded {} option(s)", options.len());

        let (votes_tx, votes_rx) = mpsc::channel(self.settings.vote_buffer);
        let publisher_task = spawn_publisher(publisher, votes_rx);

        let mut stats = IngestStats::default();
        let read_result = self.read_loop(options, votes_tx, shutdown.listener(), &mut stats).await;

        match publisher_task.await {
            Ok(published) => {
                stats.published = published.published;
                stats.dropped = published.dropped;
            }
            Err(e) => error!("Publisher task failed: {}", e),
        }

        info!(
            "Ingestor stopped: {} connection(s), {} event(s), {} vote(s), {} published, {} dropped",
            stats.connections, stats.events, stats.votes, stats.published, stats.dropped
        );
        read_result.map(|()| stats)
    }

    // Owns the vote sender; returning drops it and lets the publisher finish.
    async fn read_loop(
        &self,
        mut options: Vec<String>,
        votes: mpsc::Sender<String>,
        mut shutdown: ShutdownListener,
        stats: &mut IngestStats,
    ) -> Result<()> {
        loop {
            if shutdown.is_triggered() {
                break;
            }

            let filter = OptionFilter::new(&options)?;
            let end = if filter.is_empty() {
                warn!("No poll options to track");
                StreamEnd::Failed
            } else {
                let opened = tokio::select! {
                    _ = shutdown.triggered() => break,
                    opened = self.source.open(filter.keywords()) => opened,
                };
                match opened {
                    Ok(events) => {
                        stats.connections += 1;
                        self.pump(events, &filter, &votes, &mut shutdown, stats).await
                    }
                    Err(e) if self.settings.refresh_options => {
                        warn!("Could not open event stream: {}", e);
                        StreamEnd::Failed
                    }
                    Err(e) => return Err(e),
                }
            };

            match end {
                StreamEnd::Shutdown => break,
                _ if !self.settings.refresh_options => {
                    info!("Event stream ended ({:?}), option refresh is off", end);
                    break;
                }
                StreamEnd::Expired => {}
                StreamEnd::Closed | StreamEnd::Failed => {
                    info!("Reconnecting in {:?}", self.settings.reconnect_delay);
                    tokio::select! {
                        _ = shutdown.triggered() => break,
                        _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
                    }
                }
            }

            match self.store.load_options().await {
                Ok(fresh) => {
                    if fresh != options {
                        info!("Option set changed, now {} option(s)", fresh.len());
                    }
                    options = fresh;
                }
                Err(e) => warn!("Failed to reload options, keeping {} known: {}", options.len(), e),
            }
        }

        Ok(())
    }

    /// Forwards matches from one connection until it ends. The connection is
    /// dropped, and so closed, exactly once when this returns.
    async fn pump(
        &self,
        mut events: EventStream,
        filter: &OptionFilter,
        votes: &mpsc::Sender<String>,
        shutdown: &mut ShutdownListener,
        stats: &mut IngestStats,
    ) -> StreamEnd {
        let lifetime = self.settings.stream_lifetime;
        let expiry = async move {
            match lifetime {
                Some(lifetime) => tokio::time::sleep(lifetime).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            let event = tokio::select! {
                _ = shutdown.triggered() => return StreamEnd::Shutdown,
                _ = &mut expiry => {
                    info!("Stream lifetime elapsed, closing connection");
                    return StreamEnd::Expired;
                }
                next = events.next() => match next {
                    Some(Ok(event)) => event,
                    Some(Err(e)) => {
                        warn!("Event stream failed: {}", e);
                        return StreamEnd::Failed;
                    }
                    None => {
                        info!("Event stream closed by remote");
                        return StreamEnd::Closed;
                    }
                },
            };

            stats.events += 1;
            for option in filter.matches(&event.text) {
                // A full channel blocks here; shutdown still gets through
                tokio::select! {
                    sent = votes.send(option.to_string()) => {
                        if sent.is_err() {
                            error!("Publisher is gone, closing event stream");
                            return StreamEnd::Shutdown;
                        }
                        stats.votes += 1;
                    }
                    _ = shutdown.triggered() => return StreamEnd::Shutdown,
                }
            }
        }
    }
}

/// Publishes every vote from `votes` until the channel closes, then closes
/// the publisher. Failed publishes are logged and dropped.
pub fn spawn_publisher(
    publisher: Arc<dyn VotePublisher>,
    mut votes: mpsc::Receiver<String>,
) -> JoinHandle<PublishStats> {
    tokio::spawn(async move {
        let mut stats = PublishStats::default();
        while let Some(vote) = votes.recv().await {
            debug!("New vote: {}", vote);
            match publisher.publish(&vote).await {
                Ok(()) => stats.published += 1,
                Err(e) => {
                    warn!("Dropping vote '{}': {}", vote, e);
                    stats.dropped += 1;
                }
            }
        }

        info!("Publisher: stopping");
        if let Err(e) = publisher.close().await {
            warn!("Publisher did not close cleanly: {}", e);
        }
        info!("Publisher: stopped");
        stats
    })
}
