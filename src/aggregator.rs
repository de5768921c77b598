//! Aggregator: consumes vote messages into a [`Tally`] and flushes it to the
//! store on a timer.

use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::bus::VoteConsumer;
use crate::config::AggregatorConfig;
use crate::db::PollStore;
use crate::error::Result;
use crate::shutdown::Shutdown;
use crate::tally::Tally;
use crate::tasks::flusher::flush_task;

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub flush_interval: Duration,
    pub flush_on_shutdown: bool,
}

impl From<&AggregatorConfig> for AggregatorSettings {
    fn from(config: &AggregatorConfig) -> Self {
        Self {
            flush_interval: config.flush_interval,
            flush_on_shutdown: config.flush_on_shutdown,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    pub recorded: u64,
    /// Votes still pending at exit and never written.
    pub discarded: u64,
}

/// Runs the consumer and the flush timer until shutdown.
///
/// If the consumer ends on its own (the bus went away) shutdown is triggered
/// so the flush timer stops too. Returns once the consumer has stopped and
/// the last flush cycle, if any, has finished.
pub async fn run(
    tally: Arc<Tally>,
    store: Arc<dyn PollStore>,
    consumer: &mut dyn VoteConsumer,
    settings: &AggregatorSettings,
    shutdown: &Shutdown,
) -> Result<AggregateStats> {
    let flusher = tokio::spawn(flush_task(
        tally.clone(),
        store.clone(),
        settings.flush_interval,
        shutdown.listener(),
    ));

    let consumed = consumer.consume(&tally, shutdown.listener()).await;
    if !shutdown.is_triggered() {
        warn!("Vote consumer ended before shutdown, stopping");
        shutdown.trigger();
    }

    if let Err(e) = flusher.await {
        error!("Flush task failed: {}", e);
    }

    if settings.flush_on_shutdown {
        info!("Flushing pending votes before exit");
        tally.flush(store.as_ref()).await;
    }

    let discarded = tally.pending_votes().await;
    if discarded > 0 {
        warn!("Discarding {} pending vote(s) that were never written", discarded);
    }

    let recorded = consumed?;
    info!("Aggregator stopped: {} vote(s) recorded", recorded);
    Ok(AggregateStats { recorded, discarded })
}
