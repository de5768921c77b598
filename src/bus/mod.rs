//! Message bus seam: the ingestor publishes vote tokens, the aggregator
//! consumes them into its tally.

pub mod amqp;
#[cfg(test)]
pub(crate) mod memory;

use async_trait::async_trait;
use log::warn;

use crate::error::Result;
use crate::shutdown::ShutdownListener;
use crate::tally::Tally;

#[async_trait]
pub trait VotePublisher: Send + Sync {
    /// Hands one vote token to the bus without waiting for a broker
    /// acknowledgement.
    async fn publish(&self, vote: &str) -> Result<()>;

    /// Flushes and releases the connection.
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait VoteConsumer: Send {
    /// Records every delivered vote into `tally` until `shutdown` fires or
    /// the bus goes away, then stops the subscription. Returns the number of
    /// votes recorded. Only returns once no callback is in flight.
    async fn consume(&mut self, tally: &Tally, shutdown: ShutdownListener) -> Result<u64>;
}

/// Turns a raw payload into an option token, or None if it is unusable.
pub fn decode_vote(payload: &[u8]) -> Option<&str> {
    match std::str::from_utf8(payload) {
        Ok(vote) if !vote.trim().is_empty() => Some(vote),
        Ok(_) => {
            warn!("Dropping empty vote message");
            None
        }
        Err(e) => {
            warn!("Dropping vote message that is not UTF-8: {}", e);
            None
        }
    }
}
