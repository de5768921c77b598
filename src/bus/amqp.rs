//! RabbitMQ transport.
//!
//! `votes` is a fanout exchange. A consumer group is a durable queue named
//! `votes.<group>` bound to it, so every group sees every vote while members
//! of one group compete for messages on a shared queue.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::*, types::FieldTable, BasicProperties, Channel, Connection, ConnectionProperties,
    Consumer, ExchangeKind,
};
use log::{debug, info, warn};

use super::{decode_vote, VoteConsumer, VotePublisher};
use crate::error::Result;
use crate::shutdown::ShutdownListener;
use crate::tally::Tally;

async fn open_channel(amqp_url: &str, exchange: &str) -> Result<(Connection, Channel)> {
    let connection = Connection::connect(amqp_url, ConnectionProperties::default()).await?;
    let channel = connection.create_channel().await?;

    channel
        .exchange_declare(
            exchange,
            ExchangeKind::Fanout,
            ExchangeDeclareOptions {
                durable: true,
                ..ExchangeDeclareOptions::default()
            },
            FieldTable::default(),
        )
        .await?;

    Ok((connection, channel))
}

pub struct AmqpPublisher {
    connection: Connection,
    channel: Channel,
    exchange: String,
}

impl AmqpPublisher {
    pub async fn connect(amqp_url: &str, exchange: &str) -> Result<Self> {
        let (connection, channel) = open_channel(amqp_url, exchange).await?;
        info!("Connected to message bus, publishing to exchange '{}'", exchange);

        Ok(Self {
            connection,
            channel,
            exchange: exchange.to_string(),
        })
    }
}

#[async_trait]
impl VotePublisher for AmqpPublisher {
    async fn publish(&self, vote: &str) -> Result<()> {
        // The returned confirm is dropped: publishing is fire-and-forget
        self.channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                vote.as_bytes(),
                BasicProperties::default(),
            )
            .await?;

        debug!("Published vote '{}' to '{}'", vote, self.exchange);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.channel.close(200, "publisher stopping").await?;
        self.connection.close(200, "publisher stopping").await?;
        Ok(())
    }
}

pub struct AmqpConsumer {
    connection: Connection,
    channel: Channel,
    consumer: Consumer,
    queue: String,
}

impl AmqpConsumer {
    pub async fn connect(amqp_url: &str, exchange: &str, group: &str, prefetch: u16) -> Result<Self> {
        let (connection, channel) = open_channel(amqp_url, exchange).await?;
        let queue = format!("{}.{}", exchange, group);

        channel
            .queue_declare(
                &queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(&queue, exchange, "", QueueBindOptions::default(), FieldTable::default())
            .await?;
        channel.basic_qos(prefetch, BasicQosOptions::default()).await?;

        let consumer = channel
            .basic_consume(&queue, group, BasicConsumeOptions::default(), FieldTable::default())
            .await?;

        info!("Consuming '{}' as group '{}' (queue '{}')", exchange, group, queue);
        Ok(Self {
            connection,
            channel,
            consumer,
            queue,
        })
    }

    async fn stop(&mut self) -> Result<()> {
        info!("Stopping consumer on '{}'", self.queue);
        self.channel
            .basic_cancel(self.consumer.tag().as_str(), BasicCancelOptions::default())
            .await?;
        self.channel.close(200, "consumer stopping").await?;
        self.connection.close(200, "consumer stopping").await?;
        info!("Consumer stopped");
        Ok(())
    }
}

// Why the delivery loop stopped.
enum Ended {
    Shutdown,
    Closed,
    Failed(lapin::Error),
}

/// Result of a consume call once the subscription has been stopped. A stop
/// failure is only reported when nothing else went wrong first.
fn finish(ended: Ended, stopped: Result<()>, recorded: u64) -> Result<u64> {
    match ended {
        Ended::Shutdown => stopped.map(|()| recorded),
        Ended::Closed => {
            if let Err(e) = stopped {
                warn!("Consumer did not stop cleanly: {}", e);
            }
            Ok(recorded)
        }
        Ended::Failed(e) => {
            if let Err(stop_err) = stopped {
                warn!("Consumer did not stop cleanly: {}", stop_err);
            }
            Err(e.into())
        }
    }
}

#[async_trait]
impl VoteConsumer for AmqpConsumer {
    async fn consume(&mut self, tally: &Tally, mut shutdown: ShutdownListener) -> Result<u64> {
        let mut recorded = 0;

        let ended = loop {
            let delivery = tokio::select! {
                _ = shutdown.triggered() => break Ended::Shutdown,
                next = self.consumer.next() => match next {
                    Some(Ok(delivery)) => delivery,
                    Some(Err(e)) => {
                        warn!("Message bus delivery failed: {}", e);
                        break Ended::Failed(e);
                    }
                    None => {
                        warn!("Message bus closed the subscription");
                        break Ended::Closed;
                    }
                },
            };

            if let Some(vote) = decode_vote(&delivery.data) {
                tally.record(vote).await;
                recorded += 1;
            }
            // Unusable payloads are acked too, redelivery would not fix them
            if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                warn!("Failed to ack vote message: {}", e);
            }
        };

        // The channel and connection are closed on every exit path
        let stopped = self.stop().await;
        finish(ended, stopped, recorded)
    }
}
