//! Consumes vote messages and periodically adds the counts to the stored
//! poll results.

use log::{error, info};
use std::sync::Arc;

use trusty_tally::aggregator::{self, AggregatorSettings};
use trusty_tally::bus::amqp::AmqpConsumer;
use trusty_tally::config::{load_dotenv, AggregatorConfig};
use trusty_tally::db::Database;
use trusty_tally::models::VOTES_TOPIC;
use trusty_tally::shutdown::{trigger_on_signal, Shutdown};
use trusty_tally::tally::Tally;
use trusty_tally::{Result, DB_MAX_CONNECTIONS};

#[tokio::main]
async fn main() {
    let dotenv = load_dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = dotenv {
        error!("{}", e);
        std::process::exit(1);
    }
    if let Err(e) = run().await {
        error!("Aggregator failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AggregatorConfig::from_env()?;
    info!(
        "Flushing every {:?} with {:?} policy",
        config.flush_interval, config.flush_policy
    );

    let database = Arc::new(Database::new(&config.database_url, DB_MAX_CONNECTIONS).await?);
    let mut consumer = match AmqpConsumer::connect(
        &config.amqp_url,
        VOTES_TOPIC,
        &config.consumer_group,
        config.prefetch,
    )
    .await
    {
        Ok(consumer) => consumer,
        Err(e) => {
            database.close().await;
            return Err(e);
        }
    };

    let shutdown = Shutdown::new();
    trigger_on_signal(shutdown.clone());

    let tally = Arc::new(Tally::new(config.flush_policy));
    let result = aggregator::run(
        tally,
        database.clone(),
        &mut consumer,
        &AggregatorSettings::from(&config),
        &shutdown,
    )
    .await;

    database.close().await;
    result.map(|_| ())
}
