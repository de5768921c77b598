//! Reads the keyword-filtered event stream and publishes one vote message
//! per matched option.

use log::{error, info};
use std::sync::Arc;

use trusty_tally::bus::amqp::AmqpPublisher;
use trusty_tally::config::{load_dotenv, IngestorConfig};
use trusty_tally::db::Database;
use trusty_tally::ingest::{IngestSettings, Ingestor};
use trusty_tally::models::VOTES_TOPIC;
use trusty_tally::shutdown::{trigger_on_signal, Shutdown};
use trusty_tally::stream::HttpEventSource;
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
        error!("Ingestor failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = IngestorConfig::from_env()?;

    let database = Arc::new(Database::new(&config.database_url, DB_MAX_CONNECTIONS).await?);
    info!("Connected to {}", config.database_url);

    let publisher = match AmqpPublisher::connect(&config.amqp_url, VOTES_TOPIC).await {
        Ok(publisher) => Arc::new(publisher),
        Err(e) => {
            database.close().await;
            return Err(e);
        }
    };
    let source = Arc::new(HttpEventSource::new(
        config.stream_url.clone(),
        config.stream_bearer_token.clone(),
    )?);

    let shutdown = Shutdown::new();
    trigger_on_signal(shutdown.clone());

    let ingestor = Ingestor::new(database.clone(), source, IngestSettings::from(&config));
    let result = ingestor.run(publisher, &shutdown).await;

    database.close().await;
    result.map(|_| ())
}
