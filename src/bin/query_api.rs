//! HTTP service for creating, listing and deleting polls and reading their
//! results.

use log::error;
use std::sync::Arc;
use tokio::net::TcpListener;

use trusty_tally::config::{load_dotenv, ApiConfig};
use trusty_tally::db::Database;
use trusty_tally::handlers::{serve, AppState};
use trusty_tally::shutdown::{trigger_on_signal, Shutdown};
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
        error!("Query service failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = ApiConfig::from_env()?;

    let database = Arc::new(Database::new(&config.database_url, DB_MAX_CONNECTIONS).await?);
    let listener = match TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            database.close().await;
            return Err(e.into());
        }
    };

    let shutdown = Shutdown::new();
    trigger_on_signal(shutdown.clone());

    let state = AppState {
        store: database.clone(),
        api_key: Arc::from(config.api_key.as_str()),
    };
    let result = serve(listener, state, &shutdown).await;

    database.close().await;
    result
}
