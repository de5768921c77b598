//! Live poll tallying: an ingestor turning a keyword-filtered event stream
//! into vote messages, an aggregator batching them into poll results, and a
//! query service exposing the polls over HTTP.

pub mod aggregator;
pub mod bus;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod shutdown;
pub mod stream;
pub mod tally;
pub mod tasks;


pub use error::{Error, Result};

/// Pool size each binary opens against the store.
pub const DB_MAX_CONNECTIONS: u32 = 5;
