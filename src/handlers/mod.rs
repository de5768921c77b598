//! Query service: poll administration and results over HTTP.

mod auth;
mod error;
mod polls;

pub use auth::{require_api_key, ApiKey};
pub use error::ApiError;

use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS};
use axum::http::{HeaderValue, Uri};
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use log::info;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::db::PollStore;
use crate::error::Result;
use crate::shutdown::Shutdown;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PollStore>,
    pub api_key: Arc<str>,
}

/// Body of every response: exactly one of `data` and `error` is set.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
    pub error: Option<ErrorMessage>,
}

#[derive(Debug, Serialize)]
pub struct ErrorMessage {
    pub message: String,
}

impl<T> Envelope<T> {
    pub fn data(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(ErrorMessage {
                message: message.into(),
            }),
        }
    }
}

/// Builds the router.
///
/// - `GET /polls/` list polls
/// - `POST /polls/` create a poll
/// - `GET /polls/{id}` fetch a poll with its results
/// - `DELETE /polls/{id}` delete a poll
///
/// Every route requires `?key=<api key>`. CORS headers wrap everything,
/// rejections included.
pub fn router(state: AppState) -> Router {
    let collection = get(polls::list_polls)
        .post(polls::create_poll)
        .options(polls::collection_options)
        .fallback(polls::method_not_allowed);
    let item = get(polls::get_poll)
        .delete(polls::delete_poll)
        .options(polls::poll_options)
        .fallback(polls::method_not_allowed);

    Router::new()
        .route("/polls", collection.clone())
        .route("/polls/", collection)
        .route("/polls/{id}", item)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .layer(middleware::map_response(add_cors_headers))
        .with_state(state)
}

/// Serves `router(state)` on `listener` until shutdown, letting in-flight
/// requests finish.
pub async fn serve(listener: TcpListener, state: AppState, shutdown: &Shutdown) -> Result<()> {
    let mut stopping = shutdown.listener();
    info!("Query service listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { stopping.triggered().await })
        .await?;
    info!("Query service stopped");
    Ok(())
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static("Location"));
    response
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("no route for {}", uri.path()))
}
