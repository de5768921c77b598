//! Shared-secret check on the `key` query parameter.

use axum::extract::{Query, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

use super::{ApiError, AppState};

/// Proof that the request passed [`require_api_key`]. Handlers that change
/// polls extract it, so they cannot be routed around the check.
#[derive(Debug, Clone)]
pub struct ApiKey(pub Arc<str>);

/// Compares without stopping at the first differing byte, so response time
/// does not reveal how much of the key was right.
fn keys_match(given: &str, expected: &str) -> bool {
    let (given, expected) = (given.as_bytes(), expected.as_bytes());
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |diff, (a, b)| diff | (a ^ b))
        == 0
}

#[derive(Deserialize)]
struct KeyParams {
    key: Option<String>,
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = Query::<KeyParams>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(params)| params.key);

    match key {
        Some(key) if keys_match(&key, &state.api_key) => {
            request.extensions_mut().insert(ApiKey(state.api_key.clone()));
            Ok(next.run(request).await)
        }
        Some(_) => {
            debug!("Rejected request to {}: wrong api key", request.uri().path());
            Err(ApiError::Unauthorized)
        }
        None => {
            debug!("Rejected request to {}: no api key", request.uri().path());
            Err(ApiError::Unauthorized)
        }
    }
}
