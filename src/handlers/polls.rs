use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_METHODS, LOCATION};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use log::info;
use serde::Serialize;

use super::{ApiError, ApiKey, AppState, Envelope};
use crate::models::{NewPoll, Poll};

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
}

pub async fn list_polls(State(state): State<AppState>) -> Result<Json<Envelope<Vec<Poll>>>, ApiError> {
    let polls = state.store.list_polls().await?;
    Ok(Json(Envelope::data(polls)))
}

pub async fn create_poll(
    State(state): State<AppState>,
    Extension(_key): Extension<ApiKey>,
    payload: Result<Json<NewPoll>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(new_poll) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    new_poll.validate().map_err(ApiError::BadRequest)?;

    let poll = Poll::new(new_poll);
    state.store.create_poll(&poll).await?;
    info!("Created poll {} with {} option(s)", poll.id, poll.options.len());

    let location = format!("polls/{}", poll.id);
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(Envelope::data(poll))))
}

pub async fn get_poll(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Envelope<Poll>>, ApiError> {
    match state.store.get_poll(&id).await? {
        Some(poll) => Ok(Json(Envelope::data(poll))),
        None => Err(ApiError::NotFound(format!("poll '{}' not found", id))),
    }
}

pub async fn delete_poll(
    State(state): State<AppState>,
    Extension(_key): Extension<ApiKey>,
    Path(id): Path<String>,
) -> Result<Json<Envelope<Deleted>>, ApiError> {
    if !state.store.delete_poll(&id).await? {
        return Err(ApiError::NotFound(format!("poll '{}' not found", id)));
    }
    info!("Deleted poll {}", id);
    Ok(Json(Envelope::data(Deleted { id })))
}

pub async fn collection_options() -> impl IntoResponse {
    ([(ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS")], Json(Envelope::data(())))
}

pub async fn poll_options() -> impl IntoResponse {
    ([(ACCESS_CONTROL_ALLOW_METHODS, "GET, DELETE, OPTIONS")], Json(Envelope::data(())))
}

pub async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}
