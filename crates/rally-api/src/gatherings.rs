use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use std::future::Future;
use std::sync::Arc;

use rally_engine::Engine;
use rally_types::api::{
    Claims, CreateGatheringRequest, JoinGatheringRequest, PollQuery, UpdateLocationRequest,
};
use tracing::error;

use crate::error::ApiError;
use crate::state::AppState;

/// Runs a store-bound engine call off the async runtime.
pub(crate) async fn blocking<T, F>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Engine) -> rally_engine::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    let result = tokio::task::spawn_blocking(move || f(&engine))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?;
    Ok(result?)
}

/// Like [`blocking`] for engine calls that also await travel estimates. The
/// future is driven on a blocking thread, so it runs to completion even if
/// the client goes away.
pub(crate) async fn blocking_async<T, F, Fut>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(Arc<Engine>) -> Fut + Send + 'static,
    Fut: Future<Output = rally_engine::Result<T>>,
    T: Send + 'static,
{
    let engine = state.engine.clone();
    let handle = tokio::runtime::Handle::current();
    let result = tokio::task::spawn_blocking(move || handle.block_on(f(engine)))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal
        })?;
    Ok(result?)
}

pub async fn create_gathering(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateGatheringRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let gathering = blocking(&state, move |engine| engine.create_gathering(claims.sub, req)).await?;
    Ok((StatusCode::CREATED, Json(gathering)))
}

pub async fn my_gatherings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let gatherings = blocking(&state, move |engine| engine.my_gatherings(claims.sub)).await?;
    Ok(Json(gatherings))
}

pub async fn join_gathering(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<JoinGatheringRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let participant = blocking(&state, move |engine| engine.join_gathering(&code, claims.sub, req)).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

pub async fn gathering_detail(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let snapshot = blocking_async(&state, move |engine| async move {
        engine.gathering_detail(&code, claims.sub).await
    })
    .await?;
    Ok(Json(snapshot))
}

pub async fn poll(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<PollQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let response = blocking_async(&state, move |engine| async move {
        engine.poll(&code, claims.sub, query.version).await
    })
    .await?;
    Ok(Json(response))
}

pub async fn start_nominating(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let gathering = blocking(&state, move |engine| engine.start_nominating(&code, claims.sub)).await?;
    Ok(Json(gathering))
}

pub async fn depart(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let participant = blocking(&state, move |engine| engine.depart(&code, claims.sub)).await?;
    Ok(Json(participant))
}

pub async fn arrive(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let participant = blocking(&state, move |engine| engine.arrive(&code, claims.sub)).await?;
    Ok(Json(participant))
}

pub async fn update_location(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpdateLocationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let participant = blocking(&state, move |engine| engine.update_location(&code, claims.sub, req)).await?;
    Ok(Json(participant))
}
