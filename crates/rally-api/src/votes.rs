use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use rally_types::api::{CastVoteRequest, Claims, NominateRequest};
use uuid::Uuid;

use crate::error::ApiError;
use crate::gatherings::{blocking, blocking_async};
use crate::state::AppState;

pub async fn nominate(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NominateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let nomination = blocking_async(&state, move |engine| async move {
        engine.nominate(&code, claims.sub, req).await
    })
    .await?;
    Ok((StatusCode::CREATED, Json(nomination)))
}

pub async fn withdraw_nomination(
    State(state): State<AppState>,
    Path((code, nomination_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |engine| engine.withdraw_nomination(&code, claims.sub, nomination_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_voting(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let vote = blocking(&state, move |engine| engine.start_voting(&code, claims.sub)).await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

pub async fn cast_vote(
    State(state): State<AppState>,
    Path((code, vote_id)): Path<(String, Uuid)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CastVoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let detail = blocking_async(&state, move |engine| async move {
        engine.cast_vote(&code, claims.sub, vote_id, req.nomination_id).await
    })
    .await?;
    Ok(Json(detail))
}
