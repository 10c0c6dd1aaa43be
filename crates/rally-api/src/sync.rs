use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::IntoResponse,
};
use rally_gateway::connection;
use serde::Deserialize;

use crate::error::ApiError;
use crate::middleware::verify_token;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    pub token: String,
}

/// WebSocket upgrade for change notices. Browsers cannot set headers on the
/// upgrade request, so the bearer token travels in the query string.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<SyncQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let claims = verify_token(&state.jwt_secret, &query.token).ok_or(ApiError::Unauthorized)?;

    let dispatcher = state.dispatcher.clone();
    let db = state.db.clone();
    Ok(ws.on_upgrade(move |socket| connection::handle_connection(socket, dispatcher, db, claims.sub)))
}
