use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] rally_engine::Error),

    #[error("Missing or invalid bearer token")]
    Unauthorized,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use rally_engine::Error as E;

        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Engine(e) => match e {
                E::NotFound(_) => StatusCode::NOT_FOUND,
                E::InvalidInviteCode
                | E::InvalidInput(_)
                | E::InvalidNomination
                | E::TooFewParticipants
                | E::TooFewNominations
                | E::NominationLimit => StatusCode::BAD_REQUEST,
                E::NotParticipant | E::NotCreator | E::NotProposer => StatusCode::FORBIDDEN,
                E::InvalidState(_)
                | E::GatheringFull
                | E::AlreadyJoined
                | E::DuplicateNomination
                | E::VoteInProgress
                | E::AlreadyVoted
                | E::VoteEnded => StatusCode::CONFLICT,
                E::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Engine(e) => e.code(),
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Storage details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", self);
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });
        (status, Json(body)).into_response()
    }
}
