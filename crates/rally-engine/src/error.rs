//! Error types for coordination operations.

use rally_db::UniqueViolation;
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by engine operations. Every precondition failure has its
/// own variant so callers can branch on it.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Invalid invite code")]
    InvalidInviteCode,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not a participant of this gathering")]
    NotParticipant,

    #[error("Only the gathering creator can do this")]
    NotCreator,

    #[error("Only the proposer can withdraw a nomination")]
    NotProposer,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Gathering is full")]
    GatheringFull,

    #[error("Already joined this gathering")]
    AlreadyJoined,

    #[error("At least two participants are required")]
    TooFewParticipants,

    #[error("At least two distinct nominations are required")]
    TooFewNominations,

    #[error("Nomination limit reached")]
    NominationLimit,

    #[error("This place has already been nominated by you")]
    DuplicateNomination,

    #[error("Nomination does not belong to this gathering")]
    InvalidNomination,

    #[error("A vote is already in progress")]
    VoteInProgress,

    #[error("Already voted")]
    AlreadyVoted,

    #[error("Vote has ended")]
    VoteEnded,

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInviteCode => "INVALID_CODE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::NotParticipant => "NOT_JOINED",
            Self::NotCreator => "NOT_CREATOR",
            Self::NotProposer => "NOT_PROPOSER",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::GatheringFull => "GATHERING_FULL",
            Self::AlreadyJoined => "ALREADY_JOINED",
            Self::TooFewParticipants => "TOO_FEW_PARTICIPANTS",
            Self::TooFewNominations => "TOO_FEW_NOMINATIONS",
            Self::NominationLimit => "NOMINATION_LIMIT",
            Self::DuplicateNomination => "DUPLICATE_NOMINATION",
            Self::InvalidNomination => "INVALID_NOMINATION",
            Self::VoteInProgress => "VOTE_IN_PROGRESS",
            Self::AlreadyVoted => "ALREADY_VOTED",
            Self::VoteEnded => "VOTE_ENDED",
            Self::Storage(_) => "INTERNAL",
        }
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }
}

/// Converts a store error, mapping a uniqueness conflict on `table` to
/// `conflict` so it matches the error the pre-check would have produced.
pub(crate) fn map_unique(err: anyhow::Error, table: &str, conflict: Error) -> Error {
    match err.downcast_ref::<UniqueViolation>() {
        Some(v) if v.table == table => conflict,
        _ => Error::Storage(err),
    }
}
