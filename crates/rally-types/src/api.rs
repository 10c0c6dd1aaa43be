use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    Gathering, Location, Message, Nomination, NominationSource, Participant, VoteStatus,
};

// -- JWT Claims --

/// Bearer token claims. Tokens are issued by the identity service; this
/// server only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

// -- Gatherings --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateGatheringRequest {
    pub name: String,
    pub target_time: DateTime<Utc>,
    pub creator_nickname: String,
    #[serde(default)]
    pub creator_tastes: Vec<String>,
    pub creator_location: Option<Location>,
    pub creator_location_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinGatheringRequest {
    pub nickname: String,
    pub location: Option<Location>,
    pub location_name: Option<String>,
    #[serde(default)]
    pub tastes: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateLocationRequest {
    pub location: Location,
    pub location_name: Option<String>,
}

// -- Nominations --

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NominateRequest {
    pub place_id: String,
    pub name: String,
    pub address: Option<String>,
    pub location: Location,
    pub rating: Option<f64>,
    pub cost: Option<f64>,
    #[serde(default = "default_source")]
    pub source: NominationSource,
    pub reason: Option<String>,
}

fn default_source() -> NominationSource {
    NominationSource::Manual
}

// -- Votes --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CastVoteRequest {
    pub nomination_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NominationTally {
    pub nomination_id: Uuid,
    pub count: u32,
}

/// An open vote as seen by one caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteDetail {
    pub id: Uuid,
    pub status: VoteStatus,
    pub quorum: u32,
    pub timeout_at: DateTime<Utc>,
    pub total_voters: u32,
    pub tallies: Vec<NominationTally>,
    pub has_voted: bool,
}

// -- Sync --

#[derive(Debug, Deserialize)]
pub struct PollQuery {
    #[serde(default)]
    pub version: i64,
}

/// Full view of one gathering at a single version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub gathering: Gathering,
    pub participants: Vec<Participant>,
    pub nominations: Vec<Nomination>,
    pub active_vote: Option<VoteDetail>,
    /// Most recent messages, oldest first.
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub changed: bool,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}
