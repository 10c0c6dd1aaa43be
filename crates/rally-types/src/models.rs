use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error returned when a stored status string does not name a known variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

// -- Statuses --

/// Lifecycle of a gathering. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatheringStatus {
    Waiting,
    Nominating,
    Voting,
    Confirmed,
    Departing,
    Completed,
}

string_enum!(GatheringStatus, "gathering status", {
    Waiting => "waiting",
    Nominating => "nominating",
    Voting => "voting",
    Confirmed => "confirmed",
    Departing => "departing",
    Completed => "completed",
});

impl GatheringStatus {
    /// Statuses in which participants are on their way (or about to be).
    pub const EN_ROUTE: [GatheringStatus; 2] = [GatheringStatus::Confirmed, GatheringStatus::Departing];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Joined,
    Departed,
    Arrived,
}

string_enum!(ParticipantStatus, "participant status", {
    Joined => "joined",
    Departed => "departed",
    Arrived => "arrived",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Active,
    Resolved,
}

string_enum!(VoteStatus, "vote status", {
    Active => "active",
    Resolved => "resolved",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NominationSource {
    Manual,
    Suggested,
}

string_enum!(NominationSource, "nomination source", {
    Manual => "manual",
    Suggested => "suggested",
});

/// How a participant travels; selects the routing profile and fallback speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelMode {
    Transit,
    Driving,
    Walking,
}

string_enum!(TravelMode, "travel mode", {
    Transit => "transit",
    Driving => "driving",
    Walking => "walking",
});

impl TravelMode {
    /// Average door-to-door speed used when no routing provider answers.
    pub fn fallback_speed_kmh(&self) -> f64 {
        match self {
            Self::Transit => 25.0,
            Self::Driving => 35.0,
            Self::Walking => 5.0,
        }
    }
}

/// Departure nudges, from the earliest warning to the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderThreshold {
    ThirtyMinutes,
    TenMinutes,
    Due,
}

string_enum!(ReminderThreshold, "reminder threshold", {
    ThirtyMinutes => "thirty_minutes",
    TenMinutes => "ten_minutes",
    Due => "due",
});

impl ReminderThreshold {
    pub const ALL: [ReminderThreshold; 3] = [Self::ThirtyMinutes, Self::TenMinutes, Self::Due];

    /// How long before the suggested departure time this nudge fires.
    pub fn lead(&self) -> Duration {
        match self {
            Self::ThirtyMinutes => Duration::minutes(30),
            Self::TenMinutes => Duration::minutes(10),
            Self::Due => Duration::zero(),
        }
    }
}

// -- Geography --

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lng: f64,
    pub lat: f64,
}

/// One participant's trip to a nominated place, captured at nomination time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TravelInfo {
    pub participant_id: Uuid,
    pub nickname: String,
    /// Meters.
    pub distance: u32,
    /// Seconds.
    pub duration: u32,
}

// -- Entities --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gathering {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub target_time: DateTime<Utc>,
    pub status: GatheringStatus,
    pub creator_id: Uuid,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

/// Which departure nudges a participant has already received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemindersSent {
    pub thirty_minutes: bool,
    pub ten_minutes: bool,
    pub due: bool,
}

impl RemindersSent {
    pub fn is_sent(&self, threshold: ReminderThreshold) -> bool {
        match threshold {
            ReminderThreshold::ThirtyMinutes => self.thirty_minutes,
            ReminderThreshold::TenMinutes => self.ten_minutes,
            ReminderThreshold::Due => self.due,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub gathering_id: Uuid,
    pub user_id: Uuid,
    pub nickname: String,
    pub location: Option<Location>,
    pub location_name: Option<String>,
    pub tastes: Vec<String>,
    pub status: ParticipantStatus,
    pub is_creator: bool,
    pub suggested_depart_at: Option<DateTime<Utc>>,
    /// Seconds.
    pub estimated_duration: Option<u32>,
    /// Meters.
    pub estimated_distance: Option<u32>,
    pub departed_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub reminders_sent: RemindersSent,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Nomination {
    pub id: Uuid,
    pub gathering_id: Uuid,
    /// Participant id of the proposer.
    pub nominated_by: Uuid,
    /// Identifier of the place at the POI provider.
    pub place_id: String,
    pub name: String,
    pub address: Option<String>,
    pub location: Location,
    pub rating: Option<f64>,
    /// Average spend per person.
    pub cost: Option<f64>,
    pub source: NominationSource,
    pub reason: Option<String>,
    /// Tie-break score, 0..=100.
    pub score: u32,
    pub travel_infos: Vec<TravelInfo>,
    pub is_confirmed: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: Uuid,
    pub gathering_id: Uuid,
    pub status: VoteStatus,
    /// Participant count captured when the vote opened.
    pub quorum: u32,
    pub timeout_at: DateTime<Utc>,
    pub winner_nomination_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Vote {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.timeout_at <= now
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub id: Uuid,
    pub vote_id: Uuid,
    pub user_id: Uuid,
    pub nomination_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// -- Messages --

/// Structured body of a gathering message. The variant is the message type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "metadata", rename_all = "snake_case")]
pub enum MessagePayload {
    GatheringCreated {
        creator_nickname: String,
    },
    ParticipantJoined {
        participant_id: Uuid,
        nickname: String,
    },
    NominatingStarted,
    NominationAdded {
        nomination_id: Uuid,
        name: String,
        nominated_by: Uuid,
    },
    NominationWithdrawn {
        nomination_id: Uuid,
        name: String,
    },
    VotingStarted {
        vote_id: Uuid,
        quorum: u32,
        timeout_at: DateTime<Utc>,
    },
    VotePassed {
        vote_id: Uuid,
        winner_nomination_id: Uuid,
        winner_name: String,
        votes: u32,
    },
    Departed {
        participant_id: Uuid,
        nickname: String,
    },
    Arrived {
        participant_id: Uuid,
        nickname: String,
    },
    AllDeparted,
    AllArrived,
    Reminder {
        participant_id: Uuid,
        threshold: ReminderThreshold,
        depart_at: DateTime<Utc>,
        overdue: bool,
    },
}

impl MessagePayload {
    /// Stable name of the message type, stored alongside the metadata.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::GatheringCreated { .. } => "gathering_created",
            Self::ParticipantJoined { .. } => "participant_joined",
            Self::NominatingStarted => "nominating_started",
            Self::NominationAdded { .. } => "nomination_added",
            Self::NominationWithdrawn { .. } => "nomination_withdrawn",
            Self::VotingStarted { .. } => "voting_started",
            Self::VotePassed { .. } => "vote_passed",
            Self::Departed { .. } => "departed",
            Self::Arrived { .. } => "arrived",
            Self::AllDeparted => "all_departed",
            Self::AllArrived => "all_arrived",
            Self::Reminder { .. } => "reminder",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub gathering_id: Uuid,
    /// Participant that caused the message; `None` for system notices.
    pub sender_id: Option<Uuid>,
    pub text: String,
    #[serde(flatten)]
    pub payload: MessagePayload,
    pub created_at: DateTime<Utc>,
}
