use anyhow::Result;
use chrono::{DateTime, Utc};
use rally_types::models::{
    GatheringStatus, Location, Message, Participant, ParticipantStatus, ReminderThreshold,
};
use rusqlite::Connection;
use uuid::Uuid;

use crate::gatherings::transition_gathering;
use crate::messages::record_change;
use crate::rows::{self, PARTICIPANT_COLUMNS};
use crate::{Database, OptionalExt, UniqueExt};

pub(crate) fn insert_participant(conn: &Connection, p: &Participant) -> Result<()> {
    conn.execute(
        "INSERT INTO participants (id, gathering_id, user_id, nickname, lng, lat, location_name,
             tastes, status, is_creator, joined_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            p.id.to_string(),
            p.gathering_id.to_string(),
            p.user_id.to_string(),
            p.nickname,
            p.location.map(|l| l.lng),
            p.location.map(|l| l.lat),
            p.location_name,
            serde_json::to_string(&p.tastes)?,
            p.status.as_str(),
            p.is_creator,
            p.joined_at,
        ],
    )
    .or_unique("participants")?;
    Ok(())
}

/// Result of [`Database::join_participant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined { version: i64 },
    Full,
    /// The gathering is no longer accepting participants.
    Closed,
}

/// What to write alongside a participant status change, decided from the
/// number of participants still behind.
#[derive(Debug, Default)]
pub struct Followup {
    /// Gathering transition `(from, to)`, applied only if the status matches.
    pub transition: Option<(&'static [GatheringStatus], GatheringStatus)>,
    pub messages: Vec<Message>,
}

/// Result of a successful [`Database::advance_participant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advanced {
    pub remaining: u32,
    /// Whether the follow-up transition was applied.
    pub transitioned: bool,
    pub version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeparturePlan {
    pub participant_id: Uuid,
    pub depart_at: DateTime<Utc>,
    pub duration_secs: u32,
    pub distance_m: u32,
}

/// A reminder to send. `message` is kept only if this claim is the one that
/// flips the `threshold` flag; `skipped` thresholds are marked without one.
#[derive(Debug, Clone)]
pub struct ReminderClaim {
    pub participant_id: Uuid,
    pub threshold: ReminderThreshold,
    pub skipped: Vec<ReminderThreshold>,
    pub message: Message,
}

fn reminder_column(threshold: ReminderThreshold) -> &'static str {
    match threshold {
        ReminderThreshold::ThirtyMinutes => "reminded_thirty",
        ReminderThreshold::TenMinutes => "reminded_ten",
        ReminderThreshold::Due => "reminded_due",
    }
}

impl Database {
    /// Adds a participant while the gathering is still waiting and holds
    /// fewer than `cap` people, recording `joined` with the version bump. A
    /// second row for the same user fails with [`crate::UniqueViolation`].
    pub fn join_participant(&self, participant: &Participant, cap: u32, joined: &Message) -> Result<JoinOutcome> {
        self.with_conn_mut(|conn| {
            let gathering_id = participant.gathering_id.to_string();
            let status: Option<String> = conn
                .query_row("SELECT status FROM gatherings WHERE id = ?1", [&gathering_id], |row| {
                    row.get(0)
                })
                .optional()?;
            if status.as_deref() != Some(GatheringStatus::Waiting.as_str()) {
                return Ok(JoinOutcome::Closed);
            }

            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM participants WHERE gathering_id = ?1",
                [&gathering_id],
                |row| row.get(0),
            )?;
            if count >= cap {
                return Ok(JoinOutcome::Full);
            }

            insert_participant(conn, participant)?;
            let version = record_change(conn, participant.gathering_id, std::slice::from_ref(joined))?;
            Ok(JoinOutcome::Joined { version })
        })
    }

    pub fn get_participant(&self, id: Uuid) -> Result<Option<Participant>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"),
                [id.to_string()],
                rows::participant,
            )
            .optional()
        })
    }

    pub fn participant_for_user(&self, gathering_id: Uuid, user_id: Uuid) -> Result<Option<Participant>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE gathering_id = ?1 AND user_id = ?2"
                ),
                [gathering_id.to_string(), user_id.to_string()],
                rows::participant,
            )
            .optional()
        })
    }

    /// Participants in join order.
    pub fn participants_for_gathering(&self, gathering_id: Uuid) -> Result<Vec<Participant>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE gathering_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([gathering_id.to_string()], rows::participant)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn count_participants(&self, gathering_id: Uuid) -> Result<u32> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM participants WHERE gathering_id = ?1",
                [gathering_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Moves a participant from `from` to `to`, stamping `departed_at` or
    /// `arrived_at`.
    ///
    /// Returns `None` if the participant was not in `from`. Otherwise `then`
    /// is handed the number of participants that have not yet reached `to`,
    /// counted in the same transaction so exactly one caller observes zero,
    /// and its follow-up is written before the version bump.
    pub fn advance_participant<F>(
        &self,
        id: Uuid,
        from: ParticipantStatus,
        to: ParticipantStatus,
        at: DateTime<Utc>,
        then: F,
    ) -> Result<Option<Advanced>>
    where
        F: FnOnce(u32) -> Followup,
    {
        let (stamp, behind) = match to {
            ParticipantStatus::Departed => ("departed_at", "status = 'joined'"),
            ParticipantStatus::Arrived => ("arrived_at", "status != 'arrived'"),
            ParticipantStatus::Joined => return Ok(None),
        };

        self.with_conn_mut(|conn| {
            let gathering_id: Option<String> = conn
                .query_row(
                    &format!(
                        "UPDATE participants SET status = ?1, {stamp} = ?2
                         WHERE id = ?3 AND status = ?4
                         RETURNING gathering_id"
                    ),
                    rusqlite::params![to.as_str(), at, id.to_string(), from.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(gathering_id) = gathering_id else {
                return Ok(None);
            };

            let remaining = conn.query_row(
                &format!("SELECT COUNT(*) FROM participants WHERE gathering_id = ?1 AND {behind}"),
                [&gathering_id],
                |row| row.get(0),
            )?;

            let gathering_id: Uuid = gathering_id.parse()?;
            let followup = then(remaining);
            let transitioned = match followup.transition {
                Some((from, to)) => transition_gathering(conn, gathering_id, from, to)?,
                None => false,
            };
            let version = record_change(conn, gathering_id, &followup.messages)?;
            Ok(Some(Advanced { remaining, transitioned, version }))
        })
    }

    /// Stores the participant's position and bumps the gathering's version.
    /// Returns `None` if there is no such participant.
    pub fn update_participant_location(
        &self,
        id: Uuid,
        location: Location,
        location_name: Option<&str>,
    ) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let gathering_id: Option<String> = conn
                .query_row(
                    "UPDATE participants SET lng = ?1, lat = ?2, location_name = ?3 WHERE id = ?4
                     RETURNING gathering_id",
                    rusqlite::params![location.lng, location.lat, location_name, id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(gathering_id) = gathering_id else {
                return Ok(None);
            };
            record_change(conn, gathering_id.parse()?, &[]).map(Some)
        })
    }

    /// Stores every plan and bumps the gathering's version once.
    pub fn set_departure_plans(&self, gathering_id: Uuid, plans: &[DeparturePlan]) -> Result<i64> {
        self.with_conn_mut(|conn| {
            for plan in plans {
                conn.execute(
                    "UPDATE participants
                     SET suggested_depart_at = ?1, estimated_duration = ?2, estimated_distance = ?3
                     WHERE id = ?4 AND gathering_id = ?5",
                    rusqlite::params![
                        plan.depart_at,
                        plan.duration_secs,
                        plan.distance_m,
                        plan.participant_id.to_string(),
                        gathering_id.to_string(),
                    ],
                )?;
            }
            record_change(conn, gathering_id, &[])
        })
    }

    /// Claims each reminder and appends the messages of the claims that
    /// flipped their flag, bumping the version once. Returns how many were
    /// sent and the new version, or `None` if every claim had already been
    /// taken. Any error undoes all flags and messages.
    pub fn record_reminders(&self, gathering_id: Uuid, claims: &[ReminderClaim]) -> Result<Option<(usize, i64)>> {
        self.with_conn_mut(|conn| {
            let mut sent = Vec::new();
            for claim in claims {
                if !claim_reminder(conn, gathering_id, claim.participant_id, claim.threshold)? {
                    continue;
                }
                for skipped in &claim.skipped {
                    claim_reminder(conn, gathering_id, claim.participant_id, *skipped)?;
                }
                sent.push(claim.message.clone());
            }

            if sent.is_empty() {
                return Ok(None);
            }
            let version = record_change(conn, gathering_id, &sent)?;
            Ok(Some((sent.len(), version)))
        })
    }
}

/// Flips a reminder flag. Returns `true` only for the call that flipped it.
fn claim_reminder(
    conn: &Connection,
    gathering_id: Uuid,
    participant_id: Uuid,
    threshold: ReminderThreshold,
) -> Result<bool> {
    let column = reminder_column(threshold);
    let changed = conn.execute(
        &format!("UPDATE participants SET {column} = 1 WHERE id = ?1 AND gathering_id = ?2 AND {column} = 0"),
        [participant_id.to_string(), gathering_id.to_string()],
    )?;
    Ok(changed == 1)
}
