//! Row decoding. Ids are stored as TEXT, statuses as their string names and
//! nested collections as JSON.

use std::str::FromStr;

use rally_types::models::{
    Gathering, Location, Message, Nomination, Participant, RemindersSent, Vote, VoteRecord,
};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

pub(crate) const GATHERING_COLUMNS: &str =
    "id, code, name, target_time, status, creator_id, version, created_at";

pub(crate) const PARTICIPANT_COLUMNS: &str = "id, gathering_id, user_id, nickname, lng, lat, \
     location_name, tastes, status, is_creator, suggested_depart_at, estimated_duration, \
     estimated_distance, departed_at, arrived_at, reminded_thirty, reminded_ten, reminded_due, \
     joined_at";

pub(crate) const NOMINATION_COLUMNS: &str = "id, gathering_id, nominated_by, place_id, name, \
     address, lng, lat, rating, cost, source, reason, score, travel_infos, is_confirmed, created_at";

pub(crate) const VOTE_COLUMNS: &str =
    "id, gathering_id, status, quorum, timeout_at, winner_nomination_id, created_at, resolved_at";

pub(crate) const VOTE_RECORD_COLUMNS: &str = "id, vote_id, user_id, nomination_id, created_at";

pub(crate) const MESSAGE_COLUMNS: &str = "id, gathering_id, sender_id, text, metadata, created_at";

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Reads a TEXT column and parses it (uuids, status names).
pub(crate) fn parsed<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn parsed_opt<T>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match row.get::<_, Option<String>>(idx)? {
        Some(raw) => raw.parse().map(Some).map_err(|e| conversion_error(idx, e)),
        None => Ok(None),
    }
}

fn json<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, e))
}

pub(crate) fn gathering(row: &Row) -> rusqlite::Result<Gathering> {
    Ok(Gathering {
        id: parsed(row, 0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        target_time: row.get(3)?,
        status: parsed(row, 4)?,
        creator_id: parsed(row, 5)?,
        version: row.get(6)?,
        created_at: row.get(7)?,
    })
}

pub(crate) fn participant(row: &Row) -> rusqlite::Result<Participant> {
    let lng: Option<f64> = row.get(4)?;
    let lat: Option<f64> = row.get(5)?;

    Ok(Participant {
        id: parsed(row, 0)?,
        gathering_id: parsed(row, 1)?,
        user_id: parsed(row, 2)?,
        nickname: row.get(3)?,
        location: lng.zip(lat).map(|(lng, lat)| Location { lng, lat }),
        location_name: row.get(6)?,
        tastes: json(row, 7)?,
        status: parsed(row, 8)?,
        is_creator: row.get(9)?,
        suggested_depart_at: row.get(10)?,
        estimated_duration: row.get(11)?,
        estimated_distance: row.get(12)?,
        departed_at: row.get(13)?,
        arrived_at: row.get(14)?,
        reminders_sent: RemindersSent {
            thirty_minutes: row.get(15)?,
            ten_minutes: row.get(16)?,
            due: row.get(17)?,
        },
        joined_at: row.get(18)?,
    })
}

pub(crate) fn nomination(row: &Row) -> rusqlite::Result<Nomination> {
    Ok(Nomination {
        id: parsed(row, 0)?,
        gathering_id: parsed(row, 1)?,
        nominated_by: parsed(row, 2)?,
        place_id: row.get(3)?,
        name: row.get(4)?,
        address: row.get(5)?,
        location: Location {
            lng: row.get(6)?,
            lat: row.get(7)?,
        },
        rating: row.get(8)?,
        cost: row.get(9)?,
        source: parsed(row, 10)?,
        reason: row.get(11)?,
        score: row.get(12)?,
        travel_infos: json(row, 13)?,
        is_confirmed: row.get(14)?,
        created_at: row.get(15)?,
    })
}

pub(crate) fn vote(row: &Row) -> rusqlite::Result<Vote> {
    Ok(Vote {
        id: parsed(row, 0)?,
        gathering_id: parsed(row, 1)?,
        status: parsed(row, 2)?,
        quorum: row.get(3)?,
        timeout_at: row.get(4)?,
        winner_nomination_id: parsed_opt(row, 5)?,
        created_at: row.get(6)?,
        resolved_at: row.get(7)?,
    })
}

pub(crate) fn vote_record(row: &Row) -> rusqlite::Result<VoteRecord> {
    Ok(VoteRecord {
        id: parsed(row, 0)?,
        vote_id: parsed(row, 1)?,
        user_id: parsed(row, 2)?,
        nomination_id: parsed(row, 3)?,
        created_at: row.get(4)?,
    })
}

pub(crate) fn message(row: &Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parsed(row, 0)?,
        gathering_id: parsed(row, 1)?,
        sender_id: parsed_opt(row, 2)?,
        text: row.get(3)?,
        payload: json(row, 4)?,
        created_at: row.get(5)?,
    })
}
