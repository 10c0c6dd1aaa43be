pub mod gatherings;
pub mod messages;
pub mod migrations;
pub mod nominations;
pub mod participants;
mod rows;
pub mod votes;

pub use nominations::NominationOutcome;
pub use participants::{Advanced, DeparturePlan, Followup, JoinOutcome, ReminderClaim};

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Store for gatherings and everything hanging off them.
///
/// All access goes through one connection guarded by a mutex, so each
/// closure passed to [`Database::with_conn_mut`] runs without interleaving
/// with any other statement from this process.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        f(&conn)
    }

    /// Like [`Database::with_conn`], but wraps the closure in a transaction
    /// that commits only if the closure returns `Ok`.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
        let tx = conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// A write was rejected by a uniqueness constraint.
///
/// Returned inside `anyhow::Error`; callers detect it with
/// `err.downcast_ref::<UniqueViolation>()`.
#[derive(Debug, thiserror::Error)]
#[error("unique constraint violated on {table}")]
pub struct UniqueViolation {
    pub table: &'static str,
}

/// Maps SQLite uniqueness failures to [`UniqueViolation`].
pub(crate) trait UniqueExt<T> {
    fn or_unique(self, table: &'static str) -> Result<T>;
}

impl<T> UniqueExt<T> for std::result::Result<T, rusqlite::Error> {
    fn or_unique(self, table: &'static str) -> Result<T> {
        match self {
            Ok(val) => Ok(val),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(UniqueViolation { table }.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, Utc};
    use rally_types::models::{
        Gathering, GatheringStatus, Location, Message, MessagePayload, Nomination,
        NominationSource, Participant, ParticipantStatus, RemindersSent,
    };
    use uuid::Uuid;

    pub fn gathering(code: &str) -> Gathering {
        Gathering {
            id: Uuid::new_v4(),
            code: code.to_string(),
            name: "Friday dinner".into(),
            target_time: Utc::now() + Duration::hours(2),
            status: GatheringStatus::Waiting,
            creator_id: Uuid::new_v4(),
            version: 1,
            created_at: Utc::now(),
        }
    }

    pub fn participant(gathering: &Gathering, user_id: Uuid, is_creator: bool) -> Participant {
        Participant {
            id: Uuid::new_v4(),
            gathering_id: gathering.id,
            user_id,
            nickname: "Ana".into(),
            location: Some(Location { lng: 116.40, lat: 39.90 }),
            location_name: None,
            tastes: vec![],
            status: ParticipantStatus::Joined,
            is_creator,
            suggested_depart_at: None,
            estimated_duration: None,
            estimated_distance: None,
            departed_at: None,
            arrived_at: None,
            reminders_sent: RemindersSent::default(),
            joined_at: Utc::now(),
        }
    }

    pub fn nomination(participant: &Participant, place_id: &str) -> Nomination {
        Nomination {
            id: Uuid::new_v4(),
            gathering_id: participant.gathering_id,
            nominated_by: participant.id,
            place_id: place_id.to_string(),
            name: format!("Place {place_id}"),
            address: None,
            location: Location { lng: 116.41, lat: 39.91 },
            rating: Some(4.5),
            cost: Some(80.0),
            source: NominationSource::Manual,
            reason: None,
            score: 50,
            travel_infos: vec![],
            is_confirmed: false,
            created_at: Utc::now(),
        }
    }

    pub fn note(gathering_id: Uuid, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            gathering_id,
            sender_id: None,
            text: text.to_string(),
            payload: MessagePayload::NominatingStarted,
            created_at: Utc::now(),
        }
    }
}
