use anyhow::{Result, anyhow};
use rally_types::models::{Gathering, GatheringStatus, Message, Participant};
use rusqlite::Connection;
use rusqlite::types::ToSql;
use uuid::Uuid;

use crate::messages::{insert_message, record_change};
use crate::participants::insert_participant;
use crate::rows::{self, GATHERING_COLUMNS};
use crate::{Database, OptionalExt, UniqueExt};

impl Database {
    /// Inserts a gathering together with its creator's participant row and
    /// the opening message, leaving the version as given. Fails with
    /// [`crate::UniqueViolation`] if the invite code is taken.
    pub fn create_gathering(&self, gathering: &Gathering, creator: &Participant, created: &Message) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO gatherings (id, code, name, target_time, status, creator_id, version, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    gathering.id.to_string(),
                    gathering.code,
                    gathering.name,
                    gathering.target_time,
                    gathering.status.as_str(),
                    gathering.creator_id.to_string(),
                    gathering.version,
                    gathering.created_at,
                ],
            )
            .or_unique("gatherings")?;

            insert_participant(conn, creator)?;
            insert_message(conn, created)
        })
    }

    pub fn get_gathering(&self, id: Uuid) -> Result<Option<Gathering>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {GATHERING_COLUMNS} FROM gatherings WHERE id = ?1"),
                [id.to_string()],
                rows::gathering,
            )
            .optional()
        })
    }

    pub fn get_gathering_by_code(&self, code: &str) -> Result<Option<Gathering>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {GATHERING_COLUMNS} FROM gatherings WHERE code = ?1"),
                [code],
                rows::gathering,
            )
            .optional()
        })
    }

    pub fn code_exists(&self, code: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let exists = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM gatherings WHERE code = ?1)",
                [code],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Gatherings the user has a participant row in, newest first.
    pub fn gatherings_for_user(&self, user_id: Uuid) -> Result<Vec<Gathering>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.code, g.name, g.target_time, g.status, g.creator_id, g.version, g.created_at
                 FROM gatherings g
                 JOIN participants p ON p.gathering_id = g.id
                 WHERE p.user_id = ?1
                 ORDER BY g.created_at DESC",
            )?;
            let rows = stmt
                .query_map([user_id.to_string()], rows::gathering)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn gathering_ids_in_status(&self, statuses: &[GatheringStatus]) -> Result<Vec<Uuid>> {
        if statuses.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=statuses.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id FROM gatherings WHERE status IN ({}) ORDER BY created_at",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let names: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();
            let params: Vec<&dyn ToSql> = names.iter().map(|s| s as &dyn ToSql).collect();

            let ids = stmt
                .query_map(params.as_slice(), |row| rows::parsed::<Uuid>(row, 0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Moves the gathering to `to` only if its current status is one of
    /// `from`, appending `messages` and bumping the version in the same
    /// transaction. Returns the new version, or `None` if the status did not
    /// match and nothing was written.
    pub fn transition_gathering(
        &self,
        id: Uuid,
        from: &[GatheringStatus],
        to: GatheringStatus,
        messages: &[Message],
    ) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            if !transition_gathering(conn, id, from, to)? {
                return Ok(None);
            }
            record_change(conn, id, messages).map(Some)
        })
    }
}

/// Increments the gathering's version and returns the new value.
pub(crate) fn bump_version(conn: &Connection, id: Uuid) -> Result<i64> {
    conn.query_row(
        "UPDATE gatherings SET version = version + 1 WHERE id = ?1 RETURNING version",
        [id.to_string()],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| anyhow!("Gathering not found: {}", id))
}

pub(crate) fn transition_gathering(
    conn: &Connection,
    id: Uuid,
    from: &[GatheringStatus],
    to: GatheringStatus,
) -> Result<bool> {
    if from.is_empty() {
        return Ok(false);
    }

    let placeholders: Vec<String> = (3..from.len() + 3).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "UPDATE gatherings SET status = ?1 WHERE id = ?2 AND status IN ({})",
        placeholders.join(", ")
    );

    let id = id.to_string();
    let to = to.as_str();
    let names: Vec<&'static str> = from.iter().map(|s| s.as_str()).collect();
    let mut params: Vec<&dyn ToSql> = vec![&to, &id];
    params.extend(names.iter().map(|s| s as &dyn ToSql));

    let changed = conn.execute(&sql, params.as_slice())?;
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UniqueViolation;
    use crate::fixtures;

    #[test]
    fn create_and_fetch_by_code() {
        let db = Database::open_in_memory().unwrap();
        let g = fixtures::gathering("ABC234");
        let creator = fixtures::participant(&g, g.creator_id, true);
        db.create_gathering(&g, &creator, &fixtures::note(g.id, "created")).unwrap();

        let fetched = db.get_gathering_by_code("ABC234").unwrap().unwrap();
        assert_eq!(fetched.id, g.id);
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.status, GatheringStatus::Waiting);
        assert!(db.code_exists("ABC234").unwrap());
        assert!(db.get_gathering_by_code("ZZZZZZ").unwrap().is_none());

        let mine = db.gatherings_for_user(g.creator_id).unwrap();
        assert_eq!(mine.len(), 1);
    }

    fn seeded() -> (Database, Gathering) {
        let db = Database::open_in_memory().unwrap();
        let g = fixtures::gathering("ABC234");
        let creator = fixtures::participant(&g, g.creator_id, true);
        db.create_gathering(&g, &creator, &fixtures::note(g.id, "created")).unwrap();
        (db, g)
    }

    #[test]
    fn duplicate_code_is_a_unique_violation() {
        let (db, _g1) = seeded();

        let g2 = fixtures::gathering("ABC234");
        let creator = fixtures::participant(&g2, g2.creator_id, true);
        let err = db
            .create_gathering(&g2, &creator, &fixtures::note(g2.id, "created"))
            .unwrap_err();
        assert!(err.downcast_ref::<UniqueViolation>().is_some());
        // The creator row of the failed gathering must not leak.
        assert!(db.get_gathering(g2.id).unwrap().is_none());
    }

    #[test]
    fn bump_version_increments_by_one() {
        let (db, g) = seeded();

        assert_eq!(db.with_conn_mut(|conn| bump_version(conn, g.id)).unwrap(), 2);
        assert_eq!(db.with_conn_mut(|conn| bump_version(conn, g.id)).unwrap(), 3);
        assert!(db.with_conn_mut(|conn| bump_version(conn, Uuid::new_v4())).is_err());
    }

    #[test]
    fn transition_requires_expected_status() {
        let (db, g) = seeded();
        let opened = [fixtures::note(g.id, "open")];

        assert_eq!(
            db.transition_gathering(g.id, &[GatheringStatus::Nominating], GatheringStatus::Voting, &opened)
                .unwrap(),
            None
        );
        assert_eq!(
            db.transition_gathering(g.id, &[GatheringStatus::Waiting], GatheringStatus::Nominating, &opened)
                .unwrap(),
            Some(2)
        );
        // Second identical call loses the race and writes nothing.
        let again = [fixtures::note(g.id, "again")];
        assert_eq!(
            db.transition_gathering(g.id, &[GatheringStatus::Waiting], GatheringStatus::Nominating, &again)
                .unwrap(),
            None
        );
        let texts: Vec<_> = db.recent_messages(g.id, 10).unwrap().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["created", "open"]);

        let ids = db
            .gathering_ids_in_status(&[GatheringStatus::Nominating, GatheringStatus::Voting])
            .unwrap();
        assert_eq!(ids, vec![g.id]);
    }
}
