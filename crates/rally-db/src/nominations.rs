use anyhow::Result;
use rally_types::models::{GatheringStatus, Message, Nomination};
use rusqlite::Connection;
use uuid::Uuid;

use crate::messages::record_change;
use crate::rows::{self, NOMINATION_COLUMNS};
use crate::{Database, OptionalExt, UniqueExt};

/// Result of [`Database::insert_nomination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NominationOutcome {
    Added { version: i64 },
    LimitReached,
    /// The gathering is not taking nominations.
    Closed,
}

impl Database {
    /// Inserts a nomination while the gathering is nominating and the
    /// proposer holds fewer than `cap` of them, recording `added` with the
    /// version bump. Proposing the same place twice fails with
    /// [`crate::UniqueViolation`].
    pub fn insert_nomination(&self, nomination: &Nomination, cap: u32, added: &Message) -> Result<NominationOutcome> {
        self.with_conn_mut(|conn| {
            let status: Option<String> = conn
                .query_row(
                    "SELECT status FROM gatherings WHERE id = ?1",
                    [nomination.gathering_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            if status.as_deref() != Some(GatheringStatus::Nominating.as_str()) {
                return Ok(NominationOutcome::Closed);
            }

            let count: u32 = conn.query_row(
                "SELECT COUNT(*) FROM nominations WHERE gathering_id = ?1 AND nominated_by = ?2",
                [
                    nomination.gathering_id.to_string(),
                    nomination.nominated_by.to_string(),
                ],
                |row| row.get(0),
            )?;
            if count >= cap {
                return Ok(NominationOutcome::LimitReached);
            }

            conn.execute(
                "INSERT INTO nominations (id, gathering_id, nominated_by, place_id, name, address,
                     lng, lat, rating, cost, source, reason, score, travel_infos, is_confirmed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                rusqlite::params![
                    nomination.id.to_string(),
                    nomination.gathering_id.to_string(),
                    nomination.nominated_by.to_string(),
                    nomination.place_id,
                    nomination.name,
                    nomination.address,
                    nomination.location.lng,
                    nomination.location.lat,
                    nomination.rating,
                    nomination.cost,
                    nomination.source.as_str(),
                    nomination.reason,
                    nomination.score,
                    serde_json::to_string(&nomination.travel_infos)?,
                    nomination.is_confirmed,
                    nomination.created_at,
                ],
            )
            .or_unique("nominations")?;
            let version = record_change(conn, nomination.gathering_id, std::slice::from_ref(added))?;
            Ok(NominationOutcome::Added { version })
        })
    }

    pub fn get_nomination(&self, id: Uuid) -> Result<Option<Nomination>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {NOMINATION_COLUMNS} FROM nominations WHERE id = ?1"),
                [id.to_string()],
                rows::nomination,
            )
            .optional()
        })
    }

    /// Nominations in the order they were made.
    pub fn nominations_for_gathering(&self, gathering_id: Uuid) -> Result<Vec<Nomination>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {NOMINATION_COLUMNS} FROM nominations WHERE gathering_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([gathering_id.to_string()], rows::nomination)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Removes a nomination if it belongs to `nominated_by` and its gathering
    /// is still nominating, recording `withdrawn`. Returns the new version, or
    /// `None` if nothing was removed.
    pub fn delete_nomination(&self, id: Uuid, nominated_by: Uuid, withdrawn: &Message) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute(
                "DELETE FROM nominations
                 WHERE id = ?1 AND nominated_by = ?2
                   AND EXISTS (SELECT 1 FROM gatherings g
                               WHERE g.id = nominations.gathering_id AND g.status = ?3)",
                [
                    id.to_string(),
                    nominated_by.to_string(),
                    GatheringStatus::Nominating.as_str().to_string(),
                ],
            )?;
            if deleted == 0 {
                return Ok(None);
            }
            record_change(conn, withdrawn.gathering_id, std::slice::from_ref(withdrawn)).map(Some)
        })
    }
}

/// Flags `nomination_id` as the gathering's chosen venue.
pub(crate) fn confirm_nomination(conn: &Connection, gathering_id: Uuid, nomination_id: Uuid) -> Result<()> {
    conn.execute(
        "UPDATE nominations SET is_confirmed = 0 WHERE gathering_id = ?1 AND is_confirmed = 1",
        [gathering_id.to_string()],
    )?;
    conn.execute(
        "UPDATE nominations SET is_confirmed = 1 WHERE id = ?1 AND gathering_id = ?2",
        [nomination_id.to_string(), gathering_id.to_string()],
    )
    .or_unique("nominations")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UniqueViolation;
    use crate::fixtures::{self, note};
    use rally_types::models::{Gathering, Participant};

    fn seeded() -> (Database, Gathering, Participant) {
        let db = Database::open_in_memory().unwrap();
        let g = fixtures::gathering("ABC234");
        let creator = fixtures::participant(&g, g.creator_id, true);
        db.create_gathering(&g, &creator, &note(g.id, "created")).unwrap();
        (db, g, creator)
    }

    fn nominating() -> (Database, Gathering, Participant) {
        let (db, g, creator) = seeded();
        db.transition_gathering(g.id, &[GatheringStatus::Waiting], GatheringStatus::Nominating, &[])
            .unwrap();
        (db, g, creator)
    }

    fn propose(db: &Database, n: &Nomination) -> Result<NominationOutcome> {
        db.insert_nomination(n, 2, &note(n.gathering_id, &format!("nominated {}", n.place_id)))
    }

    #[test]
    fn proposer_cap_and_duplicate_place() {
        let (db, g, creator) = nominating();

        assert_eq!(
            propose(&db, &fixtures::nomination(&creator, "p1")).unwrap(),
            NominationOutcome::Added { version: 3 }
        );

        let err = propose(&db, &fixtures::nomination(&creator, "p1")).unwrap_err();
        assert!(err.downcast_ref::<UniqueViolation>().is_some());

        assert_eq!(
            propose(&db, &fixtures::nomination(&creator, "p2")).unwrap(),
            NominationOutcome::Added { version: 4 }
        );
        assert_eq!(
            propose(&db, &fixtures::nomination(&creator, "p3")).unwrap(),
            NominationOutcome::LimitReached
        );

        let all = db.nominations_for_gathering(g.id).unwrap();
        let places: Vec<_> = all.iter().map(|n| n.place_id.as_str()).collect();
        assert_eq!(places, vec!["p1", "p2"]);
        assert_eq!(all[0].rating, Some(4.5));

        // Rejected proposals leave no notice behind.
        let texts: Vec<_> = db.recent_messages(g.id, 10).unwrap().into_iter().map(|m| m.text).collect();
        assert_eq!(texts, vec!["created", "nominated p1", "nominated p2"]);
    }

    #[test]
    fn nominations_need_the_nominating_phase() {
        let (db, _g, creator) = seeded();

        assert_eq!(
            propose(&db, &fixtures::nomination(&creator, "p1")).unwrap(),
            NominationOutcome::Closed
        );
    }

    #[test]
    fn only_the_proposer_can_delete() {
        let (db, g, creator) = seeded();
        let other = fixtures::participant(&g, Uuid::new_v4(), false);
        db.join_participant(&other, 10, &note(g.id, "joined")).unwrap();
        db.transition_gathering(g.id, &[GatheringStatus::Waiting], GatheringStatus::Nominating, &[])
            .unwrap();

        let n = fixtures::nomination(&creator, "p1");
        propose(&db, &n).unwrap();

        let withdrawn = note(g.id, "withdrawn");
        assert_eq!(db.delete_nomination(n.id, other.id, &withdrawn).unwrap(), None);
        assert_eq!(db.delete_nomination(n.id, creator.id, &withdrawn).unwrap(), Some(5));
        assert!(db.get_nomination(n.id).unwrap().is_none());

        let kept = fixtures::nomination(&creator, "p2");
        propose(&db, &kept).unwrap();
        db.transition_gathering(g.id, &[GatheringStatus::Nominating], GatheringStatus::Voting, &[])
            .unwrap();
        assert_eq!(db.delete_nomination(kept.id, creator.id, &note(g.id, "late")).unwrap(), None);
    }
}
