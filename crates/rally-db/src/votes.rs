use anyhow::Result;
use chrono::{DateTime, Utc};
use rally_types::models::{GatheringStatus, Message, Vote, VoteRecord, VoteStatus};
use uuid::Uuid;

use crate::gatherings::transition_gathering;
use crate::messages::record_change;
use crate::nominations::confirm_nomination;
use crate::rows::{self, VOTE_COLUMNS, VOTE_RECORD_COLUMNS};
use crate::{Database, OptionalExt, UniqueExt};

impl Database {
    /// Opens a vote, moves the gathering from nominating to voting and
    /// records `opened` in one transaction. Returns `None` if the gathering
    /// was not nominating; a second active vote fails with
    /// [`crate::UniqueViolation`].
    pub fn start_vote(&self, vote: &Vote, opened: &Message) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            if !transition_gathering(
                conn,
                vote.gathering_id,
                &[GatheringStatus::Nominating],
                GatheringStatus::Voting,
            )? {
                return Ok(None);
            }

            conn.execute(
                "INSERT INTO votes (id, gathering_id, status, quorum, timeout_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    vote.id.to_string(),
                    vote.gathering_id.to_string(),
                    vote.status.as_str(),
                    vote.quorum,
                    vote.timeout_at,
                    vote.created_at,
                ],
            )
            .or_unique("votes")?;
            record_change(conn, vote.gathering_id, std::slice::from_ref(opened)).map(Some)
        })
    }

    pub fn get_vote(&self, id: Uuid) -> Result<Option<Vote>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {VOTE_COLUMNS} FROM votes WHERE id = ?1"),
                [id.to_string()],
                rows::vote,
            )
            .optional()
        })
    }

    pub fn active_vote(&self, gathering_id: Uuid) -> Result<Option<Vote>> {
        self.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {VOTE_COLUMNS} FROM votes WHERE gathering_id = ?1 AND status = ?2"),
                [gathering_id.to_string(), VoteStatus::Active.as_str().to_string()],
                rows::vote,
            )
            .optional()
        })
    }

    /// Records a ballot while the vote is still active and bumps the
    /// gathering's version. Returns `None` if the vote has already been
    /// resolved; a second ballot from the same user fails with
    /// [`crate::UniqueViolation`].
    pub fn cast_ballot(&self, record: &VoteRecord) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let gathering_id: Option<String> = conn
                .query_row(
                    "SELECT gathering_id FROM votes WHERE id = ?1 AND status = ?2",
                    [record.vote_id.to_string(), VoteStatus::Active.as_str().to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(gathering_id) = gathering_id else {
                return Ok(None);
            };

            conn.execute(
                "INSERT INTO vote_records (id, vote_id, user_id, nomination_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.id.to_string(),
                    record.vote_id.to_string(),
                    record.user_id.to_string(),
                    record.nomination_id.to_string(),
                    record.created_at,
                ],
            )
            .or_unique("vote_records")?;
            record_change(conn, gathering_id.parse()?, &[]).map(Some)
        })
    }

    /// Ballots in the order they were cast.
    pub fn vote_records(&self, vote_id: Uuid) -> Result<Vec<VoteRecord>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VOTE_RECORD_COLUMNS} FROM vote_records WHERE vote_id = ?1 ORDER BY rowid"
            ))?;
            let rows = stmt
                .query_map([vote_id.to_string()], rows::vote_record)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Closes an active vote: records the winner, confirms the nomination,
    /// moves the gathering to confirmed and records `passed`, all in one
    /// transaction. Only the first caller succeeds and gets the new version;
    /// later callers get `None` and nothing changes.
    pub fn resolve_vote(
        &self,
        vote: &Vote,
        winner_nomination_id: Uuid,
        at: DateTime<Utc>,
        passed: &Message,
    ) -> Result<Option<i64>> {
        self.with_conn_mut(|conn| {
            let claimed = conn.execute(
                "UPDATE votes SET status = ?1, winner_nomination_id = ?2, resolved_at = ?3
                 WHERE id = ?4 AND status = ?5",
                rusqlite::params![
                    VoteStatus::Resolved.as_str(),
                    winner_nomination_id.to_string(),
                    at,
                    vote.id.to_string(),
                    VoteStatus::Active.as_str(),
                ],
            )?;
            if claimed == 0 {
                return Ok(None);
            }

            confirm_nomination(conn, vote.gathering_id, winner_nomination_id)?;
            transition_gathering(
                conn,
                vote.gathering_id,
                &[GatheringStatus::Voting],
                GatheringStatus::Confirmed,
            )?;
            record_change(conn, vote.gathering_id, std::slice::from_ref(passed)).map(Some)
        })
    }
}
