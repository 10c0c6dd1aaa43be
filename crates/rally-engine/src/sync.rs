//! Version-counter sync. Clients remember the last version they saw and ask
//! whether anything changed; a changed answer carries a full snapshot.

use std::collections::HashMap;

use rally_types::api::{NominationTally, PollResponse, Snapshot, VoteDetail};
use rally_types::models::{Gathering, GatheringStatus, Vote};
use tracing::warn;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::Result;

impl Engine {
    /// Returns `changed: false` when `known_version` is current, otherwise
    /// the full state. An expired vote seen here is settled first so the
    /// caller sees its outcome.
    pub async fn poll(&self, code: &str, user_id: Uuid, known_version: i64) -> Result<PollResponse> {
        let mut gathering = self.find_gathering(code)?;

        if gathering.status == GatheringStatus::Voting {
            match self.settle_if_expired(gathering.id, self.now()).await {
                Ok(Some(_)) => gathering = self.load_gathering(gathering.id)?,
                Ok(None) => {}
                Err(e) => warn!("Settling expired vote for {} during poll failed: {}", gathering.id, e),
            }
        }

        if gathering.version <= known_version {
            return Ok(PollResponse {
                changed: false,
                version: gathering.version,
                snapshot: None,
            });
        }

        let snapshot = self.snapshot_of(gathering, user_id)?;
        Ok(PollResponse {
            changed: true,
            version: snapshot.gathering.version,
            snapshot: Some(snapshot),
        })
    }

    /// Unconditional snapshot, for the first load of a gathering.
    pub async fn gathering_detail(&self, code: &str, user_id: Uuid) -> Result<Snapshot> {
        let response = self.poll(code, user_id, 0).await?;
        match response.snapshot {
            Some(snapshot) => Ok(snapshot),
            // Versions start at 1, so a poll from 0 always has a snapshot.
            None => {
                let gathering = self.find_gathering(code)?;
                self.snapshot_of(gathering, user_id)
            }
        }
    }

    pub fn my_gatherings(&self, user_id: Uuid) -> Result<Vec<Gathering>> {
        Ok(self.db.gatherings_for_user(user_id)?)
    }

    /// Builds a snapshot around an already loaded gathering. Everything else
    /// is read afterwards, so the snapshot is at least as new as
    /// `gathering.version`.
    fn snapshot_of(&self, gathering: Gathering, user_id: Uuid) -> Result<Snapshot> {
        let participants = self.db.participants_for_gathering(gathering.id)?;
        let nominations = self.db.nominations_for_gathering(gathering.id)?;
        let active_vote = match self.db.active_vote(gathering.id)? {
            Some(vote) => Some(self.vote_detail(&vote, user_id)?),
            None => None,
        };
        let messages = self.db.recent_messages(gathering.id, self.config.message_limit)?;

        Ok(Snapshot {
            gathering,
            participants,
            nominations,
            active_vote,
            messages,
        })
    }

    pub(crate) fn vote_detail(&self, vote: &Vote, user_id: Uuid) -> Result<VoteDetail> {
        let records = self.db.vote_records(vote.id)?;

        let mut counts: HashMap<Uuid, u32> = HashMap::new();
        for record in &records {
            *counts.entry(record.nomination_id).or_default() += 1;
        }
        let tallies = self
            .db
            .nominations_for_gathering(vote.gathering_id)?
            .into_iter()
            .map(|n| NominationTally {
                nomination_id: n.id,
                count: counts.get(&n.id).copied().unwrap_or(0),
            })
            .collect();

        Ok(VoteDetail {
            id: vote.id,
            status: vote.status,
            quorum: vote.quorum,
            timeout_at: vote.timeout_at,
            total_voters: records.len() as u32,
            tallies,
            has_voted: records.iter().any(|r| r.user_id == user_id),
        })
    }
}
