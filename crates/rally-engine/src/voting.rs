//! Nominations, votes and settlement.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use rally_db::NominationOutcome;
use rally_types::api::{NominateRequest, VoteDetail};
use rally_types::models::{
    GatheringStatus, Location, MessagePayload, Nomination, NominationSource, Participant,
    TravelInfo, Vote, VoteRecord, VoteStatus,
};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{Error, Result, map_unique};
use crate::scoring;
use crate::travel::estimate_or_fallback;
use crate::validation;

/// Picks the winning nomination: most votes, then highest score, then the
/// earliest created. Ties beyond that go to the first in `nominations`.
pub fn pick_winner<'a>(nominations: &'a [Nomination], records: &[VoteRecord]) -> Option<&'a Nomination> {
    let mut counts: HashMap<Uuid, u32> = HashMap::new();
    for record in records {
        *counts.entry(record.nomination_id).or_default() += 1;
    }

    nominations.iter().min_by_key(|n| {
        (
            Reverse(counts.get(&n.id).copied().unwrap_or(0)),
            Reverse(n.score),
            n.created_at,
        )
    })
}

impl Engine {
    /// Travel from every located participant to `destination`, estimated
    /// concurrently. Failed estimates fall back to straight-line figures.
    pub(crate) async fn travel_infos(&self, participants: &[Participant], destination: Location) -> Vec<TravelInfo> {
        let mode = self.config.route_mode;
        let estimates = participants
            .iter()
            .filter_map(|p| p.location.map(|origin| (p, origin)))
            .map(|(p, origin)| async move {
                let estimate = estimate_or_fallback(self.estimator.as_ref(), origin, destination, mode).await;
                TravelInfo {
                    participant_id: p.id,
                    nickname: p.nickname.clone(),
                    distance: estimate.distance,
                    duration: estimate.duration,
                }
            });
        join_all(estimates).await
    }

    pub async fn nominate(&self, code: &str, user_id: Uuid, req: NominateRequest) -> Result<Nomination> {
        validation::nomination(&req)?;

        let gathering = self.find_gathering(code)?;
        if gathering.status != GatheringStatus::Nominating {
            return Err(Error::invalid_state("Nominations are closed"));
        }
        let me = self.membership(&gathering, user_id)?;

        let existing = self.db.nominations_for_gathering(gathering.id)?;
        let mine: Vec<&Nomination> = existing.iter().filter(|n| n.nominated_by == me.id).collect();
        if mine.iter().any(|n| n.place_id == req.place_id) {
            return Err(Error::DuplicateNomination);
        }
        if mine.len() as u32 >= self.config.nomination_cap {
            return Err(Error::NominationLimit);
        }

        let participants = self.db.participants_for_gathering(gathering.id)?;
        let travel_infos = self.travel_infos(&participants, req.location).await;
        let score = scoring::score(&travel_infos, req.rating, req.cost);

        let nomination = Nomination {
            id: Uuid::new_v4(),
            gathering_id: gathering.id,
            nominated_by: me.id,
            place_id: req.place_id,
            name: req.name.trim().to_string(),
            address: req.address,
            location: req.location,
            rating: req.rating,
            cost: req.cost,
            source: req.source,
            reason: match req.source {
                NominationSource::Suggested => req.reason,
                NominationSource::Manual => None,
            },
            score,
            travel_infos,
            is_confirmed: false,
            created_at: self.now(),
        };

        let added = self.notice(
            gathering.id,
            Some(me.id),
            format!("{} nominated {}", me.nickname, nomination.name),
            MessagePayload::NominationAdded {
                nomination_id: nomination.id,
                name: nomination.name.clone(),
                nominated_by: me.id,
            },
        );
        let outcome = self
            .db
            .insert_nomination(&nomination, self.config.nomination_cap, &added)
            .map_err(|e| map_unique(e, "nominations", Error::DuplicateNomination))?;
        match outcome {
            NominationOutcome::Added { version } => self.announce(gathering.id, version),
            NominationOutcome::LimitReached => return Err(Error::NominationLimit),
            NominationOutcome::Closed => return Err(Error::invalid_state("Nominations are closed")),
        }

        info!(
            "Nomination {} ({}) added to gathering {} with score {}",
            nomination.id, nomination.name, gathering.id, nomination.score
        );
        Ok(nomination)
    }

    pub fn withdraw_nomination(&self, code: &str, user_id: Uuid, nomination_id: Uuid) -> Result<()> {
        let gathering = self.find_gathering(code)?;
        if gathering.status != GatheringStatus::Nominating {
            return Err(Error::invalid_state("Nominations are closed"));
        }
        let me = self.membership(&gathering, user_id)?;

        let nomination = self
            .db
            .get_nomination(nomination_id)?
            .filter(|n| n.gathering_id == gathering.id)
            .ok_or(Error::NotFound("Nomination"))?;
        if nomination.nominated_by != me.id {
            return Err(Error::NotProposer);
        }

        let withdrawn = self.notice(
            gathering.id,
            Some(me.id),
            format!("{} withdrew {}", me.nickname, nomination.name),
            MessagePayload::NominationWithdrawn {
                nomination_id: nomination.id,
                name: nomination.name,
            },
        );
        let Some(version) = self.db.delete_nomination(nomination.id, me.id, &withdrawn)? else {
            return Err(Error::invalid_state("Nominations are closed"));
        };
        self.announce(gathering.id, version);
        Ok(())
    }

    /// Opens a vote over the current nominations. Creator only. The quorum is
    /// the participant count at this moment.
    pub fn start_voting(&self, code: &str, user_id: Uuid) -> Result<Vote> {
        let gathering = self.find_gathering(code)?;
        let me = self.membership(&gathering, user_id)?;
        if !me.is_creator {
            return Err(Error::NotCreator);
        }
        match gathering.status {
            GatheringStatus::Nominating => {}
            GatheringStatus::Voting => return Err(Error::VoteInProgress),
            _ => return Err(Error::invalid_state("Voting can only start while nominating")),
        }

        let nominations = self.db.nominations_for_gathering(gathering.id)?;
        let places: HashSet<&str> = nominations.iter().map(|n| n.place_id.as_str()).collect();
        if places.len() < 2 {
            return Err(Error::TooFewNominations);
        }
        if self.db.active_vote(gathering.id)?.is_some() {
            return Err(Error::VoteInProgress);
        }

        let now = self.now();
        let vote = Vote {
            id: Uuid::new_v4(),
            gathering_id: gathering.id,
            status: VoteStatus::Active,
            quorum: self.db.count_participants(gathering.id)?,
            timeout_at: now + self.config.vote_timeout,
            winner_nomination_id: None,
            created_at: now,
            resolved_at: None,
        };

        let opened = self.notice(
            gathering.id,
            Some(me.id),
            format!("Voting has started: {} votes needed", vote.quorum),
            MessagePayload::VotingStarted {
                vote_id: vote.id,
                quorum: vote.quorum,
                timeout_at: vote.timeout_at,
            },
        );
        let Some(version) = self
            .db
            .start_vote(&vote, &opened)
            .map_err(|e| map_unique(e, "votes", Error::VoteInProgress))?
        else {
            return Err(Error::invalid_state("Voting can only start while nominating"));
        };
        self.announce(gathering.id, version);

        info!("Vote {} opened for gathering {} (quorum {})", vote.id, gathering.id, vote.quorum);
        Ok(vote)
    }

    /// Casts the caller's ballot. Reaching quorum settles the vote at once.
    /// A ballot arriving after the timeout settles the vote and is rejected.
    pub async fn cast_vote(&self, code: &str, user_id: Uuid, vote_id: Uuid, nomination_id: Uuid) -> Result<VoteDetail> {
        let gathering = self.find_gathering(code)?;
        self.membership(&gathering, user_id)?;

        let vote = self
            .db
            .get_vote(vote_id)?
            .filter(|v| v.gathering_id == gathering.id)
            .ok_or(Error::NotFound("Vote"))?;
        if vote.status != VoteStatus::Active {
            return Err(Error::VoteEnded);
        }
        let now = self.now();
        if vote.is_expired(now) {
            self.settle(vote.id, now).await?;
            return Err(Error::VoteEnded);
        }

        self.db
            .get_nomination(nomination_id)?
            .filter(|n| n.gathering_id == gathering.id)
            .ok_or(Error::InvalidNomination)?;

        let records = self.db.vote_records(vote.id)?;
        if records.iter().any(|r| r.user_id == user_id) {
            return Err(Error::AlreadyVoted);
        }

        let record = VoteRecord {
            id: Uuid::new_v4(),
            vote_id: vote.id,
            user_id,
            nomination_id,
            created_at: now,
        };
        let Some(version) = self
            .db
            .cast_ballot(&record)
            .map_err(|e| map_unique(e, "vote_records", Error::AlreadyVoted))?
        else {
            return Err(Error::VoteEnded);
        };
        self.announce(gathering.id, version);
        debug!("User {} voted on {} in vote {}", user_id, nomination_id, vote.id);

        if self.db.vote_records(vote.id)?.len() as u32 >= vote.quorum {
            self.settle(vote.id, now).await?;
        }

        let vote = self.db.get_vote(vote.id)?.ok_or(Error::NotFound("Vote"))?;
        self.vote_detail(&vote, user_id)
    }

    /// Resolves a vote if it is still active. Safe to call from any number of
    /// places at once: only the caller that claims the vote does the work and
    /// gets the winner back, everyone else gets `None`.
    ///
    /// The outcome, its notice and the version bump are one write. Departures
    /// are planned afterwards as their own change; the reminder scan fills in
    /// any plan missed here.
    pub(crate) async fn settle(&self, vote_id: Uuid, now: DateTime<Utc>) -> Result<Option<Nomination>> {
        let vote = self.db.get_vote(vote_id)?.ok_or(Error::NotFound("Vote"))?;
        if vote.status != VoteStatus::Active {
            return Ok(None);
        }

        let nominations = self.db.nominations_for_gathering(vote.gathering_id)?;
        let records = self.db.vote_records(vote.id)?;
        let Some(winner) = pick_winner(&nominations, &records).cloned() else {
            error!("Vote {} has no nominations to choose from", vote.id);
            return Ok(None);
        };
        let votes = records.iter().filter(|r| r.nomination_id == winner.id).count() as u32;

        let passed = self.notice(
            vote.gathering_id,
            None,
            format!("Vote passed! Confirmed venue: {}", winner.name),
            MessagePayload::VotePassed {
                vote_id: vote.id,
                winner_nomination_id: winner.id,
                winner_name: winner.name.clone(),
                votes,
            },
        );
        let Some(version) = self.db.resolve_vote(&vote, winner.id, now, &passed)? else {
            debug!("Vote {} was settled concurrently", vote.id);
            return Ok(None);
        };
        self.announce(vote.gathering_id, version);

        info!(
            "Vote {} settled: {} wins with {} of {} ballots",
            vote.id,
            winner.name,
            votes,
            records.len()
        );

        let gathering = self.load_gathering(vote.gathering_id)?;
        if let Err(e) = self.plan_departures(&gathering, &winner).await {
            error!("Failed to plan departures for gathering {}: {}", gathering.id, e);
        }
        Ok(Some(winner))
    }

    /// Settles the gathering's active vote if its timeout has passed.
    pub(crate) async fn settle_if_expired(&self, gathering_id: Uuid, now: DateTime<Utc>) -> Result<Option<Nomination>> {
        match self.db.active_vote(gathering_id)? {
            Some(vote) if vote.is_expired(now) => self.settle(vote.id, now).await,
            _ => Ok(None),
        }
    }
}
