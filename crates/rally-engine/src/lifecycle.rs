//! Gathering lifecycle: creation, joining, the move to nominating, and the
//! depart/arrive milestones that end a gathering.

use chrono::{DateTime, Utc};
use rally_db::{Followup, JoinOutcome, UniqueViolation};
use rally_types::api::{CreateGatheringRequest, JoinGatheringRequest, UpdateLocationRequest};
use rally_types::models::{
    Gathering, GatheringStatus, MessagePayload, Participant, ParticipantStatus, RemindersSent,
};
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::{Error, Result, map_unique};
use crate::invite;
use crate::validation;

const CODE_ATTEMPTS: usize = 5;

const CONFIRMED: &[GatheringStatus] = &[GatheringStatus::Confirmed];
const EN_ROUTE: &[GatheringStatus] = &GatheringStatus::EN_ROUTE;

fn new_participant(
    gathering: &Gathering,
    user_id: Uuid,
    nickname: String,
    is_creator: bool,
    joined_at: DateTime<Utc>,
) -> Participant {
    Participant {
        id: Uuid::new_v4(),
        gathering_id: gathering.id,
        user_id,
        nickname,
        location: None,
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
        joined_at,
    }
}

impl Engine {
    /// Creates a gathering with the caller as its creator and first
    /// participant. The gathering starts in `waiting` at version 1.
    pub fn create_gathering(&self, user_id: Uuid, req: CreateGatheringRequest) -> Result<Gathering> {
        let name = validation::gathering_name(&req.name)?;
        let nickname = validation::nickname(&req.creator_nickname)?;
        validation::tastes(&req.creator_tastes)?;
        if let Some(loc) = &req.creator_location {
            validation::location(loc)?;
        }

        let now = self.now();
        if req.target_time <= now {
            return Err(Error::InvalidInput("Target time must be in the future".into()));
        }

        for _ in 0..CODE_ATTEMPTS {
            let code = invite::generate_invite_code();
            if self.db.code_exists(&code)? {
                continue;
            }

            let gathering = Gathering {
                id: Uuid::new_v4(),
                code,
                name: name.clone(),
                target_time: req.target_time,
                status: GatheringStatus::Waiting,
                creator_id: user_id,
                version: 1,
                created_at: now,
            };
            let creator = Participant {
                location: req.creator_location,
                location_name: req.creator_location_name.clone(),
                tastes: req.creator_tastes.clone(),
                ..new_participant(&gathering, user_id, nickname.clone(), true, now)
            };

            // Part of the initial state, so it does not bump the version.
            let created = self.notice(
                gathering.id,
                Some(creator.id),
                format!("{} created the gathering \"{}\"", nickname, gathering.name),
                MessagePayload::GatheringCreated { creator_nickname: nickname.clone() },
            );
            if let Err(e) = self.db.create_gathering(&gathering, &creator, &created) {
                // Lost a race for the code; try another.
                if e.downcast_ref::<UniqueViolation>().is_some() {
                    continue;
                }
                return Err(e.into());
            }

            info!("Gathering {} created by {} (code {})", gathering.id, user_id, gathering.code);
            return Ok(gathering);
        }

        Err(Error::Storage(anyhow::anyhow!(
            "Could not allocate a unique invite code after {} attempts",
            CODE_ATTEMPTS
        )))
    }

    pub fn join_gathering(&self, code: &str, user_id: Uuid, req: JoinGatheringRequest) -> Result<Participant> {
        let nickname = validation::nickname(&req.nickname)?;
        validation::tastes(&req.tastes)?;
        if let Some(loc) = &req.location {
            validation::location(loc)?;
        }

        let gathering = self.find_gathering(code)?;
        if gathering.status != GatheringStatus::Waiting {
            return Err(Error::invalid_state("Gathering is no longer accepting participants"));
        }
        if self.db.participant_for_user(gathering.id, user_id)?.is_some() {
            return Err(Error::AlreadyJoined);
        }

        let participant = Participant {
            location: req.location,
            location_name: req.location_name,
            tastes: req.tastes,
            ..new_participant(&gathering, user_id, nickname, false, self.now())
        };

        let joined = self.notice(
            gathering.id,
            Some(participant.id),
            format!("{} joined", participant.nickname),
            MessagePayload::ParticipantJoined {
                participant_id: participant.id,
                nickname: participant.nickname.clone(),
            },
        );
        let outcome = self
            .db
            .join_participant(&participant, self.config.participant_cap, &joined)
            .map_err(|e| map_unique(e, "participants", Error::AlreadyJoined))?;
        match outcome {
            JoinOutcome::Joined { version } => self.announce(gathering.id, version),
            JoinOutcome::Full => return Err(Error::GatheringFull),
            JoinOutcome::Closed => {
                return Err(Error::invalid_state("Gathering is no longer accepting participants"));
            }
        }

        info!("User {} joined gathering {}", user_id, gathering.id);
        Ok(participant)
    }

    /// Opens nominations. Creator only, with at least two participants.
    pub fn start_nominating(&self, code: &str, user_id: Uuid) -> Result<Gathering> {
        let gathering = self.find_gathering(code)?;
        let me = self.membership(&gathering, user_id)?;
        if !me.is_creator {
            return Err(Error::NotCreator);
        }
        if gathering.status != GatheringStatus::Waiting {
            return Err(Error::invalid_state("Nominating can only start from waiting"));
        }
        if self.db.count_participants(gathering.id)? < 2 {
            return Err(Error::TooFewParticipants);
        }

        let started = self.notice(
            gathering.id,
            Some(me.id),
            format!(
                "Nominations are open: propose up to {} places each",
                self.config.nomination_cap
            ),
            MessagePayload::NominatingStarted,
        );
        let Some(version) = self.db.transition_gathering(
            gathering.id,
            &[GatheringStatus::Waiting],
            GatheringStatus::Nominating,
            &[started],
        )?
        else {
            return Err(Error::invalid_state("Nominating can only start from waiting"));
        };
        self.announce(gathering.id, version);

        info!("Gathering {} is nominating", gathering.id);
        self.load_gathering(gathering.id)
    }

    /// Marks the caller as on their way. The first departure moves the
    /// gathering from confirmed to departing.
    pub fn depart(&self, code: &str, user_id: Uuid) -> Result<Participant> {
        let gathering = self.find_gathering(code)?;
        if !GatheringStatus::EN_ROUTE.contains(&gathering.status) {
            return Err(Error::invalid_state("No venue has been confirmed yet"));
        }
        let me = self.membership(&gathering, user_id)?;
        if me.status != ParticipantStatus::Joined {
            return Err(Error::invalid_state("Already departed"));
        }

        let departed = self.notice(
            gathering.id,
            Some(me.id),
            format!("{} is on the way", me.nickname),
            MessagePayload::Departed { participant_id: me.id, nickname: me.nickname.clone() },
        );
        let Some(advanced) = self.db.advance_participant(
            me.id,
            ParticipantStatus::Joined,
            ParticipantStatus::Departed,
            self.now(),
            |still_home| {
                let mut messages = vec![departed];
                if still_home == 0 {
                    messages.push(self.notice(
                        gathering.id,
                        None,
                        "Everyone is on the way. Travel safe!".into(),
                        MessagePayload::AllDeparted,
                    ));
                }
                Followup {
                    transition: Some((CONFIRMED, GatheringStatus::Departing)),
                    messages,
                }
            },
        )?
        else {
            return Err(Error::invalid_state("Already departed"));
        };
        self.announce(gathering.id, advanced.version);

        info!("Participant {} departed for gathering {}", me.id, gathering.id);
        self.db.get_participant(me.id)?.ok_or(Error::NotFound("Participant"))
    }

    /// Marks the caller as arrived. The last arrival completes the gathering.
    pub fn arrive(&self, code: &str, user_id: Uuid) -> Result<Participant> {
        let gathering = self.find_gathering(code)?;
        if !GatheringStatus::EN_ROUTE.contains(&gathering.status) {
            return Err(Error::invalid_state("Gathering is not under way"));
        }
        let me = self.membership(&gathering, user_id)?;
        if me.status != ParticipantStatus::Departed {
            return Err(Error::invalid_state(match me.status {
                ParticipantStatus::Arrived => "Already arrived",
                _ => "Depart before arriving",
            }));
        }

        let arrived = self.notice(
            gathering.id,
            Some(me.id),
            format!("{} has arrived", me.nickname),
            MessagePayload::Arrived { participant_id: me.id, nickname: me.nickname.clone() },
        );
        let Some(advanced) = self.db.advance_participant(
            me.id,
            ParticipantStatus::Departed,
            ParticipantStatus::Arrived,
            self.now(),
            |not_arrived| {
                let mut followup = Followup { transition: None, messages: vec![arrived] };
                if not_arrived == 0 {
                    followup.transition = Some((EN_ROUTE, GatheringStatus::Completed));
                    followup.messages.push(self.notice(
                        gathering.id,
                        None,
                        "Everyone has arrived. Enjoy!".into(),
                        MessagePayload::AllArrived,
                    ));
                }
                followup
            },
        )?
        else {
            return Err(Error::invalid_state("Already arrived"));
        };
        if advanced.remaining == 0 && !advanced.transitioned {
            warn!("Gathering {} fully arrived but was not en route", gathering.id);
        }
        self.announce(gathering.id, advanced.version);

        info!("Participant {} arrived at gathering {}", me.id, gathering.id);
        self.db.get_participant(me.id)?.ok_or(Error::NotFound("Participant"))
    }

    pub fn update_location(&self, code: &str, user_id: Uuid, req: UpdateLocationRequest) -> Result<Participant> {
        validation::location(&req.location)?;

        let gathering = self.find_gathering(code)?;
        if gathering.status == GatheringStatus::Completed {
            return Err(Error::invalid_state("Gathering has completed"));
        }
        let me = self.membership(&gathering, user_id)?;

        let version = self
            .db
            .update_participant_location(me.id, req.location, req.location_name.as_deref())?
            .ok_or(Error::NotFound("Participant"))?;
        self.announce(gathering.id, version);

        self.db.get_participant(me.id)?.ok_or(Error::NotFound("Participant"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, RecordingNotifier, join_req};
    use rally_types::models::Location;
    use std::sync::Arc;

    #[test]
    fn create_starts_waiting_at_version_one() {
        let engine = testing::engine();
        let creator = Uuid::new_v4();
        let g = engine.create_gathering(creator, testing::create_req("Ana")).unwrap();

        assert_eq!(g.status, GatheringStatus::Waiting);
        assert_eq!(g.version, 1);
        assert!(invite::is_valid_invite_code(&g.code));

        let me = engine.db.participant_for_user(g.id, creator).unwrap().unwrap();
        assert!(me.is_creator);
        assert_eq!(engine.db.recent_messages(g.id, 50).unwrap().len(), 1);
    }

    #[test]
    fn create_rejects_bad_input() {
        let engine = testing::engine();
        let mut req = testing::create_req("Ana");
        req.name = "   ".into();
        assert!(matches!(
            engine.create_gathering(Uuid::new_v4(), req),
            Err(Error::InvalidInput(_))
        ));

        let mut req = testing::create_req("Ana");
        req.target_time = engine.now() - chrono::Duration::minutes(1);
        assert!(matches!(
            engine.create_gathering(Uuid::new_v4(), req),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn join_checks_code_membership_and_cap() {
        let engine = testing::engine();
        let g = engine.create_gathering(Uuid::new_v4(), testing::create_req("Ana")).unwrap();

        // Lower-case with spaces still resolves.
        let typed = format!(" {} ", g.code.to_lowercase());
        let user = Uuid::new_v4();
        engine.join_gathering(&typed, user, join_req("Bo")).unwrap();
        assert!(matches!(
            engine.join_gathering(&g.code, user, join_req("Bo")),
            Err(Error::AlreadyJoined)
        ));

        for i in 0..8 {
            engine
                .join_gathering(&g.code, Uuid::new_v4(), join_req(&format!("p{i}")))
                .unwrap();
        }
        assert!(matches!(
            engine.join_gathering(&g.code, Uuid::new_v4(), join_req("late")),
            Err(Error::GatheringFull)
        ));

        assert!(matches!(
            engine.join_gathering("ZZZZZZ", Uuid::new_v4(), join_req("x")),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            engine.join_gathering("O0O0", Uuid::new_v4(), join_req("x")),
            Err(Error::InvalidInviteCode)
        ));
    }

    #[test]
    fn start_nominating_needs_creator_and_two_people() {
        let engine = testing::engine();
        let creator = Uuid::new_v4();
        let g = engine.create_gathering(creator, testing::create_req("Ana")).unwrap();

        assert!(matches!(
            engine.start_nominating(&g.code, creator),
            Err(Error::TooFewParticipants)
        ));

        let bo = Uuid::new_v4();
        engine.join_gathering(&g.code, bo, join_req("Bo")).unwrap();
        assert!(matches!(engine.start_nominating(&g.code, bo), Err(Error::NotCreator)));

        let g = engine.start_nominating(&g.code, creator).unwrap();
        assert_eq!(g.status, GatheringStatus::Nominating);
        assert!(matches!(
            engine.start_nominating(&g.code, creator),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(
            engine.join_gathering(&g.code, Uuid::new_v4(), join_req("late")),
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn double_depart_and_early_arrive_are_rejected() {
        let engine = testing::engine();
        let s = testing::confirmed(&engine, 2).await;
        let [ana, bo] = [s.users[0], s.users[1]];

        assert!(matches!(engine.arrive(&s.code, ana), Err(Error::InvalidState(_))));

        let p = engine.depart(&s.code, ana).unwrap();
        assert_eq!(p.status, ParticipantStatus::Departed);
        assert_eq!(
            engine.load_gathering(s.gathering_id).unwrap().status,
            GatheringStatus::Departing
        );
        assert!(matches!(engine.depart(&s.code, ana), Err(Error::InvalidState(_))));

        engine.depart(&s.code, bo).unwrap();
        let kinds = testing::message_kinds(&engine, s.gathering_id);
        assert_eq!(kinds.iter().filter(|k| *k == "all_departed").count(), 1);
    }

    #[tokio::test]
    async fn every_stored_version_is_announced_once() {
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = testing::engine().with_notifier(notifier.clone());
        let s = testing::confirmed(&engine, 2).await;
        let before = engine.load_gathering(s.gathering_id).unwrap().version;

        engine.depart(&s.code, s.users[0]).unwrap();
        engine.depart(&s.code, s.users[1]).unwrap();

        let g = engine.load_gathering(s.gathering_id).unwrap();
        assert_eq!(g.status, GatheringStatus::Departing);
        assert_eq!(g.version, before + 2);
        // Creation is version 1; every later write is announced as it lands.
        assert_eq!(notifier.versions(s.gathering_id), (2..=g.version).collect::<Vec<_>>());

        let kinds = testing::message_kinds(&engine, s.gathering_id);
        assert_eq!(&kinds[kinds.len() - 3..], ["departed", "departed", "all_departed"]);
    }

    #[tokio::test]
    async fn last_arrival_completes_with_one_notice() {
        let engine = testing::engine();
        let s = testing::confirmed(&engine, 3).await;

        for user in &s.users {
            engine.depart(&s.code, *user).unwrap();
        }
        let before = engine.load_gathering(s.gathering_id).unwrap().version;

        engine.arrive(&s.code, s.users[0]).unwrap();
        engine.arrive(&s.code, s.users[1]).unwrap();
        assert_eq!(
            engine.load_gathering(s.gathering_id).unwrap().status,
            GatheringStatus::Departing
        );
        engine.arrive(&s.code, s.users[2]).unwrap();

        let g = engine.load_gathering(s.gathering_id).unwrap();
        assert_eq!(g.status, GatheringStatus::Completed);
        // One bump per action, even when the last arrival adds two messages.
        assert_eq!(g.version, before + 3);

        let kinds = testing::message_kinds(&engine, s.gathering_id);
        assert_eq!(kinds.iter().filter(|k| *k == "all_arrived").count(), 1);
        assert!(matches!(engine.arrive(&s.code, s.users[0]), Err(Error::InvalidState(_))));
    }

    #[test]
    fn location_update_bumps_version() {
        let engine = testing::engine();
        let creator = Uuid::new_v4();
        let g = engine.create_gathering(creator, testing::create_req("Ana")).unwrap();

        let loc = Location { lng: 116.5, lat: 39.95 };
        let p = engine
            .update_location(&g.code, creator, UpdateLocationRequest { location: loc, location_name: None })
            .unwrap();
        assert_eq!(p.location, Some(loc));
        assert_eq!(engine.load_gathering(g.id).unwrap().version, 2);

        let bad = Location { lng: 200.0, lat: 0.0 };
        assert!(matches!(
            engine.update_location(&g.code, creator, UpdateLocationRequest { location: bad, location_name: None }),
            Err(Error::InvalidInput(_))
        ));
    }
}
