use std::sync::Arc;

use chrono::{DateTime, Utc};
use rally_db::Database;
use rally_types::models::{Gathering, Message, MessagePayload, Participant};
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::invite;
use crate::notifier::{ChangeNotifier, NoopNotifier};
use crate::travel::TravelEstimator;

/// Coordinates gatherings on top of the store.
///
/// The engine keeps no per-gathering state in memory. Every operation reads
/// what it needs, validates, and then relies on conditional updates and
/// unique constraints in the store, so concurrent calls for the same
/// gathering are safe without locks here.
pub struct Engine {
    pub(crate) db: Arc<Database>,
    pub(crate) estimator: Arc<dyn TravelEstimator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) notifier: Arc<dyn ChangeNotifier>,
    pub(crate) config: EngineConfig,
}

impl Engine {
    pub fn new(db: Arc<Database>, estimator: Arc<dyn TravelEstimator>, config: EngineConfig) -> Self {
        Self {
            db,
            estimator,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(NoopNotifier),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Looks a gathering up by a user-typed invite code.
    pub(crate) fn find_gathering(&self, code: &str) -> Result<Gathering> {
        let code = invite::normalize_invite_code(code);
        if !invite::is_valid_invite_code(&code) {
            return Err(Error::InvalidInviteCode);
        }
        self.db
            .get_gathering_by_code(&code)?
            .ok_or(Error::NotFound("Gathering"))
    }

    pub(crate) fn load_gathering(&self, id: Uuid) -> Result<Gathering> {
        self.db.get_gathering(id)?.ok_or(Error::NotFound("Gathering"))
    }

    pub(crate) fn membership(&self, gathering: &Gathering, user_id: Uuid) -> Result<Participant> {
        self.db
            .participant_for_user(gathering.id, user_id)?
            .ok_or(Error::NotParticipant)
    }

    pub(crate) fn notice(
        &self,
        gathering_id: Uuid,
        sender_id: Option<Uuid>,
        text: String,
        payload: MessagePayload,
    ) -> Message {
        Message {
            id: Uuid::new_v4(),
            gathering_id,
            sender_id,
            text,
            payload,
            created_at: self.now(),
        }
    }

    /// Tells the notifier a write moved the gathering to `version`.
    pub(crate) fn announce(&self, gathering_id: Uuid, version: i64) {
        debug!("Gathering {} now at version {}", gathering_id, version);
        self.notifier.version_bumped(gathering_id, version);
    }
}
