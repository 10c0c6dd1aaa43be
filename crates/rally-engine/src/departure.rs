use chrono::{DateTime, Duration, Utc};
use rally_db::DeparturePlan;
use rally_types::models::{Gathering, Nomination, ParticipantStatus};
use tracing::debug;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::Result;
use crate::travel::estimate_or_fallback;

/// When to leave to arrive by `target` with `buffer` to spare.
pub fn departure_time(target: DateTime<Utc>, travel_secs: u32, buffer: Duration) -> DateTime<Utc> {
    target - Duration::seconds(i64::from(travel_secs)) - buffer
}

impl Engine {
    /// Stores a suggested departure time for every participant still at home
    /// with a known location and no plan yet, as one change. Travel figures
    /// come from the venue's nomination snapshot when it has them, otherwise
    /// from a fresh estimate.
    pub(crate) async fn plan_departures(&self, gathering: &Gathering, venue: &Nomination) -> Result<usize> {
        let participants = self.db.participants_for_gathering(gathering.id)?;
        let mut plans = Vec::new();

        for p in &participants {
            if p.status != ParticipantStatus::Joined || p.suggested_depart_at.is_some() {
                continue;
            }
            let Some(origin) = p.location else {
                debug!("Participant {} has no location, skipping departure plan", p.id);
                continue;
            };

            let snapshot = venue
                .travel_infos
                .iter()
                .find(|t| t.participant_id == p.id && t.duration > 0);
            let (duration, distance) = match snapshot {
                Some(info) => (info.duration, info.distance),
                None => {
                    let estimate = estimate_or_fallback(
                        self.estimator.as_ref(),
                        origin,
                        venue.location,
                        self.config.route_mode,
                    )
                    .await;
                    (estimate.duration, estimate.distance)
                }
            };

            plans.push(DeparturePlan {
                participant_id: p.id,
                depart_at: departure_time(gathering.target_time, duration, self.config.departure_buffer),
                duration_secs: duration,
                distance_m: distance,
            });
        }

        if !plans.is_empty() {
            let version = self.db.set_departure_plans(gathering.id, &plans)?;
            self.announce(gathering.id, version);
        }
        Ok(plans.len())
    }

    /// Plans participants of a confirmed gathering that have none yet.
    pub(crate) async fn plan_missing_departures(&self, gathering_id: Uuid) -> Result<usize> {
        let gathering = self.load_gathering(gathering_id)?;
        let venue = self
            .db
            .nominations_for_gathering(gathering_id)?
            .into_iter()
            .find(|n| n.is_confirmed);
        match venue {
            Some(venue) => self.plan_departures(&gathering, &venue).await,
            None => Ok(0),
        }
    }
}
