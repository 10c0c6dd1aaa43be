use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rally_db::ReminderClaim;
use rally_types::models::{
    GatheringStatus, MessagePayload, Participant, ParticipantStatus, ReminderThreshold,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::Result;

/// What one scan did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub settled_votes: usize,
    /// Participants given a departure plan that settlement did not store.
    pub departures_planned: usize,
    pub reminders: usize,
    /// Gatherings that received at least one reminder.
    pub gatherings: usize,
}

fn reminder_text(p: &Participant, threshold: ReminderThreshold, overdue: bool) -> String {
    match threshold {
        ReminderThreshold::ThirtyMinutes => {
            format!("{}, about 30 minutes until you should leave. Start getting ready!", p.nickname)
        }
        ReminderThreshold::TenMinutes => {
            format!("{}, about 10 minutes until you should leave. Time to head out soon!", p.nickname)
        }
        ReminderThreshold::Due if overdue => {
            format!("{} is past the suggested departure time and may be late!", p.nickname)
        }
        ReminderThreshold::Due => format!("{}, it's time to leave now!", p.nickname),
    }
}

impl Engine {
    pub async fn reminder_tick(&self) -> Result<TickReport> {
        self.reminder_tick_at(self.now()).await
    }

    /// One scan: settles votes whose timeout passed, plans departures that
    /// settlement left out, then sends due departure reminders. A failure in
    /// one gathering is logged and the scan moves on.
    pub async fn reminder_tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        for id in self.db.gathering_ids_in_status(&[GatheringStatus::Voting])? {
            match self.settle_if_expired(id, now).await {
                Ok(Some(_)) => report.settled_votes += 1,
                Ok(None) => {}
                Err(e) => warn!("Failed to settle expired vote for gathering {}: {}", id, e),
            }
        }

        for id in self.db.gathering_ids_in_status(&GatheringStatus::EN_ROUTE)? {
            match self.plan_missing_departures(id).await {
                Ok(planned) => report.departures_planned += planned,
                Err(e) => warn!("Departure planning failed for gathering {}: {}", id, e),
            }
            match self.remind_gathering(id, now) {
                Ok(0) => {}
                Ok(sent) => {
                    report.reminders += sent;
                    report.gatherings += 1;
                }
                Err(e) => warn!("Reminder scan failed for gathering {}: {}", id, e),
            }
        }

        Ok(report)
    }

    fn remind_gathering(&self, gathering_id: Uuid, now: DateTime<Utc>) -> Result<usize> {
        let participants = self.db.participants_for_gathering(gathering_id)?;
        let mut claims = Vec::new();

        for p in participants.iter().filter(|p| p.status == ParticipantStatus::Joined) {
            let Some(depart_at) = p.suggested_depart_at else {
                continue;
            };
            let remaining = depart_at - now;

            // Only the most urgent threshold crossed is announced; earlier
            // ones that were slept through are marked without a message.
            let Some(threshold) = ReminderThreshold::ALL
                .into_iter()
                .filter(|t| remaining <= t.lead())
                .last()
            else {
                continue;
            };
            if p.reminders_sent.is_sent(threshold) {
                continue;
            }
            let skipped = ReminderThreshold::ALL
                .into_iter()
                .take_while(|t| *t != threshold)
                .filter(|t| !p.reminders_sent.is_sent(*t))
                .collect();

            let overdue = threshold == ReminderThreshold::Due && remaining < -self.config.overdue_after;
            claims.push(ReminderClaim {
                participant_id: p.id,
                threshold,
                skipped,
                message: self.notice(
                    gathering_id,
                    None,
                    reminder_text(p, threshold, overdue),
                    MessagePayload::Reminder {
                        participant_id: p.id,
                        threshold,
                        depart_at,
                        overdue,
                    },
                ),
            });
        }

        if claims.is_empty() {
            return Ok(0);
        }
        let Some((sent, version)) = self.db.record_reminders(gathering_id, &claims)? else {
            return Ok(0);
        };
        self.announce(gathering_id, version);
        debug!("Sent {} reminders for gathering {}", sent, gathering_id);
        Ok(sent)
    }
}

struct Running {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs [`Engine::reminder_tick`] on a fixed interval until stopped.
pub struct ReminderScheduler {
    engine: Arc<Engine>,
    running: Mutex<Option<Running>>,
}

impl ReminderScheduler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Spawns the scan loop. Calling it while already running does nothing.
    pub fn start(&self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        if running.is_some() {
            warn!("Reminder scheduler already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let engine = self.engine.clone();
        let period = engine.config.reminder_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match engine.reminder_tick().await {
                            Ok(report) => {
                                if report != TickReport::default() {
                                    info!(
                                        "Reminder scan: {} votes settled, {} departures planned, {} reminders in {} gatherings",
                                        report.settled_votes, report.departures_planned, report.reminders, report.gatherings
                                    );
                                }
                            }
                            Err(e) => warn!("Reminder scan error: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        info!("Reminder scheduler started (every {:?})", period);
        *running = Some(Running { shutdown, handle });
    }

    /// Stops the scan loop and waits for an in-flight scan to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(running) = running else {
            return;
        };

        let _ = running.shutdown.send(true);
        if let Err(e) = running.handle.await {
            warn!("Reminder scheduler task ended abnormally: {}", e);
        }
        info!("Reminder scheduler stopped");
    }
}
