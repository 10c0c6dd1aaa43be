use chrono::Duration;
use rally_types::models::TravelMode;

/// Tunables for the coordination engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub participant_cap: u32,
    /// Nominations each participant may have open in one gathering.
    pub nomination_cap: u32,
    pub vote_timeout: Duration,
    /// Slack added on top of the travel time when suggesting departures.
    pub departure_buffer: Duration,
    /// How late past the suggested departure the due reminder switches to
    /// the overdue wording.
    pub overdue_after: Duration,
    pub reminder_interval: std::time::Duration,
    pub message_limit: u32,
    pub route_mode: TravelMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            participant_cap: 10,
            nomination_cap: 2,
            vote_timeout: Duration::minutes(10),
            departure_buffer: Duration::minutes(10),
            overdue_after: Duration::minutes(10),
            reminder_interval: std::time::Duration::from_secs(30),
            message_limit: 50,
            route_mode: TravelMode::Transit,
        }
    }
}
