//! Fixtures shared by the engine's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rally_db::Database;
use rally_types::api::{CreateGatheringRequest, JoinGatheringRequest, NominateRequest};
use rally_types::models::{Location, NominationSource, TravelMode};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::notifier::ChangeNotifier;
use crate::travel::{Estimate, TravelEstimator};

pub struct FixedEstimator {
    estimate: Estimate,
    calls: AtomicUsize,
}

impl FixedEstimator {
    pub fn new(distance: u32, duration: u32) -> Self {
        Self {
            estimate: Estimate { distance, duration },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TravelEstimator for FixedEstimator {
    async fn estimate(&self, _: Location, _: Location, _: TravelMode) -> anyhow::Result<Estimate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.estimate)
    }
}

pub struct FailingEstimator;

#[async_trait]
impl TravelEstimator for FailingEstimator {
    async fn estimate(&self, _: Location, _: Location, _: TravelMode) -> anyhow::Result<Estimate> {
        bail!("routing service unavailable")
    }
}

/// Answers like [`FixedEstimator`] until stalled, then never answers.
pub struct StallingEstimator {
    inner: FixedEstimator,
    stalled: AtomicBool,
}

impl StallingEstimator {
    pub fn new(distance: u32, duration: u32) -> Self {
        Self {
            inner: FixedEstimator::new(distance, duration),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }
}

#[async_trait]
impl TravelEstimator for StallingEstimator {
    async fn estimate(&self, from: Location, to: Location, mode: TravelMode) -> anyhow::Result<Estimate> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.estimate(from, to, mode).await
    }
}

/// Keeps every announced `(gathering, version)` pair.
#[derive(Default)]
pub struct RecordingNotifier(Mutex<Vec<(Uuid, i64)>>);

impl RecordingNotifier {
    pub fn versions(&self, gathering_id: Uuid) -> Vec<i64> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == gathering_id)
            .map(|(_, v)| *v)
            .collect()
    }
}

impl ChangeNotifier for RecordingNotifier {
    fn version_bumped(&self, gathering_id: Uuid, version: i64) {
        self.0.lock().unwrap().push((gathering_id, version));
    }
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl Default for ManualClock {
    fn default() -> Self {
        Self(Mutex::new(Utc::now()))
    }
}

impl ManualClock {
    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub fn engine() -> Engine {
    engine_with(
        Arc::new(FixedEstimator::new(3000, 1200)),
        Arc::new(ManualClock::default()),
    )
}

pub fn engine_with(estimator: Arc<dyn TravelEstimator>, clock: Arc<dyn Clock>) -> Engine {
    let db = Arc::new(Database::open_in_memory().unwrap());
    Engine::new(db, estimator, EngineConfig::default()).with_clock(clock)
}

fn home() -> Location {
    Location { lng: 116.40, lat: 39.90 }
}

pub fn create_req(nickname: &str) -> CreateGatheringRequest {
    CreateGatheringRequest {
        name: "Friday dinner".into(),
        target_time: Utc::now() + Duration::hours(3),
        creator_nickname: nickname.into(),
        creator_tastes: vec!["火锅".into(), "川菜".into()],
        creator_location: Some(home()),
        creator_location_name: Some("Home".into()),
    }
}

pub fn join_req(nickname: &str) -> JoinGatheringRequest {
    JoinGatheringRequest {
        nickname: nickname.into(),
        location: Some(Location { lng: 116.45, lat: 39.93 }),
        location_name: None,
        tastes: vec!["日料".into()],
    }
}

pub fn nominate_req(place_id: &str) -> NominateRequest {
    NominateRequest {
        place_id: place_id.into(),
        name: format!("Place {place_id}"),
        address: Some("Chaoyang".into()),
        location: Location { lng: 116.42, lat: 39.92 },
        rating: Some(4.5),
        cost: Some(90.0),
        source: NominationSource::Manual,
        reason: None,
    }
}

/// A gathering driven to some phase. `users[0]` is the creator.
pub struct Scenario {
    pub code: String,
    pub gathering_id: Uuid,
    pub users: Vec<Uuid>,
    pub nominations: Vec<Uuid>,
    pub vote_id: Uuid,
}

/// `n` participants, nominating open.
pub fn nominating(engine: &Engine, n: usize) -> Scenario {
    let users: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
    let g = engine.create_gathering(users[0], create_req("Ana")).unwrap();
    for (i, user) in users.iter().enumerate().skip(1) {
        engine.join_gathering(&g.code, *user, join_req(&format!("Guest{i}"))).unwrap();
    }
    engine.start_nominating(&g.code, users[0]).unwrap();

    Scenario {
        code: g.code,
        gathering_id: g.id,
        users,
        nominations: Vec::new(),
        vote_id: Uuid::nil(),
    }
}

/// Two nominations from two proposers, vote open and nobody has voted.
pub async fn voting(engine: &Engine, n: usize) -> Scenario {
    let mut s = nominating(engine, n);
    let first = engine.nominate(&s.code, s.users[0], nominate_req("p1")).await.unwrap();
    let second = engine.nominate(&s.code, s.users[1], nominate_req("p2")).await.unwrap();
    s.nominations = vec![first.id, second.id];
    s.vote_id = engine.start_voting(&s.code, s.users[0]).unwrap().id;
    s
}

/// Everyone voted for `nominations[0]`, so the venue is confirmed and
/// departure times are planned.
pub async fn confirmed(engine: &Engine, n: usize) -> Scenario {
    let s = voting(engine, n).await;
    for user in &s.users {
        engine.cast_vote(&s.code, *user, s.vote_id, s.nominations[0]).await.unwrap();
    }
    s
}

pub fn message_kinds(engine: &Engine, gathering_id: Uuid) -> Vec<String> {
    engine
        .db
        .recent_messages(gathering_id, 500)
        .unwrap()
        .into_iter()
        .map(|m| m.payload.kind().to_string())
        .collect()
}
