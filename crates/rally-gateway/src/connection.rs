use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use rally_db::Database;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use rally_types::events::{SyncCommand, SyncEvent};

use crate::dispatcher::Dispatcher;

/// Server sends a Ping this often; two missed Pongs drop the connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type Subscriptions = Arc<RwLock<HashSet<Uuid>>>;

/// Serves one WebSocket whose bearer token was already checked at upgrade.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>, user_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    info!("{} connected to sync gateway", user_id);

    if send_event(&mut sender, &SyncEvent::Ready { user_id }).await.is_err() {
        return;
    }

    dispatcher.connected(user_id).await;
    let mut broadcast_rx = dispatcher.subscribe();

    let subscriptions: Subscriptions = Arc::new(RwLock::new(HashSet::new()));
    let send_subscriptions = subscriptions.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Sync receiver lagged by {} events", n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if !is_subscribed(&send_subscriptions, &event) {
                        continue;
                    }
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<SyncCommand>(&text) {
                    Ok(cmd) => handle_command(&db, user_id, cmd, &subscriptions),
                    Err(e) => warn!(
                        "{} bad command: {} -- raw: {}",
                        user_id,
                        e,
                        text.chars().take(200).collect::<String>()
                    ),
                },
                Message::Pong(_) => pong_received.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnected(user_id).await;
    info!("{} disconnected from sync gateway", user_id);
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &SyncEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| warn!("Failed to encode sync event: {}", e))?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

fn is_subscribed(subscriptions: &Subscriptions, event: &SyncEvent) -> bool {
    match event.gathering_id() {
        Some(id) => subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id),
        None => true,
    }
}

/// Subscribing only takes effect for gatherings the user has joined.
fn handle_command(db: &Database, user_id: Uuid, cmd: SyncCommand, subscriptions: &Subscriptions) {
    match cmd {
        SyncCommand::Subscribe { gathering_ids } => {
            let allowed: Vec<Uuid> = gathering_ids
                .into_iter()
                .filter(|id| match db.participant_for_user(*id, user_id) {
                    Ok(found) => found.is_some(),
                    Err(e) => {
                        warn!("Membership lookup for {} failed: {}", id, e);
                        false
                    }
                })
                .collect();
            debug!("{} subscribing to {} gatherings", user_id, allowed.len());
            subscriptions
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .extend(allowed);
        }
        SyncCommand::Unsubscribe { gathering_ids } => {
            let mut subs = subscriptions.write().unwrap_or_else(|e| e.into_inner());
            for id in &gathering_ids {
                subs.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rally_engine::travel::StraightLineEstimator;
    use rally_engine::{Engine, EngineConfig};
    use rally_types::api::CreateGatheringRequest;

    fn create(engine: &Engine, user: Uuid) -> Uuid {
        let req = CreateGatheringRequest {
            name: "Board games".into(),
            target_time: chrono::Utc::now() + chrono::Duration::hours(2),
            creator_nickname: "Ana".into(),
            creator_tastes: vec![],
            creator_location: None,
            creator_location_name: None,
        };
        engine.create_gathering(user, req).unwrap().id
    }

    #[test]
    fn subscribe_is_limited_to_joined_gatherings() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let engine = Engine::new(db.clone(), Arc::new(StraightLineEstimator), EngineConfig::default());
        let user = Uuid::new_v4();
        let mine = create(&engine, user);
        let theirs = create(&engine, Uuid::new_v4());

        let subs: Subscriptions = Arc::default();
        let cmd: SyncCommand = serde_json::from_value(serde_json::json!({
            "type": "Subscribe",
            "data": { "gathering_ids": [mine, theirs] }
        }))
        .unwrap();
        handle_command(&db, user, cmd, &subs);

        let changed = |id| SyncEvent::GatheringChanged { gathering_id: id, version: 2 };
        assert!(is_subscribed(&subs, &changed(mine)));
        assert!(!is_subscribed(&subs, &changed(theirs)));
        assert!(is_subscribed(&subs, &SyncEvent::Ready { user_id: user }));

        handle_command(
            &db,
            user,
            SyncCommand::Unsubscribe { gathering_ids: vec![mine] },
            &subs,
        );
        assert!(!is_subscribed(&subs, &changed(mine)));
    }
}
