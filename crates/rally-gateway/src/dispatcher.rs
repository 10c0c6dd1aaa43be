use std::collections::HashMap;
use std::sync::Arc;

use rally_engine::notifier::ChangeNotifier;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use rally_types::events::SyncEvent;

/// Fans version-change notices out to connected clients.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Every connection receives every event and filters by its subscriptions.
    broadcast_tx: broadcast::Sender<SyncEvent>,

    /// Open connections per user: user_id -> connection count
    connections: RwLock<HashMap<Uuid, usize>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                connections: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Sending with no receivers is fine; nobody is listening yet.
    pub fn broadcast(&self, event: SyncEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub async fn connected(&self, user_id: Uuid) {
        *self.inner.connections.write().await.entry(user_id).or_default() += 1;
    }

    pub async fn disconnected(&self, user_id: Uuid) {
        let mut connections = self.inner.connections.write().await;
        if let Some(count) = connections.get_mut(&user_id) {
            *count -= 1;
            if *count == 0 {
                connections.remove(&user_id);
            }
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.values().sum()
    }
}

impl ChangeNotifier for Dispatcher {
    fn version_bumped(&self, gathering_id: Uuid, version: i64) {
        self.broadcast(SyncEvent::GatheringChanged { gathering_id, version });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn version_bumps_reach_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let id = Uuid::new_v4();

        dispatcher.version_bumped(id, 7);

        match rx.recv().await.unwrap() {
            SyncEvent::GatheringChanged { gathering_id, version } => {
                assert_eq!(gathering_id, id);
                assert_eq!(version, 7);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn tracks_connections_per_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        dispatcher.connected(user).await;
        dispatcher.connected(user).await;
        assert_eq!(dispatcher.connection_count().await, 2);

        dispatcher.disconnected(user).await;
        dispatcher.disconnected(user).await;
        dispatcher.disconnected(user).await;
        assert_eq!(dispatcher.connection_count().await, 0);
    }
}
