use uuid::Uuid;

/// Receives every committed version bump. Used to push "go poll" hints to
/// connected clients; polling stays authoritative.
pub trait ChangeNotifier: Send + Sync {
    fn version_bumped(&self, gathering_id: Uuid, version: i64);
}

/// Notifier for deployments without a push channel.
pub struct NoopNotifier;

impl ChangeNotifier for NoopNotifier {
    fn version_bumped(&self, _gathering_id: Uuid, _version: i64) {}
}
