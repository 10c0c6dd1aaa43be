use std::sync::Arc;

use rally_db::Database;
use rally_engine::Engine;
use rally_gateway::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub engine: Arc<Engine>,
    /// Same store the engine uses; the sync gateway checks membership with it.
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}
