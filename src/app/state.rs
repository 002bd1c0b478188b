//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::MatchRegistry;
use crate::http::middleware::AuthGateway;
use crate::lobby::{InMemoryRoomDirectory, RoomDirectory};
use crate::store::SnapshotStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthGateway>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub match_registry: Arc<MatchRegistry>,
}

impl AppState {
    pub fn new(config: Config, snapshots: Arc<dyn SnapshotStore>) -> Self {
        let config = Arc::new(config);

        let auth = Arc::new(AuthGateway::new(config.match_start_secret.as_deref()));
        let rooms: Arc<dyn RoomDirectory> = Arc::new(InMemoryRoomDirectory::new());

        // Every match task shares the same settings and store
        let match_registry = Arc::new(MatchRegistry::new(config.match_settings(), snapshots));

        Self {
            config,
            auth,
            rooms,
            match_registry,
        }
    }

    /// State backed by an in-memory snapshot store
    #[cfg(test)]
    pub fn in_memory(config: Config) -> Self {
        Self::new(config, Arc::new(crate::store::MemorySnapshotStore::new()))
    }
}
