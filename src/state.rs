use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::db::SharedDocumentStore;
use crate::kv::SharedKvStore;
use crate::services::cache::DocCache;
use crate::services::cursors::CursorTracker;
use crate::services::persistence::PersistenceQueue;
use crate::services::presence::PresenceRegistry;
use crate::services::sessions::SessionTracker;
use crate::services::versions::VersionService;
use crate::ws::coordinator::Coordinator;
use crate::ws::transport::LocalHub;

/// Shared application state handed to every HTTP and WebSocket handler
pub struct AppState {
    pub config: Config,
    pub hub: Arc<LocalHub>,
    pub coordinator: Arc<Coordinator>,
    pub presence: PresenceRegistry,
    pub versions: VersionService,
    pub persistence: PersistenceQueue,
    /// Backing document store, reported by the readiness check
    pub storage: &'static str,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, documents: SharedDocumentStore, kv: SharedKvStore) -> Self {
        let hub = Arc::new(LocalHub::new());
        let presence = PresenceRegistry::new(kv.clone(), config.presence_ttls());
        let cursors = CursorTracker::new(kv.clone(), config.cursor_ttl());
        let versions = VersionService::new(documents.clone());
        let sessions = SessionTracker::new(kv.clone(), versions.clone(), config.session_ttl());
        let cache = DocCache::new(kv, config.cache_ttl());
        let persistence = PersistenceQueue::new(documents.clone(), cache, config.persistence_settings());

        let coordinator = Arc::new(Coordinator::new(
            hub.clone(),
            documents,
            presence.clone(),
            cursors,
            sessions,
            persistence.clone(),
        ));

        Self {
            config,
            hub,
            coordinator,
            presence,
            versions,
            persistence,
            storage: "memory",
            started_at: Instant::now(),
        }
    }

    pub fn with_storage(mut self, storage: &'static str) -> Self {
        self.storage = storage;
        self
    }
}
