use collab_doc::db::{MemoryDocumentStore, PgDocumentStore, SharedDocumentStore};
use collab_doc::kv::MemoryKvStore;
use collab_doc::{create_app, AppState, Config};
use std::panic;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "collab_doc=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    // Durable store: Postgres when configured and reachable, memory otherwise
    let (documents, storage) = open_document_store(config.db_url.as_deref()).await;

    let kv = Arc::new(MemoryKvStore::new(config.kv_max_capacity));
    let address = config.server_address();
    let state = Arc::new(AppState::new(config, documents, kv).with_storage(storage));
    let app_routes = create_app(state.clone());

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", address));

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket available at ws://{}/ws", address);
    info!("📚 OpenAPI document at http://{}/api-docs/openapi.json", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    // Write whatever is still waiting in the debounce window
    state.persistence.flush_all().await;
    info!("Server stopped");
}

async fn open_document_store(db_url: Option<&str>) -> (SharedDocumentStore, &'static str) {
    let Some(db_url) = db_url else {
        warn!("No database URL configured - documents are kept in memory");
        let store: SharedDocumentStore = Arc::new(MemoryDocumentStore::new());
        return (store, "memory");
    };
    match connect_postgres(db_url).await {
        Ok(pg) => {
            let store: SharedDocumentStore = Arc::new(pg);
            (store, "postgres")
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            warn!("Falling back to the in-memory document store");
            let store: SharedDocumentStore = Arc::new(MemoryDocumentStore::new());
            (store, "memory")
        }
    }
}

async fn connect_postgres(db_url: &str) -> Result<PgDocumentStore, sqlx::Error> {
    let store = PgDocumentStore::new(db_url).await?;
    store.ensure_schema().await?;
    info!("Database initialized successfully");
    Ok(store)
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
}
