//! Realtime collaborative document sessions: presence, cursors, edit
//! broadcast with retain/insert/delete operations, and debounced persistence
//! behind a WebSocket and a small REST API.

pub mod config;
pub mod db;
pub mod docs;
pub mod handlers;
pub mod kv;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod ws;

pub use config::Config;
pub use routes::create_app;
pub use state::AppState;
