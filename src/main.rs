//! Synapse Notes - capture, summarize and sync short notes.
//!
//! This is the main entry point for the notes service.
//! The application is organized into the following modules:
//!
//! - `store`: Persistent key-value store with change notifications
//! - `state`: Shared state container for notes and settings
//! - `notes`: Note construction, editing and search
//! - `summarize`: AI summarization client
//! - `sync`: Notion sync through the user's proxy
//! - `capture` / `background` / `messaging`: Page capture path
//! - `handlers`: HTTP route handlers

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use synapse_notes::{
    channel, handlers, open_store, AppState, BackgroundHandler, Config, StateContainer,
    MESSAGE_BUFFER,
};

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,synapse_notes=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let store = open_store(&config);

    // Background context: creates notes sent from page widgets.
    let (capture_tx, capture_rx) = channel(MESSAGE_BUFFER);
    match &store {
        Some(store) => {
            tokio::spawn(BackgroundHandler::new(Arc::clone(store)).run(capture_rx));
        }
        None => {
            tracing::warn!("page capture disabled without storage");
            drop(capture_rx);
        }
    }

    // Main UI context. Listen before hydrating so no change is missed.
    let container = Arc::new(StateContainer::new(store));
    let _listener = container.spawn_listener();
    container.hydrate();

    let state = Arc::new(
        AppState::new(&config, container, capture_tx).expect("Failed to build HTTP clients"),
    );

    let app = Router::new()
        // Note routes
        .route(
            "/api/notes",
            get(handlers::list_notes).post(handlers::create_note),
        )
        .route(
            "/api/notes/{id}",
            put(handlers::edit_note).delete(handlers::request_delete),
        )
        .route(
            "/api/notes/pending-delete/confirm",
            post(handlers::confirm_delete),
        )
        .route(
            "/api/notes/pending-delete/cancel",
            post(handlers::cancel_delete),
        )
        // Integration routes
        .route("/api/notes/{id}/sync", post(handlers::sync_to_notion))
        .route("/api/summarize", post(handlers::summarize))
        .route("/api/ai/key", post(handlers::connect_key))
        // Settings and capture
        .route(
            "/api/settings",
            get(handlers::get_settings).put(handlers::put_settings),
        )
        .route("/api/capture", post(handlers::capture))
        .route("/api/status", get(handlers::status))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr.as_str())
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {}", config.bind_addr, e));

    tracing::info!("Synapse Notes running at http://{}", config.bind_addr);
    tracing::info!("Store: {}", config.db_path);

    axum::serve(listener, app).await.expect("Server error");
}
