//! Synapse Notes library - re-exports for testing and external use.
//!
//! Each context of the application (main UI state, page capture widget,
//! background message handler) is a separate component. They share nothing
//! but the key-value store and the message channel.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

pub mod background;
pub mod capture;
pub mod handlers;
pub mod messaging;
pub mod models;
pub mod notes;
pub mod state;
pub mod store;
pub mod summarize;
pub mod sync;
pub mod url_validator;

// ============================================================================
// Configuration
// ============================================================================

pub const DB_PATH: &str = ".synapse_db";
pub const BIND_ADDR: &str = "127.0.0.1:3000";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";
/// `SYNAPSE_DB_PATH` value selecting the in-memory store.
pub const MEMORY_DB: &str = ":memory:";
pub const HTTP_TIMEOUT_SECS: u64 = 60;
pub const MESSAGE_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind_addr: String,
    pub model: String,
    pub key_file: Option<PathBuf>,
    pub gemini_base_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_path: env::var("SYNAPSE_DB_PATH").unwrap_or_else(|_| DB_PATH.to_string()),
            bind_addr: env::var("SYNAPSE_BIND").unwrap_or_else(|_| BIND_ADDR.to_string()),
            model: env::var("SYNAPSE_MODEL")
                .unwrap_or_else(|_| summarize::DEFAULT_MODEL.to_string()),
            key_file: env::var("SYNAPSE_KEY_FILE").ok().map(PathBuf::from),
            gemini_base_url: summarize::GEMINI_BASE_URL.to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DB_PATH.to_string(),
            bind_addr: BIND_ADDR.to_string(),
            model: summarize::DEFAULT_MODEL.to_string(),
            key_file: None,
            gemini_base_url: summarize::GEMINI_BASE_URL.to_string(),
        }
    }
}

/// Open the configured store. `None` means storage is unavailable and the
/// application runs memory-only.
pub fn open_store(config: &Config) -> Option<Arc<dyn Store>> {
    if config.db_path == MEMORY_DB {
        info!("using in-memory store");
        return Some(Arc::new(MemoryStore::new()));
    }
    match sled::open(&config.db_path)
        .map_err(StoreError::from)
        .and_then(|db| SledStore::open(&db))
    {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, path = %config.db_path, "storage unavailable");
            None
        }
    }
}

// ============================================================================
// Application State
// ============================================================================

pub struct AppState {
    pub container: Arc<StateContainer>,
    pub sync: SyncClient,
    pub ai: GeminiClient,
    pub credentials: ApiKeyStore,
    pub model: String,
    pub capture: MessageSender,
}

impl AppState {
    pub fn new(
        config: &Config,
        container: Arc<StateContainer>,
        capture: MessageSender,
    ) -> Result<Self, String> {
        let timeout = Duration::from_secs(HTTP_TIMEOUT_SECS);
        let sync = SyncClient::new(timeout).map_err(|e| e.to_string())?;
        let ai = GeminiClient::new(&config.gemini_base_url, timeout).map_err(|e| e.to_string())?;
        Ok(Self {
            container,
            sync,
            ai,
            credentials: ApiKeyStore::new(API_KEY_ENV, config.key_file.clone()),
            model: config.model.clone(),
            capture,
        })
    }
}

// Re-export commonly used types
pub use models::{
    Ack, ExtensionMessage, Note, NoteDraft, NoteEdit, NotionConfig, NotionTarget, ProxyTarget,
    SenderInfo, Settings, Theme,
};

pub use store::{MemoryStore, SledStore, Store, StoreChange, StoreError, NOTES_KEY, SETTINGS_KEY};

pub use state::{Action, Lifecycle, Notice, NoticeKind, Outcome, StateContainer, StateEvent};

pub use notes::{filter_notes, generate_id};

pub use background::BackgroundHandler;
pub use capture::{CaptureWidget, SaveOutcome};
pub use messaging::{channel, MessageSender};
pub use summarize::{summarize_recent, ApiKeyStore, CompletionClient, CredentialSource, GeminiClient};
pub use sync::{sync_note, SyncClient};
pub use url_validator::{validate_proxy_url, UrlValidationError};
