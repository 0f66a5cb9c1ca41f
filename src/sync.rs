//! Notion sync through the user's proxy.
//!
//! The proxy receives one note plus the Notion credentials and writes the
//! page on our behalf. Nothing is sent unless the endpoint, token and
//! database id are all configured.

use crate::models::{Note, NotionTarget, ProxyErrorBody, ProxyTarget, SyncPayload};
use crate::state::{Notice, NoticeKind, StateContainer};
use crate::url_validator::{validate_proxy_url, UrlValidationError};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Notion sync is not configured (missing {})", .missing.join(", "))]
    NotConfigured { missing: Vec<&'static str> },
    #[error("no note with id '{0}'")]
    UnknownNote(String),
    #[error("this note is already syncing")]
    AlreadySyncing,
    #[error(transparent)]
    InvalidEndpoint(#[from] UrlValidationError),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Rejected(String),
}

// ============================================================================
// Proxy Client
// ============================================================================

#[derive(Clone)]
pub struct SyncClient {
    http: reqwest::Client,
}

impl SyncClient {
    pub fn new(timeout: Duration) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// POST one note to the proxy.
    pub async fn push(&self, target: &ProxyTarget, note: &Note) -> Result<(), SyncError> {
        let endpoint = validate_proxy_url(&target.endpoint)?;
        let payload = SyncPayload {
            note,
            notion_token: &target.notion_token,
            database_id: &target.database_id,
        };

        let response = self.http.post(endpoint).json(&payload).send().await?;
        if response.status().is_success() {
            return Ok(());
        }

        let status = response.status();
        let message = response
            .json::<ProxyErrorBody>()
            .await
            .ok()
            .and_then(|b| b.error)
            .filter(|e| !e.is_empty())
            .unwrap_or_else(|| "Failed to sync".to_string());
        warn!(%status, error = %message, "proxy rejected sync");
        Err(SyncError::Rejected(message))
    }
}

// ============================================================================
// Sync Operation
// ============================================================================

/// Sync one note from the container's list.
///
/// Missing configuration asks for the settings view and returns before any
/// request. The note's in-progress flag is held only for the request.
pub async fn sync_note(
    state: &StateContainer,
    client: &SyncClient,
    note_id: &str,
) -> Result<(), SyncError> {
    let target = match state.settings().notion_target() {
        NotionTarget::Ready(target) => target,
        NotionTarget::Unconfigured { missing } => {
            state.notify(Notice {
                kind: NoticeKind::Failure,
                message: "Please configure Notion integration in settings first.".to_string(),
            });
            state.request_settings();
            return Err(SyncError::NotConfigured { missing });
        }
    };

    let note = state
        .find(note_id)
        .ok_or_else(|| SyncError::UnknownNote(note_id.to_string()))?;
    let _busy = state
        .begin_syncing(note_id)
        .ok_or(SyncError::AlreadySyncing)?;

    match client.push(&target, &note).await {
        Ok(()) => {
            info!(note = note_id, "synced to Notion");
            state.notify(Notice {
                kind: NoticeKind::Success,
                message: "Synced to Notion successfully!".to_string(),
            });
            Ok(())
        }
        Err(e) => {
            state.notify(Notice {
                kind: NoticeKind::Failure,
                message: format!("Sync failed: {}", e),
            });
            Err(e)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NoteDraft, NotionConfig, Settings};
    use crate::state::{Action, StateEvent};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn configured(worker_url: &str, token: &str, database_id: &str) -> StateContainer {
        let state = StateContainer::memory_only();
        state.hydrate();
        state
            .dispatch(Action::ReplaceSettings(Settings {
                notion_config: Some(NotionConfig {
                    worker_url: worker_url.to_string(),
                    database_id: database_id.to_string(),
                    notion_token: token.to_string(),
                    is_enabled: true,
                }),
                ..Settings::default()
            }))
            .unwrap();
        state
            .dispatch(Action::CreateNote(NoteDraft {
                title: "Paper".to_string(),
                content: "read later".to_string(),
                ..NoteDraft::default()
            }))
            .unwrap();
        state
    }

    fn client() -> SyncClient {
        SyncClient::new(Duration::from_secs(5)).unwrap()
    }

    fn drain(events: &mut tokio::sync::broadcast::Receiver<StateEvent>) -> Vec<StateEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_sync_posts_note_and_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "notionToken": "secret_1",
                "databaseId": "db-1",
                "note": {"title": "Paper", "content": "read later"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let state = configured(&server.uri(), "secret_1", "db-1");
        let id = state.notes()[0].id.clone();
        let mut events = state.subscribe();

        sync_note(&state, &client(), &id).await.unwrap();

        assert!(!state.is_syncing(&id));
        assert!(drain(&mut events).contains(&StateEvent::Notice(Notice {
            kind: NoticeKind::Success,
            message: "Synced to Notion successfully!".to_string()
        })));
    }

    #[tokio::test]
    async fn test_server_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"error": "API token is invalid."})),
            )
            .mount(&server)
            .await;

        let state = configured(&server.uri(), "bad", "db-1");
        let id = state.notes()[0].id.clone();
        let mut events = state.subscribe();

        let err = sync_note(&state, &client(), &id).await.unwrap_err();
        assert_eq!(err.to_string(), "API token is invalid.");
        assert!(!state.is_syncing(&id));
        assert!(drain(&mut events).contains(&StateEvent::Notice(Notice {
            kind: NoticeKind::Failure,
            message: "Sync failed: API token is invalid.".to_string()
        })));
    }

    #[tokio::test]
    async fn test_error_without_body_uses_fallback() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let state = configured(&server.uri(), "t", "d");
        let id = state.notes()[0].id.clone();
        let err = sync_note(&state, &client(), &id).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to sync");
    }

    #[tokio::test]
    async fn test_missing_config_refuses_without_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        for (url, token, db) in [
            ("", "t", "d"),
            (server.uri().as_str(), "", "d"),
            (server.uri().as_str(), "t", ""),
        ] {
            let state = configured(url, token, db);
            let id = state.notes()[0].id.clone();
            let mut events = state.subscribe();

            let err = sync_note(&state, &client(), &id).await.unwrap_err();
            assert!(matches!(err, SyncError::NotConfigured { .. }));
            assert!(drain(&mut events).contains(&StateEvent::SettingsRequested));
            assert!(!state.is_syncing(&id));
        }
    }

    #[tokio::test]
    async fn test_unreachable_proxy_clears_flag() {
        // Port 9 on loopback is discard; nothing listens there in test envs.
        let state = configured("http://127.0.0.1:9/sync", "t", "d");
        let id = state.notes()[0].id.clone();
        let err = sync_note(&state, &client(), &id).await.unwrap_err();
        assert!(matches!(err, SyncError::Http(_)));
        assert!(!state.is_syncing(&id));
    }

    #[tokio::test]
    async fn test_concurrent_sync_of_same_note_refused() {
        let state = configured("https://proxy.example.workers.dev", "t", "d");
        let id = state.notes()[0].id.clone();
        let _held = state.begin_syncing(&id).unwrap();
        assert!(matches!(
            sync_note(&state, &client(), &id).await,
            Err(SyncError::AlreadySyncing)
        ));
    }

    #[tokio::test]
    async fn test_non_http_endpoint_rejected() {
        let state = configured("ftp://proxy.example.com", "t", "d");
        let id = state.notes()[0].id.clone();
        assert!(matches!(
            sync_note(&state, &client(), &id).await,
            Err(SyncError::InvalidEndpoint(UrlValidationError::UnsupportedScheme(_)))
        ));
        assert!(!state.is_syncing(&id));
    }
}
