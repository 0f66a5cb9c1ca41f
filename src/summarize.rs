//! AI summarization of recent notes.
//!
//! Takes the content of the newest notes, asks a Gemini model for a short
//! summary, and prepends the answer as a new note. Failures never touch the
//! notes list.

use crate::models::{Note, SUMMARY_NOTE_COLOR, SUMMARY_NOTE_TITLE};
use crate::notes::{generate_id, now_millis, recent_context};
use crate::state::{Action, Notice, NoticeKind, StateContainer};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const MAX_OUTPUT_TOKENS: u32 = 200;
/// How many of the newest notes feed the prompt.
pub const CONTEXT_NOTES: usize = 5;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Error)]
pub enum SummarizeError {
    #[error("there are no notes to summarize")]
    NothingToSummarize,
    #[error("a summary is already being generated")]
    Busy,
    #[error("no API key: {0}")]
    AuthorizationFailed(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("completion API returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion API returned no text")]
    EmptyResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_output_tokens: u32,
}

impl CompletionRequest {
    pub fn summary_of(notes: &[Note], model: &str) -> Self {
        Self {
            model: model.to_string(),
            prompt: format!(
                "Briefly summarize recent focus: {}",
                recent_context(notes, CONTEXT_NOTES)
            ),
            max_output_tokens: MAX_OUTPUT_TOKENS,
        }
    }
}

/// A text completion endpoint.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> impl Future<Output = Result<String, SummarizeError>> + Send;
}

/// Where the completion API key comes from.
pub trait CredentialSource: Send + Sync {
    /// The key, if one is already available.
    fn api_key(&self) -> Option<String>;

    /// Try to obtain a key when none is available.
    fn authorize(&self) -> impl Future<Output = Result<String, SummarizeError>> + Send;
}

// ============================================================================
// Gemini Client
// ============================================================================

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
}

impl GeminiClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SummarizeError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl CompletionClient for GeminiClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        api_key: &str,
    ) -> Result<String, SummarizeError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);
        let body = json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": { "maxOutputTokens": request.max_output_tokens },
        });

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SummarizeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        let text: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(SummarizeError::EmptyResponse);
        }
        Ok(text)
    }
}

// ============================================================================
// API Key Source
// ============================================================================

/// API key taken from a connected value, an environment variable, or, as
/// the authorization step, a key file.
pub struct ApiKeyStore {
    connected: RwLock<Option<String>>,
    env_var: String,
    key_file: Option<PathBuf>,
}

impl ApiKeyStore {
    pub fn new(env_var: &str, key_file: Option<PathBuf>) -> Self {
        Self {
            connected: RwLock::new(None),
            env_var: env_var.to_string(),
            key_file,
        }
    }

    /// Use this key from now on.
    pub fn connect(&self, key: &str) {
        let key = key.trim();
        if let Ok(mut connected) = self.connected.write() {
            *connected = (!key.is_empty()).then(|| key.to_string());
        }
    }

    pub fn is_connected(&self) -> bool {
        self.api_key().is_some()
    }
}

impl CredentialSource for ApiKeyStore {
    fn api_key(&self) -> Option<String> {
        let connected = self.connected.read().ok().and_then(|c| c.clone());
        connected.or_else(|| {
            std::env::var(&self.env_var)
                .ok()
                .filter(|k| !k.trim().is_empty())
        })
    }

    async fn authorize(&self) -> Result<String, SummarizeError> {
        let Some(path) = &self.key_file else {
            return Err(SummarizeError::AuthorizationFailed(format!(
                "set {} or connect a key",
                self.env_var
            )));
        };
        let key = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SummarizeError::AuthorizationFailed(format!("{}: {}", path.display(), e)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(SummarizeError::AuthorizationFailed(format!(
                "{} is empty",
                path.display()
            )));
        }
        self.connect(key);
        Ok(key.to_string())
    }
}

// ============================================================================
// Summarize
// ============================================================================

/// Summarize the newest notes into a new note at the top of the list.
///
/// Without a key the authorization flow runs first and a failure there
/// aborts quietly. An empty list and call failures publish a failure
/// notice. The busy flag is cleared on every path.
pub async fn summarize_recent<C, K>(
    state: &StateContainer,
    client: &C,
    credentials: &K,
    model: &str,
) -> Result<Note, SummarizeError>
where
    C: CompletionClient,
    K: CredentialSource,
{
    let notes = state.notes();
    if notes.is_empty() {
        info!("summary refused, no notes");
        notify_failure(state);
        return Err(SummarizeError::NothingToSummarize);
    }

    let api_key = match credentials.api_key() {
        Some(key) => key,
        None => credentials.authorize().await.map_err(|e| {
            info!(error = %e, "summary aborted, no API key");
            e
        })?,
    };

    let _busy = state.begin_summarizing().ok_or(SummarizeError::Busy)?;

    let request = CompletionRequest::summary_of(&notes, model);
    let summary = match client.complete(&request, &api_key).await {
        Ok(text) => text,
        Err(e) => {
            warn!(error = %e, "summarization failed");
            notify_failure(state);
            return Err(e);
        }
    };

    let note = Note {
        id: generate_id(),
        title: SUMMARY_NOTE_TITLE.to_string(),
        content: summary,
        url: String::new(),
        fav_icon_url: None,
        timestamp: now_millis(),
        color: SUMMARY_NOTE_COLOR.to_string(),
    };
    // PrependNote never fails.
    let _ = state.dispatch(Action::PrependNote(note.clone()));
    Ok(note)
}

fn notify_failure(state: &StateContainer) {
    state.notify(Notice {
        kind: NoticeKind::Failure,
        message: "Summarization failed.".to_string(),
    });
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NoteDraft;
    use crate::state::StateEvent;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MODEL: &str = "gemini-test";

    struct FixedKey(Option<&'static str>);

    impl CredentialSource for FixedKey {
        fn api_key(&self) -> Option<String> {
            self.0.map(str::to_string)
        }

        async fn authorize(&self) -> Result<String, SummarizeError> {
            Err(SummarizeError::AuthorizationFailed("declined".to_string()))
        }
    }

    fn container_with_notes(contents: &[&str]) -> StateContainer {
        let state = StateContainer::memory_only();
        state.hydrate();
        for content in contents.iter().rev() {
            state
                .dispatch(Action::CreateNote(NoteDraft {
                    content: content.to_string(),
                    ..NoteDraft::default()
                }))
                .unwrap();
        }
        state
    }

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(&server.uri(), Duration::from_secs(5)).unwrap()
    }

    fn gemini_reply(text: &str) -> serde_json::Value {
        json!({"candidates": [{"content": {"parts": [{"text": text}], "role": "model"}}]})
    }

    #[test]
    fn test_prompt_uses_five_newest() {
        let state = container_with_notes(&["n1", "n2", "n3", "n4", "n5", "n6"]);
        let request = CompletionRequest::summary_of(&state.notes(), MODEL);
        assert_eq!(
            request.prompt,
            "Briefly summarize recent focus: n1\n---\nn2\n---\nn3\n---\nn4\n---\nn5"
        );
        assert_eq!(request.max_output_tokens, 200);
    }

    #[tokio::test]
    async fn test_summary_prepended_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "k1"))
            .and(body_partial_json(json!({"generationConfig": {"maxOutputTokens": 200}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("You read about Rust.")))
            .expect(1)
            .mount(&server)
            .await;

        let state = container_with_notes(&["ownership", "lifetimes"]);
        let note = summarize_recent(&state, &client(&server), &FixedKey(Some("k1")), MODEL)
            .await
            .unwrap();

        let notes = state.notes();
        assert_eq!(notes.len(), 3);
        assert_eq!(notes[0], note);
        assert_eq!(note.title, "AI Brain Summary");
        assert_eq!(note.color, "#a855f7");
        assert_eq!(note.content, "You read about Rust.");
        assert!(!state.is_summarizing());
    }

    #[tokio::test]
    async fn test_failed_call_leaves_notes_and_clears_busy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let state = container_with_notes(&["a"]);
        let before = state.notes();
        let mut events = state.subscribe();

        let result = summarize_recent(&state, &client(&server), &FixedKey(Some("k")), MODEL).await;
        assert!(matches!(result, Err(SummarizeError::Status { status: 500, .. })));
        assert_eq!(state.notes(), before);
        assert!(!state.is_summarizing());
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::Notice(Notice {
                kind: NoticeKind::Failure,
                message: "Summarization failed.".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_empty_text_is_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"candidates": []})))
            .mount(&server)
            .await;

        let state = container_with_notes(&["a"]);
        let result = summarize_recent(&state, &client(&server), &FixedKey(Some("k")), MODEL).await;
        assert!(matches!(result, Err(SummarizeError::EmptyResponse)));
        assert_eq!(state.notes().len(), 1);
    }

    #[tokio::test]
    async fn test_declined_authorization_makes_no_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_reply("x")))
            .expect(0)
            .mount(&server)
            .await;

        let state = container_with_notes(&["a"]);
        let result = summarize_recent(&state, &client(&server), &FixedKey(None), MODEL).await;
        assert!(matches!(result, Err(SummarizeError::AuthorizationFailed(_))));
        assert!(!state.is_summarizing());
    }

    #[tokio::test]
    async fn test_refused_while_busy_or_empty() {
        let server = MockServer::start().await;
        let empty = container_with_notes(&[]);
        let mut events = empty.subscribe();
        assert!(matches!(
            summarize_recent(&empty, &client(&server), &FixedKey(Some("k")), MODEL).await,
            Err(SummarizeError::NothingToSummarize)
        ));
        assert_eq!(
            events.try_recv().unwrap(),
            StateEvent::Notice(Notice {
                kind: NoticeKind::Failure,
                message: "Summarization failed.".to_string()
            })
        );
        assert!(empty.notes().is_empty());

        let state = container_with_notes(&["a"]);
        let _held = state.begin_summarizing().unwrap();
        assert!(matches!(
            summarize_recent(&state, &client(&server), &FixedKey(Some("k")), MODEL).await,
            Err(SummarizeError::Busy)
        ));
    }

    #[tokio::test]
    async fn test_key_file_authorization() {
        let dir = std::env::temp_dir().join(format!("synapse-key-{}", generate_id()));
        std::fs::create_dir_all(&dir).unwrap();
        let key_path = dir.join("key");
        std::fs::write(&key_path, "  from-file \n").unwrap();

        let keys = ApiKeyStore::new("SYNAPSE_TEST_UNSET_KEY_VAR", Some(key_path));
        assert_eq!(keys.api_key(), None);
        assert_eq!(keys.authorize().await.unwrap(), "from-file");
        assert_eq!(keys.api_key(), Some("from-file".to_string()));

        let missing = ApiKeyStore::new("SYNAPSE_TEST_UNSET_KEY_VAR", None);
        assert!(missing.authorize().await.is_err());
        missing.connect("manual");
        assert!(missing.is_connected());

        std::fs::remove_dir_all(&dir).ok();
    }
}
