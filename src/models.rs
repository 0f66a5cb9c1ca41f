//! Data models for the notes application.
//!
//! Notes and settings are stored as JSON under two store keys, so every type
//! that reaches the store keeps the camelCase field names the capture widget
//! and the sync proxy expect.

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_NOTE_COLOR: &str = "#ffffff";
pub const SUMMARY_NOTE_COLOR: &str = "#a855f7";

pub const DEFAULT_NOTE_TITLE: &str = "Note";
pub const UNTITLED_NOTE_TITLE: &str = "Untitled Note";
pub const PAGE_NOTE_TITLE: &str = "Page Note";
pub const QUICK_NOTE_TITLE: &str = "Quick Note";
pub const SUMMARY_NOTE_TITLE: &str = "AI Brain Summary";

/// Colors offered by the note editor.
pub const PRESET_COLORS: &[&str] = &[
    "#ffffff", // white
    "#f97316", // orange
    "#a855f7", // purple
    "#3b82f6", // blue
    "#22c55e", // green
    "#eab308", // yellow
    "#ef4444", // red
];

// ============================================================================
// Core Note Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fav_icon_url: Option<String>,
    /// Capture or last-edit time, epoch milliseconds.
    pub timestamp: i64,
    pub color: String,
}

/// Fields supplied when a note is created from the main UI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteDraft {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
}

/// Inline edit of an existing note.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteEdit {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub color: String,
}

// ============================================================================
// Settings
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    #[default]
    Dark,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotionConfig {
    #[serde(default)]
    pub worker_url: String,
    #[serde(default)]
    pub database_id: String,
    #[serde(default)]
    pub notion_token: String,
    #[serde(default)]
    pub is_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub is_hover_trigger_active: bool,
    #[serde(default)]
    pub theme: Theme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notion_config: Option<NotionConfig>,
}

/// Resolved proxy destination for a Notion sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub endpoint: String,
    pub notion_token: String,
    pub database_id: String,
}

/// Whether the Notion integration can be used right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotionTarget {
    /// One or more required fields are empty.
    Unconfigured { missing: Vec<&'static str> },
    Ready(ProxyTarget),
}

impl Settings {
    pub fn notion_target(&self) -> NotionTarget {
        let config = self.notion_config.clone().unwrap_or_default();

        let mut missing = Vec::new();
        if config.worker_url.trim().is_empty() {
            missing.push("workerUrl");
        }
        if config.notion_token.trim().is_empty() {
            missing.push("notionToken");
        }
        if config.database_id.trim().is_empty() {
            missing.push("databaseId");
        }

        if missing.is_empty() {
            NotionTarget::Ready(ProxyTarget {
                endpoint: config.worker_url.trim().to_string(),
                notion_token: config.notion_token,
                database_id: config.database_id,
            })
        } else {
            NotionTarget::Unconfigured { missing }
        }
    }
}

// ============================================================================
// Cross-context Messages
// ============================================================================

/// Request sent from the capture widget to the background handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action")]
pub enum ExtensionMessage {
    #[serde(rename = "SAVE_NOTE")]
    SaveNote {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
}

/// Page the message was sent from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderInfo {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
}

// ============================================================================
// Sync Proxy Types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload<'a> {
    pub note: &'a Note,
    pub notion_token: &'a str,
    pub database_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct ProxyErrorBody {
    pub error: Option<String>,
}

// ============================================================================
// Tests
// ============================================================================
