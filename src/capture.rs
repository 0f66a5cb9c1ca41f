//! Page capture widget.
//!
//! Headless controller for the floating trigger icon and the quick-note
//! overlay injected into visited pages. The widget reads the hover-trigger
//! setting from the store itself, follows later settings changes, and saves
//! notes by messaging the background handler.

use crate::messaging::{MessageError, MessageSender};
use crate::models::{Ack, ExtensionMessage, SenderInfo, Settings, QUICK_NOTE_TITLE};
use crate::store::{decode, Store, StoreChange, SETTINGS_KEY};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no capture overlay is open")]
    NoOverlay,
    #[error(transparent)]
    Message(#[from] MessageError),
    #[error("background handler failed to save the note")]
    Rejected,
}

/// The open quick-note overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOverlay {
    pub title: &'static str,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Blank content; the overlay stays open.
    Ignored,
    Saved,
}

pub struct CaptureWidget {
    page: SenderInfo,
    outbox: MessageSender,
    store: Arc<dyn Store>,
    changes: broadcast::Receiver<StoreChange>,
    trigger_visible: bool,
    overlay: Option<CaptureOverlay>,
}

/// Current hover-trigger setting; hidden when it cannot be read.
fn read_trigger(store: &dyn Store) -> bool {
    match store
        .get(&[SETTINGS_KEY])
        .and_then(|mut values| decode::<Settings>(&mut values, SETTINGS_KEY))
    {
        Ok(settings) => settings.is_some_and(|s| s.is_hover_trigger_active),
        Err(e) => {
            warn!(error = %e, "could not read settings, trigger hidden");
            false
        }
    }
}

impl CaptureWidget {
    /// Start the widget on a page.
    ///
    /// Subscribes before the initial read, so every later settings change
    /// is delivered to `sync_pending` or `follow`.
    pub fn start(store: Arc<dyn Store>, outbox: MessageSender, page: SenderInfo) -> Self {
        let changes = store.subscribe();
        let trigger_visible = read_trigger(store.as_ref());
        Self {
            page,
            outbox,
            store,
            changes,
            trigger_visible,
            overlay: None,
        }
    }

    pub fn trigger_visible(&self) -> bool {
        self.trigger_visible
    }

    pub fn overlay(&self) -> Option<&CaptureOverlay> {
        self.overlay.as_ref()
    }

    /// Show or hide the trigger when the settings key changes.
    pub fn on_store_change(&mut self, change: &StoreChange) {
        if change.key != SETTINGS_KEY {
            return;
        }
        let active = change
            .new_value
            .as_ref()
            .and_then(|v| v.get("isHoverTriggerActive"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if active != self.trigger_visible {
            debug!(active, "hover trigger toggled");
            self.trigger_visible = active;
        }
    }

    fn reload(&mut self) {
        let active = read_trigger(self.store.as_ref());
        debug!(active, "settings re-read after missed changes");
        self.trigger_visible = active;
    }

    /// Apply every change already queued, without waiting.
    pub fn sync_pending(&mut self) {
        use broadcast::error::TryRecvError;

        loop {
            let next = self.changes.try_recv();
            match next {
                Ok(change) => self.on_store_change(&change),
                Err(TryRecvError::Lagged(_)) => self.reload(),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
    }

    /// Follow store changes until the store's channel closes.
    pub async fn follow(&mut self) {
        use broadcast::error::RecvError;

        loop {
            let next = self.changes.recv().await;
            match next {
                Ok(change) => self.on_store_change(&change),
                Err(RecvError::Lagged(_)) => self.reload(),
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Open the overlay. Returns false if the trigger is hidden or an
    /// overlay is already open.
    pub fn click_trigger(&mut self) -> bool {
        if !self.trigger_visible || self.overlay.is_some() {
            return false;
        }
        self.overlay = Some(CaptureOverlay {
            title: QUICK_NOTE_TITLE,
            content: String::new(),
        });
        true
    }

    pub fn set_content(&mut self, content: &str) -> Result<(), CaptureError> {
        let overlay = self.overlay.as_mut().ok_or(CaptureError::NoOverlay)?;
        overlay.content = content.to_string();
        Ok(())
    }

    /// Send the overlay's content to the background handler and close it
    /// once acknowledged.
    pub async fn save(&mut self) -> Result<SaveOutcome, CaptureError> {
        let overlay = self.overlay.as_ref().ok_or(CaptureError::NoOverlay)?;
        if overlay.content.trim().is_empty() {
            return Ok(SaveOutcome::Ignored);
        }

        let message = ExtensionMessage::SaveNote {
            content: overlay.content.clone(),
            title: Some(overlay.title.to_string()),
        };
        let Ack { success } = self.outbox.send(message, self.page.clone()).await?;
        if !success {
            return Err(CaptureError::Rejected);
        }
        self.overlay = None;
        Ok(SaveOutcome::Saved)
    }

    pub fn cancel(&mut self) {
        self.overlay = None;
    }

    /// Click on the dimmed area around the overlay.
    pub fn backdrop_click(&mut self) {
        self.overlay = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::BackgroundHandler;
    use crate::messaging::channel;
    use crate::state::{Action, StateContainer};
    use crate::store::{MemoryStore, NOTES_KEY};
    use serde_json::json;
    use std::time::Duration;

    fn page() -> SenderInfo {
        SenderInfo {
            url: Some("https://blog.example.com/post".to_string()),
            fav_icon_url: Some("https://blog.example.com/favicon.ico".to_string()),
        }
    }

    fn store_with_trigger(active: bool) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .set(vec![(
                SETTINGS_KEY.to_string(),
                json!({"isHoverTriggerActive": active, "theme": "dark"}),
            )])
            .unwrap();
        store
    }

    fn start_widget(store: &MemoryStore, outbox: MessageSender) -> CaptureWidget {
        CaptureWidget::start(Arc::new(store.clone()), outbox, page())
    }

    fn spawn_background(store: &MemoryStore) -> MessageSender {
        let (tx, rx) = channel(8);
        tokio::spawn(BackgroundHandler::new(Arc::new(store.clone())).run(rx));
        tx
    }

    #[test]
    fn test_trigger_follows_initial_setting() {
        let (tx, _rx) = channel(1);
        let store = store_with_trigger(true);
        assert!(start_widget(&store, tx.clone()).trigger_visible());

        let store = MemoryStore::new();
        assert!(!start_widget(&store, tx).trigger_visible());
    }

    #[test]
    fn test_trigger_toggles_on_settings_change() {
        let (tx, _rx) = channel(1);
        let store = store_with_trigger(false);
        let mut widget = start_widget(&store, tx);

        widget.on_store_change(&StoreChange {
            key: SETTINGS_KEY.to_string(),
            writer: None,
            old_value: None,
            new_value: Some(json!({"isHoverTriggerActive": true})),
        });
        assert!(widget.trigger_visible());

        widget.on_store_change(&StoreChange {
            key: NOTES_KEY.to_string(),
            writer: None,
            old_value: None,
            new_value: Some(json!([])),
        });
        assert!(widget.trigger_visible());

        widget.on_store_change(&StoreChange {
            key: SETTINGS_KEY.to_string(),
            writer: None,
            old_value: None,
            new_value: None,
        });
        assert!(!widget.trigger_visible());
    }

    #[test]
    fn test_overlay_open_cancel_and_backdrop() {
        let (tx, _rx) = channel(1);
        let store = store_with_trigger(true);
        let mut widget = start_widget(&store, tx);

        assert!(widget.click_trigger());
        assert!(!widget.click_trigger());
        assert_eq!(widget.overlay().unwrap().title, "Quick Note");
        widget.set_content("draft").unwrap();
        widget.cancel();
        assert!(widget.overlay().is_none());

        assert!(widget.click_trigger());
        assert_eq!(widget.overlay().unwrap().content, "");
        widget.backdrop_click();
        assert!(widget.overlay().is_none());
        assert!(store.get(&[NOTES_KEY]).unwrap().is_empty());
    }

    #[test]
    fn test_hidden_trigger_does_not_open() {
        let (tx, _rx) = channel(1);
        let store = store_with_trigger(false);
        let mut widget = start_widget(&store, tx);
        assert!(!widget.click_trigger());
        assert!(matches!(widget.set_content("x"), Err(CaptureError::NoOverlay)));
    }

    #[tokio::test]
    async fn test_save_sends_message_and_closes() {
        let store = store_with_trigger(true);
        let tx = spawn_background(&store);
        let mut widget = start_widget(&store, tx);

        widget.click_trigger();
        widget.set_content("   ").unwrap();
        assert_eq!(widget.save().await.unwrap(), SaveOutcome::Ignored);
        assert!(widget.overlay().is_some());

        widget.set_content("an idea").unwrap();
        assert_eq!(widget.save().await.unwrap(), SaveOutcome::Saved);
        assert!(widget.overlay().is_none());

        let notes = &store.get(&[NOTES_KEY]).unwrap()[NOTES_KEY];
        assert_eq!(notes[0]["title"], "Quick Note");
        assert_eq!(notes[0]["content"], "an idea");
        assert_eq!(notes[0]["url"], "https://blog.example.com/post");
        assert_eq!(notes[0]["favIconUrl"], "https://blog.example.com/favicon.ico");
    }

    #[tokio::test]
    async fn test_toggle_from_main_ui_reaches_open_page() {
        let store = store_with_trigger(false);
        let (tx, _rx) = channel(1);
        let mut widget = start_widget(&store, tx);

        let ui = StateContainer::new(Some(Arc::new(store.clone())));
        ui.hydrate();
        ui.dispatch(Action::SetHoverTrigger(true)).unwrap();
        drop(ui);

        // Stops once the timeout fires; the change is already buffered.
        let _ = tokio::time::timeout(Duration::from_millis(200), widget.follow()).await;
        assert!(widget.trigger_visible());
    }

    #[test]
    fn test_toggle_right_after_start_is_not_missed() {
        let store = store_with_trigger(false);
        let (tx, _rx) = channel(1);
        let mut widget = start_widget(&store, tx);
        assert!(!widget.trigger_visible());

        store
            .set(vec![(SETTINGS_KEY.to_string(), json!({"isHoverTriggerActive": true}))])
            .unwrap();
        widget.sync_pending();
        assert!(widget.trigger_visible());
    }

    #[test]
    fn test_lagged_widget_rereads_settings() {
        let store = store_with_trigger(false);
        let (tx, _rx) = channel(1);
        let mut widget = start_widget(&store, tx);

        // Overflow the change buffer; the last write turns the trigger on.
        for i in 0..301 {
            store
                .set(vec![(
                    SETTINGS_KEY.to_string(),
                    json!({"isHoverTriggerActive": i % 2 == 0}),
                )])
                .unwrap();
        }
        widget.sync_pending();
        assert!(widget.trigger_visible());
    }
}
