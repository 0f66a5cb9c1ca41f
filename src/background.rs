//! Background message handler.
//!
//! Creates notes on behalf of the capture widget by editing the store
//! directly. It keeps no state of its own; open state containers pick the
//! new note up through the store's change notifications.

use crate::messaging::{Envelope, MessageReceiver};
use crate::models::{Ack, ExtensionMessage, Note, NoteDraft, SenderInfo, PAGE_NOTE_TITLE};
use crate::notes::new_note;
use crate::store::{decode, Store, StoreError, NOTES_KEY};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct BackgroundHandler {
    store: Arc<dyn Store>,
}

impl BackgroundHandler {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Handle one message: read notes, prepend the new one, write them back.
    pub fn handle(&self, message: &ExtensionMessage, sender: &SenderInfo) -> Result<Note, StoreError> {
        let ExtensionMessage::SaveNote { content, title } = message;

        let mut values = self.store.get(&[NOTES_KEY])?;
        let mut notes: Vec<Note> = decode(&mut values, NOTES_KEY)?.unwrap_or_default();

        let note = new_note(
            NoteDraft {
                title: title.clone().unwrap_or_default(),
                content: content.clone(),
                url: sender.url.clone().unwrap_or_default(),
                fav_icon_url: sender.fav_icon_url.clone(),
            },
            PAGE_NOTE_TITLE,
        );
        notes.insert(0, note.clone());

        let value = serde_json::to_value(&notes).map_err(|source| StoreError::Malformed {
            key: NOTES_KEY.to_string(),
            source,
        })?;
        self.store.set(vec![(NOTES_KEY.to_string(), value)])?;
        debug!(id = %note.id, url = %note.url, "note saved from page");
        Ok(note)
    }

    fn respond(&self, envelope: Envelope) {
        let ack = match self.handle(&envelope.message, &envelope.sender) {
            Ok(_) => Ack { success: true },
            Err(e) => {
                warn!(error = %e, "failed to save note from page");
                Ack { success: false }
            }
        };
        envelope.respond(ack);
    }

    /// Serve messages until every sender is dropped.
    pub async fn run(self, mut rx: MessageReceiver) {
        while let Some(envelope) = rx.recv().await {
            self.respond(envelope);
        }
        debug!("background handler stopped");
    }
}
