//! Shared state container for notes and settings.
//!
//! The container owns the in-memory notes list and settings record of one
//! context. It hydrates once from the store, writes both keys back after
//! every mutation once hydrated, and follows changes other contexts make to
//! the same store.
//!
//! Lifecycle: `Uninitialized -> Hydrating -> Ready`. Nothing is written to
//! the store before `Ready`, so default state can never clobber data that was
//! persisted by an earlier session.

use crate::models::{Note, NoteDraft, NoteEdit, Settings, DEFAULT_NOTE_TITLE};
use crate::notes::{apply_edit, filter_notes, new_note};
use crate::store::{
    decode, next_writer_id, Store, StoreChange, StoreError, WriterId, NOTES_KEY, SETTINGS_KEY,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    Uninitialized,
    Hydrating,
    Ready,
}

/// User intents and internal mutations.
#[derive(Debug, Clone)]
pub enum Action {
    CreateNote(NoteDraft),
    /// Prepend an already-built note (AI summaries).
    PrependNote(Note),
    EditNote { id: String, edit: NoteEdit },
    RequestDelete(String),
    ConfirmDelete,
    CancelDelete,
    ReplaceSettings(Settings),
    SetHoverTrigger(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Failure,
}

/// Transient user-visible message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    NotesChanged,
    SettingsChanged,
    DeletePending(String),
    /// The settings view should be shown (missing configuration).
    SettingsRequested,
    Notice(Notice),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no note with id '{0}'")]
    UnknownNote(String),
    #[error("no delete is awaiting confirmation")]
    NothingPending,
}

/// What `dispatch` returns on success.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Created(Note),
    Edited(Note),
    DeletePending(String),
    Deleted(String),
    DeleteCancelled,
    SettingsUpdated,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub lifecycle: Lifecycle,
    pub persistent: bool,
    pub note_count: usize,
    pub summarizing: bool,
    pub syncing: Vec<String>,
    pub pending_delete: Option<String>,
}

struct Inner {
    lifecycle: Lifecycle,
    /// False once the store turned out to be unusable.
    persistent: bool,
    notes: Vec<Note>,
    settings: Settings,
    pending_delete: Option<String>,
}

// ============================================================================
// Container
// ============================================================================

pub struct StateContainer {
    /// Tags this container's writes so their notices can be skipped.
    writer: WriterId,
    inner: Mutex<Inner>,
    store: Option<Arc<dyn Store>>,
    events: broadcast::Sender<StateEvent>,
    summarizing: AtomicBool,
    syncing: Mutex<HashSet<String>>,
}

impl StateContainer {
    pub fn new(store: Option<Arc<dyn Store>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            writer: next_writer_id(),
            inner: Mutex::new(Inner {
                lifecycle: Lifecycle::Uninitialized,
                persistent: store.is_some(),
                notes: Vec::new(),
                settings: Settings::default(),
                pending_delete: None,
            }),
            store,
            events,
            summarizing: AtomicBool::new(false),
            syncing: Mutex::new(HashSet::new()),
        }
    }

    /// Container with no store at all.
    pub fn memory_only() -> Self {
        Self::new(None)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: StateEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    pub fn notify(&self, notice: Notice) {
        self.emit(StateEvent::Notice(notice));
    }

    pub fn request_settings(&self) {
        self.emit(StateEvent::SettingsRequested);
    }

    // ------------------------------------------------------------------------
    // Hydration
    // ------------------------------------------------------------------------

    /// Read notes and settings once from the store and become `Ready`.
    ///
    /// A failed read detaches persistence instead of failing: the container
    /// keeps working in memory and never writes over what it could not read.
    pub fn hydrate(&self) -> Lifecycle {
        self.lock().lifecycle = Lifecycle::Hydrating;

        let loaded = match &self.store {
            None => {
                info!("no store available, running memory-only");
                None
            }
            Some(store) => match read_state(store.as_ref()) {
                Ok(loaded) => Some(loaded),
                Err(e) => {
                    warn!(error = %e, "initial read failed, running memory-only");
                    None
                }
            },
        };

        let mut inner = self.lock();
        match loaded {
            Some((notes, settings)) => {
                if let Some(notes) = notes {
                    inner.notes = notes;
                }
                if let Some(settings) = settings {
                    inner.settings = merge_settings(&inner.settings, settings);
                }
                info!(notes = inner.notes.len(), "state hydrated from store");
            }
            None => inner.persistent = false,
        }
        inner.lifecycle = Lifecycle::Ready;
        drop(inner);

        self.emit(StateEvent::NotesChanged);
        self.emit(StateEvent::SettingsChanged);
        Lifecycle::Ready
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub fn notes(&self) -> Vec<Note> {
        self.lock().notes.clone()
    }

    pub fn settings(&self) -> Settings {
        self.lock().settings.clone()
    }

    pub fn find(&self, id: &str) -> Option<Note> {
        self.lock().notes.iter().find(|n| n.id == id).cloned()
    }

    /// Filtered view; never touches the underlying list.
    pub fn search(&self, query: &str) -> Vec<Note> {
        let inner = self.lock();
        filter_notes(&inner.notes, query).into_iter().cloned().collect()
    }

    pub fn pending_delete(&self) -> Option<String> {
        self.lock().pending_delete.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        let mut syncing: Vec<String> = self
            .syncing
            .lock()
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        syncing.sort();
        let inner = self.lock();
        StatusSnapshot {
            lifecycle: inner.lifecycle,
            persistent: inner.persistent,
            note_count: inner.notes.len(),
            summarizing: self.is_summarizing(),
            syncing,
            pending_delete: inner.pending_delete.clone(),
        }
    }

    // ------------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------------

    pub fn dispatch(&self, action: Action) -> Result<Outcome, StateError> {
        let mut inner = self.lock();
        let (outcome, event) = match action {
            Action::CreateNote(draft) => {
                let note = new_note(draft, DEFAULT_NOTE_TITLE);
                inner.notes.insert(0, note.clone());
                (Outcome::Created(note), StateEvent::NotesChanged)
            }
            Action::PrependNote(note) => {
                inner.notes.insert(0, note.clone());
                (Outcome::Created(note), StateEvent::NotesChanged)
            }
            Action::EditNote { id, edit } => {
                if !apply_edit(&mut inner.notes, &id, edit) {
                    return Err(StateError::UnknownNote(id));
                }
                let edited = inner
                    .notes
                    .iter()
                    .find(|n| n.id == id)
                    .cloned()
                    .ok_or_else(|| StateError::UnknownNote(id.clone()))?;
                (Outcome::Edited(edited), StateEvent::NotesChanged)
            }
            Action::RequestDelete(id) => {
                if !inner.notes.iter().any(|n| n.id == id) {
                    return Err(StateError::UnknownNote(id));
                }
                inner.pending_delete = Some(id.clone());
                drop(inner);
                self.emit(StateEvent::DeletePending(id.clone()));
                return Ok(Outcome::DeletePending(id));
            }
            Action::CancelDelete => {
                inner.pending_delete = None;
                return Ok(Outcome::DeleteCancelled);
            }
            Action::ConfirmDelete => {
                let id = inner.pending_delete.take().ok_or(StateError::NothingPending)?;
                let before = inner.notes.len();
                inner.notes.retain(|n| n.id != id);
                if inner.notes.len() == before {
                    return Err(StateError::UnknownNote(id));
                }
                (Outcome::Deleted(id), StateEvent::NotesChanged)
            }
            Action::ReplaceSettings(settings) => {
                inner.settings = settings;
                (Outcome::SettingsUpdated, StateEvent::SettingsChanged)
            }
            Action::SetHoverTrigger(active) => {
                inner.settings.is_hover_trigger_active = active;
                (Outcome::SettingsUpdated, StateEvent::SettingsChanged)
            }
        };

        self.persist(&mut inner);
        drop(inner);
        self.emit(event);
        Ok(outcome)
    }

    /// Write both keys back. Only runs once hydrated and while the store is
    /// usable; the lock is held so writes leave in mutation order.
    fn persist(&self, inner: &mut Inner) {
        if inner.lifecycle != Lifecycle::Ready || !inner.persistent {
            debug!(lifecycle = ?inner.lifecycle, "skipping write");
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        let entries = match (
            serde_json::to_value(&inner.notes),
            serde_json::to_value(&inner.settings),
        ) {
            (Ok(notes), Ok(settings)) => vec![
                (NOTES_KEY.to_string(), notes),
                (SETTINGS_KEY.to_string(), settings),
            ],
            _ => {
                warn!("failed to serialize state, skipping write");
                return;
            }
        };
        if let Err(e) = store.set_as(Some(self.writer), entries) {
            warn!(error = %e, "failed to persist state");
        }
    }

    // ------------------------------------------------------------------------
    // External Changes
    // ------------------------------------------------------------------------

    /// Apply a change made to the store by another context.
    ///
    /// Notes are replaced outright. Settings are merged shallowly, and only
    /// once hydrated. Neither is written back. Notices of this container's
    /// own writes are skipped: memory is already at least that new.
    pub fn apply_external(&self, change: &StoreChange) {
        if change.writer == Some(self.writer) {
            return;
        }
        match change.key.as_str() {
            NOTES_KEY => {
                let notes = match &change.new_value {
                    None | Some(Value::Null) => Vec::new(),
                    Some(value) => match serde_json::from_value::<Vec<Note>>(value.clone()) {
                        Ok(notes) => notes,
                        Err(e) => {
                            warn!(error = %e, "ignoring malformed notes change");
                            return;
                        }
                    },
                };
                let mut inner = self.lock();
                if inner.notes == notes {
                    return;
                }
                let stale = inner
                    .pending_delete
                    .as_ref()
                    .is_some_and(|pending| !notes.iter().any(|n| &n.id == pending));
                if stale {
                    inner.pending_delete = None;
                }
                debug!(count = notes.len(), "notes replaced from store change");
                inner.notes = notes;
                drop(inner);
                self.emit(StateEvent::NotesChanged);
            }
            SETTINGS_KEY => {
                let Some(Value::Object(incoming)) = &change.new_value else {
                    return;
                };
                let mut inner = self.lock();
                if inner.lifecycle != Lifecycle::Ready {
                    debug!("settings change before hydration ignored");
                    return;
                }
                let merged = merge_settings(&inner.settings, Value::Object(incoming.clone()));
                if merged == inner.settings {
                    return;
                }
                inner.settings = merged;
                drop(inner);
                self.emit(StateEvent::SettingsChanged);
            }
            _ => {}
        }
    }

    /// Re-read both keys after missing notifications.
    fn resync(&self) {
        let Some(store) = &self.store else {
            return;
        };
        match store.get(&[NOTES_KEY, SETTINGS_KEY]) {
            Ok(mut values) => {
                for key in [NOTES_KEY, SETTINGS_KEY] {
                    if let Some(value) = values.remove(key) {
                        self.apply_external(&StoreChange {
                            key: key.to_string(),
                            writer: None,
                            old_value: None,
                            new_value: Some(value),
                        });
                    }
                }
            }
            Err(e) => warn!(error = %e, "resync failed"),
        }
    }

    /// Follow store changes until the store goes away.
    ///
    /// Subscribes immediately, so call this before `hydrate` to avoid a gap
    /// between the initial read and the first notification.
    pub fn spawn_listener(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self.store.as_ref()?.subscribe();
        let container = Arc::clone(self);
        Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(change) => container.apply_external(&change),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "store listener lagged, resyncing");
                        container.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    // ------------------------------------------------------------------------
    // Busy Flags
    // ------------------------------------------------------------------------

    pub fn is_summarizing(&self) -> bool {
        self.summarizing.load(Ordering::SeqCst)
    }

    /// Claim the summarization flag. `None` if a summary is already running.
    pub fn begin_summarizing(&self) -> Option<BusyGuard<'_>> {
        self.summarizing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| BusyGuard {
                container: self,
                slot: BusySlot::Summarize,
            })
    }

    pub fn is_syncing(&self, id: &str) -> bool {
        self.syncing.lock().map(|s| s.contains(id)).unwrap_or(false)
    }

    /// Mark a note as syncing. `None` if it already is.
    pub fn begin_syncing(&self, id: &str) -> Option<BusyGuard<'_>> {
        let mut syncing = self.syncing.lock().unwrap_or_else(|p| p.into_inner());
        if !syncing.insert(id.to_string()) {
            return None;
        }
        Some(BusyGuard {
            container: self,
            slot: BusySlot::Sync(id.to_string()),
        })
    }
}

enum BusySlot {
    Summarize,
    Sync(String),
}

/// Clears its busy flag when dropped, whatever the outcome.
pub struct BusyGuard<'a> {
    container: &'a StateContainer,
    slot: BusySlot,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        match &self.slot {
            BusySlot::Summarize => self.container.summarizing.store(false, Ordering::SeqCst),
            BusySlot::Sync(id) => {
                let mut syncing = self
                    .container
                    .syncing
                    .lock()
                    .unwrap_or_else(|p| p.into_inner());
                syncing.remove(id);
            }
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn read_state(store: &dyn Store) -> Result<(Option<Vec<Note>>, Option<Value>), StoreError> {
    let mut values = store.get(&[NOTES_KEY, SETTINGS_KEY])?;
    let notes = decode::<Vec<Note>>(&mut values, NOTES_KEY)?;
    let settings = values.remove(SETTINGS_KEY).filter(|v| v.is_object());
    Ok((notes, settings))
}

/// Shallow merge: top-level keys present in `incoming` replace the current
/// ones. An incoming value that does not fit leaves settings unchanged.
fn merge_settings(current: &Settings, incoming: Value) -> Settings {
    let Value::Object(incoming) = incoming else {
        return current.clone();
    };
    let mut base = match serde_json::to_value(current) {
        Ok(Value::Object(map)) => map,
        _ => return current.clone(),
    };
    for (key, value) in incoming {
        base.insert(key, value);
    }
    serde_json::from_value(Value::Object(base)).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring malformed settings");
        current.clone()
    })
}

// ============================================================================
// Tests
// ============================================================================
