//! Note construction, editing, and search.
//!
//! These are pure functions over note lists. The state container and the
//! background handler both build notes through here so defaults stay in one
//! place.

use crate::models::{Note, NoteDraft, NoteEdit, DEFAULT_NOTE_COLOR, UNTITLED_NOTE_TITLE};
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Last id handed out, used to keep ids unique within a millisecond.
static LAST_ID: AtomicI64 = AtomicI64::new(0);

// ============================================================================
// Identifiers and Time
// ============================================================================

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Generate a time-derived note id.
///
/// Ids are the creation time in milliseconds. Two notes created in the same
/// millisecond get consecutive values instead of colliding.
pub fn generate_id() -> String {
    let now = now_millis();
    let mut last = LAST_ID.load(Ordering::Relaxed);
    loop {
        let next = if now > last { now } else { last + 1 };
        match LAST_ID.compare_exchange_weak(last, next, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return next.to_string(),
            Err(actual) => last = actual,
        }
    }
}

// ============================================================================
// Construction and Editing
// ============================================================================

/// Build a new note with default color and the current time.
/// `fallback_title` is used when the supplied title is blank.
pub fn new_note(draft: NoteDraft, fallback_title: &str) -> Note {
    let title = if draft.title.trim().is_empty() {
        fallback_title.to_string()
    } else {
        draft.title
    };
    Note {
        id: generate_id(),
        title,
        content: draft.content,
        url: draft.url,
        fav_icon_url: draft.fav_icon_url.filter(|u| !u.is_empty()),
        timestamp: now_millis(),
        color: DEFAULT_NOTE_COLOR.to_string(),
    }
}

/// Apply an inline edit. Returns false if no note has the given id.
pub fn apply_edit(notes: &mut [Note], id: &str, edit: NoteEdit) -> bool {
    let Some(note) = notes.iter_mut().find(|n| n.id == id) else {
        return false;
    };
    note.title = if edit.title.is_empty() {
        UNTITLED_NOTE_TITLE.to_string()
    } else {
        edit.title
    };
    note.content = edit.content;
    note.color = edit.color;
    note.timestamp = now_millis();
    true
}

// ============================================================================
// Search
// ============================================================================

/// Case-insensitive substring match on title or content.
///
/// The result keeps the list's order; an empty query matches everything.
pub fn filter_notes<'a>(notes: &'a [Note], query: &str) -> Vec<&'a Note> {
    use rayon::prelude::*;

    let query_lower = query.to_lowercase();

    notes
        .par_iter()
        .filter(|note| {
            note.title.to_lowercase().contains(&query_lower)
                || note.content.to_lowercase().contains(&query_lower)
        })
        .collect()
}

/// Content of the most recent notes, newest first, joined for a prompt.
pub fn recent_context(notes: &[Note], limit: usize) -> String {
    notes
        .iter()
        .take(limit)
        .map(|n| n.content.as_str())
        .collect::<Vec<_>>()
        .join("\n---\n")
}

// ============================================================================
// Tests
// ============================================================================
