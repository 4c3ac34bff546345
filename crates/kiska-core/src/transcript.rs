//! Transcript store: the ordered, append-only log of exchanged messages.
//!
//! Only the turn coordinator appends. Readers take [`TranscriptStore::snapshot`],
//! a cheap `Arc` clone of the entries at that instant; an append swaps in a new
//! vector (copy-on-write) so a snapshot never shows a partial entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Who produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    User,
    Assistant,
}

/// A single message in the transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub text: String,
    pub origin: Origin,
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn is_user(&self) -> bool {
        self.origin == Origin::User
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("transcript entries must contain non-whitespace text")]
    EmptyText,
}

/// Read-only view handed to the presentation layer.
pub type TranscriptSnapshot = Arc<Vec<TranscriptEntry>>;

#[derive(Debug, Default)]
pub struct TranscriptStore {
    entries: TranscriptSnapshot,
    /// Last sequence number handed out. Survives `clear` so numbers are never reused.
    last_sequence: u64,
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, assigning the next sequence number.
    pub fn append(
        &mut self,
        origin: Origin,
        text: impl Into<String>,
    ) -> Result<&TranscriptEntry, TranscriptError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(TranscriptError::EmptyText);
        }

        self.last_sequence += 1;
        let entries = Arc::make_mut(&mut self.entries);
        entries.push(TranscriptEntry {
            text,
            origin,
            sequence: self.last_sequence,
            timestamp: Utc::now(),
        });
        // `entries` is non-empty: we just pushed.
        Ok(&entries[entries.len() - 1])
    }

    pub fn snapshot(&self) -> TranscriptSnapshot {
        Arc::clone(&self.entries)
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry. Used only by session reset.
    pub fn clear(&mut self) {
        self.entries = Arc::new(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_assigns_increasing_sequence() {
        let mut store = TranscriptStore::new();
        store.append(Origin::User, "hello").unwrap();
        store.append(Origin::Assistant, "Hi there!").unwrap();
        store.append(Origin::User, "bye").unwrap();

        let seqs: Vec<u64> = store.entries().iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(store.entries()[0].is_user());
        assert!(!store.entries()[1].is_user());
    }

    #[test]
    fn test_blank_text_rejected() {
        let mut store = TranscriptStore::new();
        assert_eq!(
            store.append(Origin::User, "   \n").unwrap_err(),
            TranscriptError::EmptyText
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_across_appends() {
        let mut store = TranscriptStore::new();
        store.append(Origin::User, "first").unwrap();
        let before = store.snapshot();

        store.append(Origin::Assistant, "second").unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[test]
    fn test_clear_never_reuses_sequence_numbers() {
        let mut store = TranscriptStore::new();
        store.append(Origin::User, "one").unwrap();
        store.append(Origin::Assistant, "two").unwrap();
        store.clear();
        assert!(store.is_empty());

        let seq = store.append(Origin::User, "three").unwrap().sequence;
        assert_eq!(seq, 3);
    }
}
