//! In-memory playlist queue.
//!
//! A bounded FIFO of tracks shared by all requests. All access goes through
//! one mutex; every operation holds it only for the duration of a
//! `VecDeque` call.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use spotspof_core::{Error, Result, Source, TrackReference};
use uuid::Uuid;

/// A queued track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueEntry {
    pub id: Uuid,
    pub source: Source,
    /// Identifier as accepted by the stream/download routes.
    pub track_id: String,
    pub url: String,
    pub title: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn new(track: &TrackReference, title: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: track.source(),
            track_id: track.identifier().to_string(),
            url: track.canonical_url().to_string(),
            title,
            added_at: Utc::now(),
        }
    }
}

#[derive(Debug)]
pub struct PlaylistQueue {
    entries: Mutex<VecDeque<QueueEntry>>,
    capacity: usize,
}

impl PlaylistQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Append an entry. Returns its zero-based position.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` when the queue is full.
    pub fn push(&self, entry: QueueEntry) -> Result<usize> {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            return Err(Error::Conflict(format!(
                "queue is full ({} entries)",
                self.capacity
            )));
        }
        entries.push_back(entry);
        Ok(entries.len() - 1)
    }

    pub fn pop_front(&self) -> Option<QueueEntry> {
        self.entries.lock().pop_front()
    }

    /// Snapshot of the queue in play order.
    pub fn list(&self) -> Vec<QueueEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Remove the entry with `id`. Returns whether it was present.
    pub fn remove(&self, id: Uuid) -> bool {
        let mut entries = self.entries.lock();
        match entries.iter().position(|e| e.id == id) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove everything. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
