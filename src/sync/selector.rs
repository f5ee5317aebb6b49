//! Session context selector: keeps the best snapshot seen per session.
//!
//! The platform logs a full conversation snapshot many times per session, in
//! two kinds. Universal snapshots always beat model-specific ones; within a
//! kind the strictly later one wins.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::model::canonical_session_id;

/// Canonical 8-4-4-4-12 hex session identifier.
static SESSION_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .expect("static regex")
});

const UNIVERSAL_MARKER: &str = "universal context";
const MODEL_SPECIFIC_MARKERS: &[&str] = &["model specific context", "model-specific context"];

/// Which kind of snapshot a log line carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Universal,
    ModelSpecific,
}

impl SnapshotKind {
    /// Classify a log line by its marker phrase. `None` means not a snapshot.
    pub fn classify(log_text: &str) -> Option<Self> {
        let lowered = log_text.to_lowercase();
        if lowered.contains(UNIVERSAL_MARKER) {
            Some(SnapshotKind::Universal)
        } else if MODEL_SPECIFIC_MARKERS.iter().any(|m| lowered.contains(m)) {
            Some(SnapshotKind::ModelSpecific)
        } else {
            None
        }
    }
}

/// A candidate log line under evaluation. Lives only for one fetch cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawContextSnapshot {
    pub session_id: String,
    pub log_text: String,
    pub timestamp: DateTime<Utc>,
    pub is_universal: bool,
}

impl RawContextSnapshot {
    /// Build a snapshot from a log line, if it is one and names a session.
    pub fn from_log(log_text: &str, timestamp: DateTime<Utc>) -> Result<Self, Rejection> {
        let kind = SnapshotKind::classify(log_text).ok_or(Rejection::NotSnapshot)?;
        let session_id = extract_session_id(log_text).ok_or(Rejection::NoSessionId)?;
        Ok(Self {
            session_id,
            log_text: log_text.to_string(),
            timestamp,
            is_universal: kind == SnapshotKind::Universal,
        })
    }

    /// Whether `self` should replace `existing` for the same session.
    pub fn supersedes(&self, existing: &RawContextSnapshot) -> bool {
        match (existing.is_universal, self.is_universal) {
            (false, true) => true,
            (true, false) => false,
            _ => self.timestamp > existing.timestamp,
        }
    }
}

/// Why a log line did not become a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotSnapshot,
    /// A snapshot that cannot be attributed to any session.
    NoSessionId,
}

/// What `observe` did with a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Stored,
    Replaced,
    Kept,
}

/// First canonical session identifier in the text, lowercased.
pub fn extract_session_id(text: &str) -> Option<String> {
    SESSION_ID.find(text).map(|m| canonical_session_id(m.as_str()))
}

/// Best snapshot per session for one fetch cycle.
#[derive(Debug, Default)]
pub struct SessionContextSelector {
    best: HashMap<String, RawContextSnapshot>,
    discarded: usize,
}

impl SessionContextSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a candidate snapshot.
    pub fn observe(&mut self, candidate: RawContextSnapshot) -> Selection {
        match self.best.get_mut(&candidate.session_id) {
            None => {
                self.best.insert(candidate.session_id.clone(), candidate);
                Selection::Stored
            }
            Some(existing) if candidate.supersedes(existing) => {
                *existing = candidate;
                Selection::Replaced
            }
            Some(_) => Selection::Kept,
        }
    }

    /// Classify and offer a raw log line. Returns `None` if the line was rejected.
    pub fn observe_log(&mut self, log_text: &str, timestamp: DateTime<Utc>) -> Option<Selection> {
        match RawContextSnapshot::from_log(log_text, timestamp) {
            Ok(snapshot) => Some(self.observe(snapshot)),
            Err(Rejection::NoSessionId) => {
                self.discarded += 1;
                None
            }
            Err(Rejection::NotSnapshot) => None,
        }
    }

    pub fn get(&self, session_id: &str) -> Option<&RawContextSnapshot> {
        self.best.get(session_id)
    }

    pub fn len(&self) -> usize {
        self.best.len()
    }

    pub fn is_empty(&self) -> bool {
        self.best.is_empty()
    }

    /// Snapshots that had a marker but no session id.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Consume the selector, yielding winners ordered by session id.
    pub fn into_snapshots(self) -> Vec<RawContextSnapshot> {
        let mut snapshots: Vec<_> = self.best.into_values().collect();
        snapshots.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        snapshots
    }
}
