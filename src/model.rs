//! Persisted document shapes: agents, sessions, and reconstructed conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A deployed conversational service on the upstream platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub name: String,
}

/// Stored form of a session id.
///
/// The platform may send upper-case UUIDs while snapshot text is matched
/// case-insensitively, so every id is lowercased before it reaches the store.
pub fn canonical_session_id(id: &str) -> String {
    id.trim().to_ascii_lowercase()
}

/// One interactive run of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

/// One user message, optionally paired with the assistant's reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// 1-based, gapless within a conversation.
    pub turn_id: u32,
    pub user_message: String,
    pub assistant_message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A session's transcript, rebuilt from its best context snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    pub agent_id: String,
    pub agent_name: String,
    pub turns: Vec<Turn>,
    pub total_turns: u32,
    pub first_message_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
}

/// A raw upstream log line kept by the batch log sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub log_key: String,
    pub session_id: Option<String>,
    pub agent_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Original upstream payload, verbatim.
    pub raw: serde_json::Value,
}
