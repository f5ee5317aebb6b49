//! Field-name contract for upstream payloads.
//!
//! The platform is inconsistent about key names across endpoints and API
//! versions. Each logical field has a fixed priority list; the first key that
//! is present with a non-empty value wins.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

use super::{LogEntry, UpstreamSession};
use crate::model::Agent;

pub const AGENT_ID_FIELDS: &[&str] = &["agent_id", "agentId", "id", "_id"];
pub const AGENT_NAME_FIELDS: &[&str] = &["name", "agent_name", "agentName"];

pub const SESSION_ID_FIELDS: &[&str] = &["session_id", "sessionId", "id", "_id"];
pub const SESSION_STARTED_FIELDS: &[&str] = &["started_at", "startedAt", "created_at", "createdAt"];
pub const SESSION_ENDED_FIELDS: &[&str] = &["ended_at", "endedAt"];
pub const SESSION_STATUS_FIELDS: &[&str] = &["status", "state"];

pub const LOG_ID_FIELDS: &[&str] = &["id", "_id", "log_id", "logId"];
pub const LOG_TEXT_FIELDS: &[&str] = &["message", "msg", "log", "text"];
pub const LOG_TIME_FIELDS: &[&str] = &["timestamp", "time", "created_at", "createdAt"];
pub const LOG_SESSION_FIELDS: &[&str] = &["session_id", "sessionId"];

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// First present, non-empty string (numbers are stringified).
pub fn first_str(value: &Value, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|field| match value.get(*field)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// First field that parses as a timestamp.
pub fn first_timestamp(value: &Value, fields: &[&str]) -> Option<DateTime<Utc>> {
    fields
        .iter()
        .find_map(|field| value.get(*field).and_then(parse_timestamp))
}

/// Parse RFC 3339, SQLite-style datetimes, or epoch seconds/milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            let raw = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if raw > EPOCH_MILLIS_THRESHOLD {
                DateTime::from_timestamp_millis(raw)
            } else {
                DateTime::from_timestamp(raw, 0)
            }
        }
        _ => None,
    }
}

pub fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|ndt| ndt.and_utc())
}

pub fn agent_from_value(value: &Value) -> Option<Agent> {
    let agent_id = first_str(value, AGENT_ID_FIELDS)?;
    let name = first_str(value, AGENT_NAME_FIELDS).unwrap_or_else(|| agent_id.clone());
    Some(Agent { agent_id, name })
}

pub fn session_from_value(value: &Value) -> Option<UpstreamSession> {
    Some(UpstreamSession {
        session_id: first_str(value, SESSION_ID_FIELDS)?,
        started_at: first_timestamp(value, SESSION_STARTED_FIELDS),
        ended_at: first_timestamp(value, SESSION_ENDED_FIELDS),
        status: first_str(value, SESSION_STATUS_FIELDS),
    })
}

/// Log lines without text or a usable timestamp cannot be placed in time and are dropped.
pub fn log_from_value(value: &Value) -> Option<LogEntry> {
    Some(LogEntry {
        id: first_str(value, LOG_ID_FIELDS),
        session_id: first_str(value, LOG_SESSION_FIELDS),
        message: first_str(value, LOG_TEXT_FIELDS)?,
        timestamp: first_timestamp(value, LOG_TIME_FIELDS)?,
        raw: value.clone(),
    })
}
