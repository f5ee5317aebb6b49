//! Upstream agent-platform API: paginated listings of agents, sessions, and logs.

pub mod client;
pub mod fields;
pub mod retry;

pub use client::HttpUpstream;
pub use retry::{RetryPolicy, RetryingUpstream, retry};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::UpstreamError;
use crate::model::Agent;

/// One page of a listing.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Items upstream sent, before unreadable ones were dropped.
    pub received: usize,
    /// Upstream's own "more data" flag, when the endpoint sends one.
    pub has_more: Option<bool>,
    /// Total matches, when the endpoint reports it.
    pub total: Option<u64>,
}

impl<T> Page<T> {
    /// A page whose items all survived normalization.
    pub fn new(items: Vec<T>, has_more: Option<bool>, total: Option<u64>) -> Self {
        Self {
            received: items.len(),
            items,
            has_more,
            total,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Some(false), None)
    }

    /// Whether another page should be requested after this one.
    ///
    /// An explicit `false` flag or a short page ends the listing. Without a
    /// flag only the page size decides.
    pub fn continues(&self, page_size: u32) -> bool {
        self.has_more != Some(false) && self.received >= page_size as usize
    }
}

/// A session as listed by the platform, before it is tied to an agent record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSession {
    pub session_id: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: Option<String>,
}

/// A single log line.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: Option<String>,
    /// Structured session field, when the platform sends one.
    pub session_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub raw: serde_json::Value,
}

/// Operations consumed from the platform. Pages are 1-based.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn list_agents(&self, page: u32, limit: u32) -> Result<Page<Agent>, UpstreamError>;

    async fn list_sessions(
        &self,
        agent_name: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<UpstreamSession>, UpstreamError>;

    /// List log lines, optionally scoped to one session and filtered
    /// server-side by a substring `query`.
    async fn list_logs(
        &self,
        agent_name: &str,
        session_id: Option<&str>,
        page: u32,
        limit: u32,
        query: Option<&str>,
    ) -> Result<Page<LogEntry>, UpstreamError>;
}
