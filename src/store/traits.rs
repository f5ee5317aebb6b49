//! `Database` trait: the persistence operations the sync engine relies on.
//!
//! Every write is an idempotent upsert keyed by the document's natural id, so
//! a crashed run can simply be repeated.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::model::{Agent, Conversation, LogRecord, Session};

/// Backend-agnostic persistence trait.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Agents & sessions ───────────────────────────────────────────

    /// Insert or refresh an agent, keyed by `agent_id`.
    async fn upsert_agent(&self, agent: &Agent) -> Result<(), DatabaseError>;

    /// Insert or refresh a session, keyed by `session_id`.
    async fn upsert_session(&self, session: &Session) -> Result<(), DatabaseError>;

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>, DatabaseError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Replace the stored transcript for `conversation.session_id`.
    async fn upsert_conversation(&self, conversation: &Conversation) -> Result<(), DatabaseError>;

    async fn find_conversation(
        &self,
        session_id: &str,
    ) -> Result<Option<Conversation>, DatabaseError>;

    // ── Raw logs ────────────────────────────────────────────────────

    /// Insert or refresh a raw log line, keyed by `log_key`.
    async fn upsert_log(&self, record: &LogRecord) -> Result<(), DatabaseError>;
}
